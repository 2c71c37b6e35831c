//! Incremental matching network, agenda, and sessions for Reticle.
//!
//! This crate provides:
//! - [`KnowledgeBuilder`] / [`KnowledgeBase`] - Rule compilation into a shared network
//! - [`Session`] - Working memory, incremental matching, and firing
//! - [`Agenda`] - Live activations ordered by salience and insertion
//! - [`ExpressionCompiler`] - Turning declarative conditions into predicates
//! - [`ExecutionCoordinator`] - Optional parallel evaluation of matching work
//!
//! # Pipeline
//!
//! ```text
//! insert/update/delete ─▶ FactStore ─▶ alpha memories ─▶ join levels ─▶ Agenda
//!                                                                        │
//!                          actions (RhsContext) ◀─ fire() ◀──────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agenda;
pub mod alpha;
pub mod batch;
pub mod beta;
pub mod condition;
pub mod config;
pub mod coordinator;
pub mod knowledge;
pub mod listener;
pub mod network;
mod propagate;
pub mod rhs;
pub mod rule;
pub mod session;

pub use agenda::{Activation, ActivationId, Agenda};
pub use alpha::AlphaMemory;
pub use batch::MatchSet;
pub use beta::{BetaMemory, Tuple};
pub use condition::{
    ClosureCompiler, CmpOp, Condition, Expression, ExpressionCompiler, FieldRef, Operand,
    PredicateFn, field, lit,
};
pub use config::{EngineConfig, ExecutionMode};
pub use coordinator::ExecutionCoordinator;
pub use knowledge::{KnowledgeBase, KnowledgeBuilder};
pub use listener::{AgendaEvent, AgendaListener, EventLog};
pub use network::{CompiledRule, Network, RuleId};
pub use rhs::RhsContext;
pub use rule::{ActionFn, DEFAULT_SALIENCE, FactGroup, Quantifier, RuleDefinition};
pub use session::{FireOutcome, FireReport, HaltHandle, Session};
