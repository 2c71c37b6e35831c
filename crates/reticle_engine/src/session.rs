//! Sessions: working memory plus the agenda that reacts to it.
//!
//! A session owns its facts, node memories and agenda. The compiled network
//! and the worker pool are shared with every other session of the same
//! knowledge base. Fact mutations propagate before they return; actions
//! only run inside [`Session::fire`].
//!
//! Rules added or conditions replaced on a session change only that
//! session. The shared network is copied on the first such change.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use reticle_foundation::{Error, FactHandle, Payload, Result, Value, ValueKind};
use reticle_memory::{Fact, FactStore, FieldId, TypeRegistry};

use crate::agenda::{Activation, Agenda};
use crate::batch::{self, MatchSet};
use crate::config::EngineConfig;
use crate::condition::{ExpressionCompiler, PredicateFn};
use crate::coordinator::ExecutionCoordinator;
use crate::listener::AgendaListener;
use crate::network::{Network, RuleId};
use crate::propagate::{MatchContext, MatchState, Propagator};
use crate::rhs::RhsContext;
use crate::rule::RuleDefinition;

// =============================================================================
// Halting
// =============================================================================

/// Cooperative stop signal for a firing session.
///
/// The flag is checked between activations and cleared when observed.
#[derive(Clone, Debug, Default)]
pub struct HaltHandle(Arc<AtomicBool>);

impl HaltHandle {
    /// Requests a stop.
    pub fn halt(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true if a stop is pending.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Why a `fire` call returned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FireOutcome {
    /// No pending activation was left.
    Quiescent,
    /// A halt was requested.
    Halted,
    /// The configured `max_fires` was reached.
    LimitReached,
}

/// Summary of one `fire` call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FireReport {
    /// Number of actions that ran to completion.
    pub fired: usize,
    /// Why firing stopped.
    pub outcome: FireOutcome,
}

// =============================================================================
// Session
// =============================================================================

/// A working memory bound to a knowledge base.
pub struct Session {
    network: Arc<Network>,
    registry: TypeRegistry,
    config: Arc<EngineConfig>,
    coordinator: Arc<ExecutionCoordinator>,
    compiler: Arc<dyn ExpressionCompiler>,
    store: FactStore,
    state: MatchState,
    agenda: Agenda,
    errors: Vec<Error>,
    halt: HaltHandle,
}

impl Session {
    pub(crate) fn new(
        network: Arc<Network>,
        registry: TypeRegistry,
        config: Arc<EngineConfig>,
        coordinator: Arc<ExecutionCoordinator>,
        compiler: Arc<dyn ExpressionCompiler>,
    ) -> Self {
        let state = MatchState::new(&network);
        Self {
            network,
            registry,
            config,
            coordinator,
            compiler,
            store: FactStore::new(),
            state,
            agenda: Agenda::new(),
            errors: Vec::new(),
            halt: HaltHandle::default(),
        }
    }

    fn propagator(&mut self) -> Propagator<'_> {
        Propagator {
            ctx: MatchContext {
                network: &self.network,
                registry: &self.registry,
                store: &self.store,
            },
            coordinator: &self.coordinator,
            state: &mut self.state,
            agenda: &mut self.agenda,
            errors: &mut self.errors,
        }
    }

    fn context(&self) -> MatchContext<'_> {
        MatchContext {
            network: &self.network,
            registry: &self.registry,
            store: &self.store,
        }
    }

    // -------------------------------------------------------------------------
    // Working memory
    // -------------------------------------------------------------------------

    /// Inserts a fact and propagates it.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use reticle_engine::KnowledgeBuilder;
    ///
    /// let mut builder = KnowledgeBuilder::new();
    /// builder.declare_type("Note");
    /// let mut session = builder.build().unwrap().new_session();
    /// let handle = session.insert("Note", Arc::new("hello")).unwrap();
    /// assert!(session.contains(handle));
    /// ```
    ///
    /// # Errors
    /// Returns `UnknownType` if the type is not declared.
    pub fn insert(&mut self, type_name: &str, payload: Payload) -> Result<FactHandle> {
        let ty = self.registry.resolve(type_name)?;
        let handle = self.store.insert(ty, payload);
        debug!(%handle, type_name, "fact inserted");
        self.propagator().assert_fact(handle)?;
        Ok(handle)
    }

    /// Inserts several facts of one type, storing all of them before any is
    /// propagated.
    ///
    /// # Errors
    /// Returns `UnknownType` if the type is not declared; nothing is inserted.
    pub fn insert_all<T, I>(&mut self, type_name: &str, payloads: I) -> Result<Vec<FactHandle>>
    where
        T: Any + Send + Sync,
        I: IntoIterator<Item = Arc<T>>,
    {
        let ty = self.registry.resolve(type_name)?;
        let handles: Vec<FactHandle> = payloads
            .into_iter()
            .map(|payload| self.store.insert(ty, payload))
            .collect();
        debug!(count = handles.len(), type_name, "facts inserted");
        for handle in &handles {
            self.propagator().assert_fact(*handle)?;
        }
        Ok(handles)
    }

    /// Re-reads a fact's fields and propagates whatever changed.
    ///
    /// # Errors
    /// Returns `InvalidHandle` if the fact does not exist.
    pub fn update(&mut self, handle: FactHandle) -> Result<()> {
        let changed = self.store.update(handle, &self.registry)?;
        debug!(%handle, changed = changed.fields().len(), "fact updated");
        self.propagator().update_fact(handle, &changed)
    }

    /// Swaps a fact's payload, keeping its handle, and propagates the change.
    ///
    /// # Errors
    /// Returns `InvalidHandle` if the fact does not exist.
    pub fn replace(&mut self, handle: FactHandle, payload: Payload) -> Result<()> {
        let changed = self.store.replace(handle, payload, &self.registry)?;
        debug!(%handle, changed = changed.fields().len(), "fact replaced");
        self.propagator().update_fact(handle, &changed)
    }

    /// Retracts a fact from every memory and deletes it.
    ///
    /// # Errors
    /// Returns `InvalidHandle` if the fact does not exist.
    pub fn delete(&mut self, handle: FactHandle) -> Result<()> {
        let type_id = self.store.get(handle)?.type_id();
        self.propagator().retract_fact(handle, type_id);
        self.store.delete(handle)?;
        debug!(%handle, "fact deleted");
        Ok(())
    }

    /// Returns true if the handle refers to a live fact.
    #[must_use]
    pub fn contains(&self, handle: FactHandle) -> bool {
        self.store.contains(handle)
    }

    /// Returns a fact.
    ///
    /// # Errors
    /// Returns `InvalidHandle` if the fact does not exist.
    pub fn fact(&self, handle: FactHandle) -> Result<&Fact> {
        self.store.get(handle)
    }

    /// Returns a fact's payload as a concrete type.
    ///
    /// # Errors
    /// Returns `InvalidHandle` for unknown facts and `TypeMismatch` if the
    /// payload is of another type.
    pub fn payload<T: Any + Send + Sync>(&self, handle: FactHandle) -> Result<Arc<T>> {
        let fact = self.store.get(handle)?;
        fact.downcast::<T>().ok_or_else(|| {
            let actual = self
                .registry
                .get(fact.type_id())
                .map_or("unregistered type", |ty| ty.name());
            Error::type_mismatch(std::any::type_name::<T>(), actual)
        })
    }

    /// Reads one field of a fact.
    ///
    /// # Errors
    /// Returns `InvalidHandle` or `UnknownField`.
    pub fn value(&self, handle: FactHandle, field: &str) -> Result<Value> {
        let fact = self.store.get(handle)?;
        let ty = self
            .registry
            .get(fact.type_id())
            .ok_or_else(|| Error::internal(format!("fact {handle} has an unregistered type")))?;
        Ok(fact.value(ty.require_field(field)?))
    }

    /// Iterates over all facts in insertion order.
    pub fn facts(&self) -> impl Iterator<Item = &Fact> {
        self.store.iter()
    }

    /// Iterates over the facts of one type in insertion order.
    ///
    /// # Errors
    /// Returns `UnknownType` if the type is not declared.
    pub fn facts_of_type(&self, type_name: &str) -> Result<impl Iterator<Item = &Fact>> {
        let type_id = self.registry.id_of(type_name)?;
        Ok(self.store.of_type(type_id))
    }

    /// Number of live facts.
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.store.len()
    }

    /// Declares or overrides a field for this session only.
    ///
    /// Existing facts read the field lazily. Rules compiled into the knowledge
    /// base are unaffected and no activation is reclassified.
    ///
    /// # Errors
    /// Same as [`TypeRegistry::declare_field`].
    pub fn declare_field<F>(
        &mut self,
        type_name: &str,
        field: &str,
        kind: ValueKind,
        extractor: F,
    ) -> Result<FieldId>
    where
        F: Fn(&(dyn Any + Send + Sync)) -> Value + Send + Sync + 'static,
    {
        self.registry.declare_field(type_name, field, kind, extractor)
    }

    /// Declares a field over a concrete payload type for this session only.
    ///
    /// # Errors
    /// Same as [`TypeRegistry::declare_field`].
    pub fn declare_typed_field<T, F>(
        &mut self,
        type_name: &str,
        field: &str,
        kind: ValueKind,
        extractor: F,
    ) -> Result<FieldId>
    where
        T: Any,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.registry
            .declare_typed_field(type_name, field, kind, extractor)
    }

    /// The session's view of the type registry.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    // -------------------------------------------------------------------------
    // Live changes to the rule set
    // -------------------------------------------------------------------------

    /// Compiles a rule into this session and matches it against the facts
    /// already stored. Its activations join the agenda at once.
    ///
    /// The rule is compiled against the session's registry, so it may read
    /// session-local fields.
    ///
    /// # Errors
    /// Returns the compilation error (`InvalidRule`, `UnknownType`,
    /// `UnknownField`); the session is left unchanged.
    pub fn add_rule(&mut self, definition: RuleDefinition) -> Result<RuleId> {
        let first_new_alpha = self.network.alpha_count();
        let mut network = Network::clone(&self.network);
        let id = network.add_rule(&self.registry, &definition, self.compiler.as_ref())?;
        self.network = Arc::new(network);

        self.state.grow(&self.network);
        let before = self.agenda.len();
        self.propagator().seed_rule(id, first_new_alpha);
        debug!(
            rule = definition.name(),
            %id,
            activations = self.agenda.len() - before,
            "rule added"
        );
        Ok(id)
    }

    /// Swaps the predicate of every condition labelled `label`, keeping its
    /// arguments, then re-matches every stored fact.
    ///
    /// Activations whose tuples still match keep their place on the agenda
    /// and their fired state; the rest are cancelled, and new matches are
    /// added. Returns the number of conditions changed.
    ///
    /// # Errors
    /// Returns `UnknownCondition` if no condition carries the label.
    pub fn replace_condition<F>(&mut self, label: &str, predicate: F) -> Result<usize>
    where
        F: Fn(&[Value]) -> Result<bool> + Send + Sync + 'static,
    {
        if !self.network.has_condition(label) {
            return Err(Error::unknown_condition(label));
        }
        let predicate: PredicateFn = Arc::new(predicate);
        let replaced = Arc::make_mut(&mut self.network).replace_predicate(label, &predicate);
        self.rematch()?;
        debug!(label, replaced, pending = self.agenda.len(), "condition replaced");
        Ok(replaced)
    }

    /// Rebuilds every memory from the stored facts, then brings the agenda
    /// in line with the new terminal tuples.
    fn rematch(&mut self) -> Result<()> {
        let mut state = MatchState::new(&self.network);
        let mut scratch = Agenda::new();
        let handles: Vec<FactHandle> = self.store.iter().map(Fact::handle).collect();
        let mut propagator = Propagator {
            ctx: MatchContext {
                network: &self.network,
                registry: &self.registry,
                store: &self.store,
            },
            coordinator: &self.coordinator,
            state: &mut state,
            agenda: &mut scratch,
            errors: &mut self.errors,
        };
        for handle in handles {
            propagator.assert_fact(handle)?;
        }
        self.state = state;

        let live = self.matches();
        for (rule, tuple) in self.agenda.live_keys() {
            if !live.contains(&(rule, tuple.clone())) {
                self.agenda.remove(rule, &tuple);
            }
        }
        let network = Arc::clone(&self.network);
        for (rule, tuple) in live {
            if self.agenda.contains(rule, &tuple) {
                continue;
            }
            if let Some(compiled) = network.rule(rule) {
                self.agenda.add(compiled, tuple);
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Firing
    // -------------------------------------------------------------------------

    /// Fires activations until none is pending, a halt is requested, or the
    /// configured `max_fires` is reached.
    ///
    /// # Errors
    /// Returns `ActionExecution` if an action fails. Firing stops at once;
    /// mutations the action already made stay in effect and the failed
    /// activation stays pending.
    pub fn fire(&mut self) -> Result<FireReport> {
        self.run(self.config.max_fires)
    }

    /// Like [`Session::fire`] but ignores `max_fires`: only quiescence or a
    /// halt stops it.
    ///
    /// # Errors
    /// Same as [`Session::fire`].
    pub fn fire_until_halt(&mut self) -> Result<FireReport> {
        self.run(None)
    }

    fn run(&mut self, limit: Option<usize>) -> Result<FireReport> {
        let network = Arc::clone(&self.network);
        for rule in network.rules().iter().filter(|r| r.refire()) {
            self.agenda.rearm(rule.id());
        }

        let mut fired = 0;
        let outcome = loop {
            if self.halt.take() {
                break FireOutcome::Halted;
            }
            if limit.is_some_and(|max| fired >= max) {
                break FireOutcome::LimitReached;
            }
            let Some(activation) = self.agenda.peek().cloned() else {
                break FireOutcome::Quiescent;
            };
            let Some(rule) = network.rule(activation.rule()) else {
                return Err(Error::internal(format!(
                    "activation {activation} refers to a missing rule"
                )));
            };

            self.agenda.begin_fire(&activation);
            if let Some(action) = &rule.action {
                let mut ctx = RhsContext::new(self, rule, &activation);
                if let Err(error) = action(&mut ctx) {
                    self.agenda.end_fire(&activation, false);
                    return Err(Error::action_execution(rule.name(), error));
                }
            }
            self.agenda.mark_fired(&activation);
            self.agenda.end_fire(&activation, true);
            fired += 1;
        };

        debug!(fired, ?outcome, pending = self.agenda.len(), "fire finished");
        Ok(FireReport { fired, outcome })
    }

    /// Requests that firing stop before the next activation.
    pub fn halt(&self) {
        self.halt.halt();
    }

    /// A handle that can halt this session from another thread.
    #[must_use]
    pub fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Number of pending activations.
    #[must_use]
    pub fn activation_count(&self) -> usize {
        self.agenda.len()
    }

    /// Pending activations in the order they would fire.
    #[must_use]
    pub fn activations(&self) -> Vec<Activation> {
        self.agenda.iter().cloned().collect()
    }

    /// The agenda, including fired activations still live.
    #[must_use]
    pub fn agenda(&self) -> &Agenda {
        &self.agenda
    }

    /// Every fully bound tuple currently held by the network.
    #[must_use]
    pub fn matches(&self) -> MatchSet {
        let mut matches = MatchSet::new();
        for rule in self.network.rules() {
            if let Some(terminal) = self.state.rules[rule.id().index()].terminal() {
                matches.extend(terminal.iter().map(|t| (rule.id(), t.clone())));
            }
        }
        matches
    }

    /// Evaluates every rule from scratch against the current facts.
    ///
    /// Always equal to [`Session::matches`].
    #[must_use]
    pub fn recompute_matches(&self) -> MatchSet {
        batch::evaluate(self.context())
    }

    /// Registers an agenda listener.
    pub fn add_listener(&mut self, listener: Arc<dyn AgendaListener>) {
        self.agenda.add_listener(listener);
    }

    /// Condition failures recorded during propagation.
    #[must_use]
    pub fn condition_errors(&self) -> &[Error] {
        &self.errors
    }

    /// Drains the recorded condition failures.
    pub fn take_condition_errors(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.errors)
    }

    /// The compiled network.
    #[must_use]
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// The configuration of the owning knowledge base.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("facts", &self.store.len())
            .field("agenda", &self.agenda)
            .field("errors", &self.errors.len())
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}
