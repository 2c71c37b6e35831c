//! Reticle - Forward-chaining production rule engine
//!
//! This crate re-exports all layers of the Reticle system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 2: reticle_engine      - Alpha/beta network, agenda, firing, sessions
//! Layer 1: reticle_memory      - Type registry, fact store (working memory)
//! Layer 0: reticle_foundation  - Core types (Value, FactHandle, Error)
//! ```

pub use reticle_engine as engine;
pub use reticle_foundation as foundation;
pub use reticle_memory as memory;
