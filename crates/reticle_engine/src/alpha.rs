//! Alpha memories.

use std::collections::BTreeSet;

use reticle_foundation::FactHandle;

/// The facts currently passing one alpha node's filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlphaMemory {
    handles: BTreeSet<FactHandle>,
}

impl AlphaMemory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fact. Returns false if it was already present.
    pub fn insert(&mut self, handle: FactHandle) -> bool {
        self.handles.insert(handle)
    }

    /// Removes a fact. Returns false if it was not present.
    pub fn remove(&mut self, handle: FactHandle) -> bool {
        self.handles.remove(&handle)
    }

    /// Returns true if the fact passes the filter.
    #[must_use]
    pub fn contains(&self, handle: FactHandle) -> bool {
        self.handles.contains(&handle)
    }

    /// Number of facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if no fact passes the filter.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Iterates in handle order.
    pub fn iter(&self) -> impl Iterator<Item = FactHandle> + '_ {
        self.handles.iter().copied()
    }
}
