//! Working memory.
//!
//! The `FactStore` owns every inserted fact and indexes them by handle and by
//! logical type. Both indices are ordered, so iteration follows insertion
//! order and replays deterministically.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use reticle_foundation::{Error, FactHandle, Payload, Result};

use crate::fact::{ChangedFields, Fact};
use crate::registry::{LogicalType, LogicalTypeId, TypeRegistry};

/// Owns all facts of one session.
#[derive(Debug, Default)]
pub struct FactStore {
    facts: BTreeMap<FactHandle, Fact>,
    by_type: HashMap<LogicalTypeId, BTreeSet<FactHandle>>,
}

impl FactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new fact and issues its handle.
    pub fn insert(&mut self, ty: &LogicalType, payload: Payload) -> FactHandle {
        let handle = FactHandle::next();
        self.facts.insert(handle, Fact::new(handle, ty, payload));
        self.by_type.entry(ty.id()).or_default().insert(handle);
        handle
    }

    /// Re-reads the cached field values of a fact.
    ///
    /// # Errors
    /// Returns `InvalidHandle` if the fact does not exist.
    pub fn update(&mut self, handle: FactHandle, registry: &TypeRegistry) -> Result<ChangedFields> {
        let fact = self
            .facts
            .get_mut(&handle)
            .ok_or_else(|| Error::invalid_handle(handle))?;
        let ty = type_of(registry, fact)?;
        Ok(fact.refresh(ty))
    }

    /// Swaps the payload of a fact and re-reads its cached field values.
    ///
    /// # Errors
    /// Returns `InvalidHandle` if the fact does not exist.
    pub fn replace(
        &mut self,
        handle: FactHandle,
        payload: Payload,
        registry: &TypeRegistry,
    ) -> Result<ChangedFields> {
        let fact = self
            .facts
            .get_mut(&handle)
            .ok_or_else(|| Error::invalid_handle(handle))?;
        let ty = type_of(registry, fact)?;
        Ok(fact.replace(ty, payload))
    }

    /// Removes a fact and returns it.
    ///
    /// # Errors
    /// Returns `InvalidHandle` if the fact does not exist.
    pub fn delete(&mut self, handle: FactHandle) -> Result<Fact> {
        let fact = self
            .facts
            .remove(&handle)
            .ok_or_else(|| Error::invalid_handle(handle))?;
        if let Some(handles) = self.by_type.get_mut(&fact.type_id()) {
            handles.remove(&handle);
        }
        Ok(fact)
    }

    /// Returns a fact.
    ///
    /// # Errors
    /// Returns `InvalidHandle` if the fact does not exist.
    pub fn get(&self, handle: FactHandle) -> Result<&Fact> {
        self.facts
            .get(&handle)
            .ok_or_else(|| Error::invalid_handle(handle))
    }

    /// Returns true if the handle refers to a live fact.
    #[must_use]
    pub fn contains(&self, handle: FactHandle) -> bool {
        self.facts.contains_key(&handle)
    }

    /// Number of live facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Returns true if the store holds no facts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Iterates over all facts in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.values()
    }

    /// Iterates over the facts of one logical type in insertion order.
    pub fn of_type(&self, type_id: LogicalTypeId) -> impl Iterator<Item = &Fact> {
        self.by_type
            .get(&type_id)
            .into_iter()
            .flatten()
            .filter_map(|handle| self.facts.get(handle))
    }

    /// Number of live facts of one logical type.
    #[must_use]
    pub fn count_of_type(&self, type_id: LogicalTypeId) -> usize {
        self.by_type.get(&type_id).map_or(0, BTreeSet::len)
    }
}

fn type_of<'r>(registry: &'r TypeRegistry, fact: &Fact) -> Result<&'r LogicalType> {
    registry
        .get(fact.type_id())
        .ok_or_else(|| Error::internal(format!("fact {} has an unregistered type", fact.handle())))
}
