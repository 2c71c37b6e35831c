//! Stored facts and their cached field values.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use reticle_foundation::{FactHandle, Payload, Value};

use crate::registry::{FieldDescriptor, FieldId, LogicalType, LogicalTypeId};

/// The set of fields whose value differs after an update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangedFields {
    fields: Vec<FieldId>,
    identity: bool,
}

impl ChangedFields {
    /// A change set touching nothing.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns true if neither a field nor the payload identity changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && !self.identity
    }

    /// Returns true if the payload object itself was swapped.
    #[must_use]
    pub fn identity_changed(&self) -> bool {
        self.identity
    }

    /// Returns true if this field changed.
    #[must_use]
    pub fn contains(&self, field: FieldId) -> bool {
        self.fields.contains(&field)
    }

    /// Returns true if any of `fields` changed, or `identity` is requested and the payload changed.
    #[must_use]
    pub fn touches(&self, fields: &[FieldId], identity: bool) -> bool {
        (identity && self.identity) || fields.iter().any(|f| self.contains(*f))
    }

    /// The changed fields, in field order.
    #[must_use]
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }
}

/// A fact owned by the [`FactStore`](crate::FactStore).
///
/// Field values are extracted on first read and cached until the fact is
/// updated. Reads go through a [`OnceLock`], so a fact can be read from
/// several matching threads at once.
#[derive(Debug)]
pub struct Fact {
    handle: FactHandle,
    type_id: LogicalTypeId,
    payload: Payload,
    values: Vec<OnceLock<Value>>,
}

impl Fact {
    pub(crate) fn new(handle: FactHandle, ty: &LogicalType, payload: Payload) -> Self {
        Self {
            handle,
            type_id: ty.id(),
            payload,
            values: empty_slots(ty.fields().len()),
        }
    }

    /// The fact handle.
    #[must_use]
    pub fn handle(&self) -> FactHandle {
        self.handle
    }

    /// The logical type of this fact.
    #[must_use]
    pub fn type_id(&self) -> LogicalTypeId {
        self.type_id
    }

    /// The payload object.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The payload as a concrete type, if it is one.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.payload.clone().downcast::<T>().ok()
    }

    /// The payload wrapped as an object value, used for identity comparisons.
    #[must_use]
    pub fn identity(&self) -> Value {
        Value::from_payload(self.payload.clone())
    }

    /// Reads a field value, extracting and caching it on first access.
    ///
    /// Fields declared after the fact was stored are extracted on every read
    /// until the next update gives them a cache slot.
    #[must_use]
    pub fn value(&self, field: &FieldDescriptor) -> Value {
        match self.values.get(field.id().index()) {
            Some(slot) => slot.get_or_init(|| field.extract(&self.payload)).clone(),
            None => field.extract(&self.payload),
        }
    }

    /// Returns the cached value of a field without extracting it.
    #[must_use]
    pub fn cached(&self, field: FieldId) -> Option<&Value> {
        self.values.get(field.index()).and_then(OnceLock::get)
    }

    /// Re-reads every cached field and reports the ones that changed.
    ///
    /// Fields never read before stay unread: nothing can depend on them yet.
    pub(crate) fn refresh(&mut self, ty: &LogicalType) -> ChangedFields {
        let mut changed = ChangedFields::none();
        let fresh = empty_slots(ty.fields().len().max(self.values.len()));

        for (index, slot) in self.values.iter().enumerate() {
            let Some(previous) = slot.get() else {
                continue;
            };
            let Some(field) = ty.fields().get(index) else {
                continue;
            };
            let current = field.extract(&self.payload);
            if &current != previous {
                changed.fields.push(field.id());
            }
            let _ = fresh[index].set(current);
        }

        self.values = fresh;
        changed
    }

    /// Swaps the payload, then refreshes cached values against the new object.
    pub(crate) fn replace(&mut self, ty: &LogicalType, payload: Payload) -> ChangedFields {
        let same = Arc::ptr_eq(&self.payload, &payload);
        self.payload = payload;
        let mut changed = self.refresh(ty);
        changed.identity = !same;
        changed
    }
}

fn empty_slots(len: usize) -> Vec<OnceLock<Value>> {
    (0..len).map(|_| OnceLock::new()).collect()
}
