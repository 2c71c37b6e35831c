//! Logical types and field extractors.
//!
//! A logical type is a name plus an ordered list of named fields. Each field
//! owns a pure extraction function from the fact payload to a [`Value`].
//!
//! The registry is backed by persistent collections, so cloning it is O(1).
//! Sessions hold their own clone and only pay for a copy when they declare
//! a field of their own.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use reticle_foundation::{Error, Payload, Result, Value, ValueKind};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pure, thread-safe function reading one field value out of a payload.
pub type Extractor = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Value + Send + Sync>;

/// Index of a logical type within its registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogicalTypeId(u32);

impl LogicalTypeId {
    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a field within its logical type.
///
/// Field ids are stable: re-declaring a field keeps its id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldId(u32);

impl FieldId {
    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named, typed field of a logical type.
#[derive(Clone)]
pub struct FieldDescriptor {
    id: FieldId,
    name: Arc<str>,
    kind: ValueKind,
    extractor: Extractor,
}

impl FieldDescriptor {
    /// The field id.
    #[must_use]
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// The field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared value kind.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Reads this field from a payload.
    #[must_use]
    pub fn extract(&self, payload: &Payload) -> Value {
        (self.extractor)(payload.as_ref())
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A logical fact type.
#[derive(Clone, Debug)]
pub struct LogicalType {
    id: LogicalTypeId,
    name: Arc<str>,
    fields: Vec<FieldDescriptor>,
}

impl LogicalType {
    /// The type id.
    #[must_use]
    pub fn id(&self) -> LogicalTypeId {
        self.id
    }

    /// The type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All declared fields, in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    /// Looks up a field by id.
    #[must_use]
    pub fn field_by_id(&self, id: FieldId) -> Option<&FieldDescriptor> {
        self.fields.get(id.index())
    }

    /// Looks up a field by name, failing with `UnknownField`.
    ///
    /// # Errors
    /// Returns an error if no field has this name.
    pub fn require_field(&self, name: &str) -> Result<&FieldDescriptor> {
        self.field(name)
            .ok_or_else(|| Error::unknown_field(self.name(), name))
    }
}

/// Registry of logical types.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    names: im::HashMap<Arc<str>, LogicalTypeId>,
    types: im::Vector<Arc<LogicalType>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a logical type, or returns the id of an existing one.
    #[allow(clippy::cast_possible_truncation)]
    pub fn declare_type(&mut self, name: &str) -> LogicalTypeId {
        if let Some(id) = self.names.get(name) {
            return *id;
        }

        let id = LogicalTypeId(self.types.len() as u32);
        let name: Arc<str> = name.into();
        self.types.push_back(Arc::new(LogicalType {
            id,
            name: name.clone(),
            fields: Vec::new(),
        }));
        self.names.insert(name, id);
        id
    }

    /// Declares or overrides a field of an existing type.
    ///
    /// Re-declaring a field with the same kind replaces its extractor and
    /// keeps its id. Facts that already cached a value keep that value until
    /// they are updated.
    ///
    /// # Errors
    /// Returns `UnknownType` if the type is not declared, or `DuplicateField`
    /// if the field exists with a different kind.
    #[allow(clippy::cast_possible_truncation)]
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
        let type_id = self.id_of(type_name)?;
        let slot = self
            .types
            .get_mut(type_id.index())
            .ok_or_else(|| Error::internal(format!("type slot missing for {type_name}")))?;
        let ty = Arc::make_mut(slot);

        if let Some(existing) = ty.fields.iter_mut().find(|f| &*f.name == field) {
            if existing.kind != kind {
                return Err(Error::duplicate_field(type_name, field, existing.kind, kind));
            }
            existing.extractor = Arc::new(extractor);
            return Ok(existing.id);
        }

        let id = FieldId(ty.fields.len() as u32);
        ty.fields.push(FieldDescriptor {
            id,
            name: field.into(),
            kind,
            extractor: Arc::new(extractor),
        });
        Ok(id)
    }

    /// Declares a field with an extractor over a concrete payload type.
    ///
    /// Payloads of any other Rust type read as [`Value::Nil`].
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
        self.declare_field(type_name, field, kind, move |payload| {
            payload.downcast_ref::<T>().map_or(Value::Nil, &extractor)
        })
    }

    /// Returns the logical type with this name.
    ///
    /// # Errors
    /// Returns `UnknownType` if no such type is declared.
    pub fn resolve(&self, type_name: &str) -> Result<&LogicalType> {
        let id = self.id_of(type_name)?;
        self.get(id)
            .ok_or_else(|| Error::internal(format!("type slot missing for {type_name}")))
    }

    /// Returns the id of the type with this name.
    ///
    /// # Errors
    /// Returns `UnknownType` if no such type is declared.
    pub fn id_of(&self, type_name: &str) -> Result<LogicalTypeId> {
        self.names
            .get(type_name)
            .copied()
            .ok_or_else(|| Error::unknown_type(type_name))
    }

    /// Returns the type with this id.
    #[must_use]
    pub fn get(&self, id: LogicalTypeId) -> Option<&LogicalType> {
        self.types.get(id.index()).map(|ty| &**ty)
    }

    /// Number of declared types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no types are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterates over all types in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &LogicalType> {
        self.types.iter().map(|ty| &**ty)
    }
}
