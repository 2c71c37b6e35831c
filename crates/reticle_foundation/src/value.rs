//! Field values extracted from fact payloads.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The opaque object stored for each fact.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// The declared kind of a field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ValueKind {
    /// `true` or `false`.
    Bool,
    /// Integers and floats.
    Numeric,
    /// Strings.
    String,
    /// Arbitrary objects, compared by identity.
    Object,
}

impl ValueKind {
    /// Returns true if a value of this kind may be stored in a field of `self` kind.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match value.kind() {
            None => true,
            Some(kind) => kind == self,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Numeric => write!(f, "numeric"),
            Self::String => write!(f, "string"),
            Self::Object => write!(f, "object"),
        }
    }
}

/// Reference to an arbitrary object.
///
/// Equality and hashing use pointer identity, never the pointee.
#[derive(Clone)]
pub struct ObjectRef(Payload);

impl ObjectRef {
    /// Wraps a payload.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self(payload)
    }

    /// Returns the wrapped payload.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.0
    }

    /// Attempts to view the object as a concrete type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast::<()>()
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.addr(), other.addr())
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.addr() as usize).hash(state);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({:p})", self.addr())
    }
}

/// A field value.
///
/// Values are cheap to clone: strings and objects are reference counted.
#[derive(Clone)]
pub enum Value {
    /// Absence of a value. Accepted by every field kind.
    Nil,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// String value.
    String(Arc<str>),
    /// Object reference.
    Object(ObjectRef),
}

impl Value {
    /// Wraps any shared object as an [`Value::Object`].
    #[must_use]
    pub fn object<T: Any + Send + Sync>(object: Arc<T>) -> Self {
        Self::Object(ObjectRef::new(object))
    }

    /// Wraps an already type-erased payload.
    #[must_use]
    pub fn from_payload(payload: Payload) -> Self {
        Self::Object(ObjectRef::new(payload))
    }

    /// Returns the kind of this value, or `None` for nil.
    #[must_use]
    pub const fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::Nil => None,
            Self::Bool(_) => Some(ValueKind::Bool),
            Self::Int(_) | Self::Float(_) => Some(ValueKind::Numeric),
            Self::String(_) => Some(ValueKind::String),
            Self::Object(_) => Some(ValueKind::Object),
        }
    }

    /// Returns true if this value is nil.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Returns true unless the value is `nil` or `false`.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    /// Attempts to extract a boolean value.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to extract an integer value.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to extract a number as f64 (converts int to float).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to extract a string reference.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to extract an object reference.
    #[must_use]
    pub const fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Equality with numeric promotion: `Int(1)` equals `Float(1.0)`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn loosely_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Float(a), Self::Float(b)) => a == b,
            _ => self == other,
        }
    }

    /// Orders two values.
    ///
    /// # Errors
    /// Returns a type mismatch error if the values cannot be ordered
    /// (different kinds, nil, objects, or NaN).
    pub fn compare(&self, other: &Self) -> Result<Ordering> {
        let ordering = match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        };
        ordering.ok_or_else(|| Error::incomparable(self, other))
    }
}

// Floats compare by bit pattern so that Value can be Eq and Hash
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Nil => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(n) => n.hash(state),
            Self::Float(n) => n.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::Object(o) => o.hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Object(o) => write!(f, "{o:?}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Nil, Into::into)
    }
}
