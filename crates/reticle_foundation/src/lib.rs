//! Core values, fact handles, and errors for Reticle.
//!
//! This crate provides:
//! - [`Value`] - Field values extracted from fact payloads
//! - [`ValueKind`] - The declared kind of a field
//! - [`FactHandle`] - Process-unique fact identifiers
//! - [`Payload`] - The opaque object stored for each fact
//! - [`Error`] - Rich error types with context

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod handle;
pub mod value;

pub use error::{Error, ErrorContext, ErrorKind};
pub use handle::FactHandle;
pub use value::{ObjectRef, Payload, Value, ValueKind};

/// Result type alias using the Reticle error type.
pub type Result<T> = std::result::Result<T, Error>;
