//! Type registry and working memory for Reticle.
//!
//! This crate provides:
//! - [`TypeRegistry`] - Logical types and their named field extractors
//! - [`Fact`] - A stored fact with lazily cached field values
//! - [`FactStore`] - The working memory owning every inserted fact

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod fact;
pub mod registry;
pub mod store;

pub use fact::{ChangedFields, Fact};
pub use registry::{Extractor, FieldDescriptor, FieldId, LogicalType, LogicalTypeId, TypeRegistry};
pub use store::FactStore;
