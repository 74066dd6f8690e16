//! `sagabus-core`: saga data model building blocks.
//!
//! This crate contains **pure** primitives (no IO): identifiers, revisions,
//! correlatable scalar values, and the typed property table saga data types
//! use to expose their correlation paths.

pub mod data;
pub mod error;
pub mod id;
pub mod revision;
pub mod value;

pub use data::{
    ID_PROPERTY, IndexedProperty, PropertyAccessor, PropertyTable, SagaData, SagaDocument,
    SagaMetadata,
};
pub use error::{ConfigError, ConfigResult};
pub use id::{MessageId, SagaId};
pub use revision::Revision;
pub use value::{CorrelationScalar, CorrelationValue, IntoCorrelationValue, ScalarKind};
