//! Saga storage boundary.
//!
//! Backends persist type-erased saga documents, keep their own lookup index of
//! correlation values, and enforce the revision precondition on every write.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemorySagaStorage;
pub use r#trait::{SagaStorage, StorageError};
