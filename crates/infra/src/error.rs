use thiserror::Error;

use sagabus_core::{ConfigError, SagaId};
use sagabus_messages::InvokeError;

use crate::lock::LockError;
use crate::storage::StorageError;

/// Error surfaced by the saga pipeline for one message.
///
/// Every kind is distinguishable so the outer redelivery layer can decide
/// whether to retry the message ([`SagaError::is_transient`]).
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("saga configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("saga storage error: {0}")]
    Storage(StorageError),

    /// Write conflict for a saga that does not resolve conflicts.
    #[error("concurrency conflict on saga {saga_id} ({saga_type}): {reason}")]
    Concurrency {
        saga_type: String,
        saga_id: SagaId,
        reason: String,
    },

    #[error("saga {saga_id} ({saga_type}) still conflicting after {attempts} attempts: {reason}")]
    ConflictRetriesExhausted {
        saga_type: String,
        saga_id: SagaId,
        attempts: u32,
        reason: String,
    },

    /// The instance disappeared while a conflict was being resolved.
    #[error("saga {saga_id} ({saga_type}) was deleted while resolving a conflict")]
    SagaVanished { saga_type: String, saga_id: SagaId },

    #[error("could not acquire exclusive access lock '{key}'")]
    LockTimeout { key: String },

    #[error("exclusive access lock failure: {0}")]
    Lock(#[from] LockError),

    #[error(transparent)]
    Handler(#[from] InvokeError),

    /// Raised by correlation error handlers that refuse to skip.
    #[error("no saga '{saga_type}' correlates with message '{message_type}'")]
    CorrelationFailed {
        saga_type: String,
        message_type: String,
    },

    #[error("saga worker pool is shut down")]
    Shutdown,

    /// A worker task panicked or was aborted.
    #[error("saga worker task failed: {0}")]
    Worker(String),
}

impl SagaError {
    /// Whether redelivering the same message may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::Concurrency { .. }
            | SagaError::ConflictRetriesExhausted { .. }
            | SagaError::LockTimeout { .. } => true,
            SagaError::Storage(e) => !matches!(e, StorageError::Serialization(_)),
            _ => false,
        }
    }
}

impl From<StorageError> for SagaError {
    fn from(value: StorageError) -> Self {
        SagaError::Storage(value)
    }
}
