//! Optimistic concurrency with conflict resolution.
//!
//! Every insert and update of a saga instance goes through
//! [`ConflictController::persist`]:
//!
//! ```text
//! write (insert | update)
//!   ├─ ok ──────────────────────────────────────────────► done
//!   └─ conflict
//!        ├─ saga does not resolve conflicts ────────────► Concurrency
//!        ├─ attempts exhausted ─────────────────────────► ConflictRetriesExhausted
//!        └─ re-fetch latest state
//!             ├─ gone ──────────────────────────────────► SagaVanished
//!             └─ resolve_conflict(fresh), adopt revision
//!                  └─ retry as update
//! ```
//!
//! An insert that conflicts with a concurrently created instance (same
//! correlation value, different id) is looked up through the instance's own
//! correlation values, so concurrent initiators converge on one instance.

use tracing::{error, info, warn};

use sagabus_core::{CorrelationValue, ID_PROPERTY, IndexedProperty, SagaDocument};
use sagabus_messages::{CorrelationProperty, HandlerInvoker, InvokeError};

use crate::error::SagaError;
use crate::stats::SagaStats;
use crate::storage::{SagaStorage, StorageError};

/// Which storage write the controller starts with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteMode {
    Insert,
    Update,
}

/// Bounded optimistic retry loop around saga writes.
pub struct ConflictController<'a> {
    storage: &'a dyn SagaStorage,
    stats: &'a SagaStats,
    max_attempts: u32,
}

impl<'a> ConflictController<'a> {
    pub fn new(storage: &'a dyn SagaStorage, stats: &'a SagaStats, max_attempts: u32) -> Self {
        Self {
            storage,
            stats,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Write the instance bound to `invoker`, resolving conflicts if the saga allows it.
    ///
    /// On success the invoker carries the id and revision assigned by storage.
    pub async fn persist(
        &self,
        invoker: &mut dyn HandlerInvoker,
        properties: &[CorrelationProperty],
        mode: WriteMode,
    ) -> Result<(), SagaError> {
        let saga_type = saga_type_name(invoker);
        let mut mode = mode;
        let mut attempt: u32 = 1;

        loop {
            let mut document = bound_document(invoker)?;
            let values = invoker.correlation_values(properties)?;

            let written = match mode {
                WriteMode::Insert => self.storage.insert(&mut document, &values).await,
                WriteMode::Update => self.storage.update(&mut document, &values).await,
            };

            let reason = match written {
                Ok(()) => {
                    invoker.set_metadata(document.id, document.revision);
                    match mode {
                        WriteMode::Insert => self.stats.record_inserted(),
                        WriteMode::Update => self.stats.record_updated(),
                    }
                    return Ok(());
                }
                Err(StorageError::Conflict(reason)) => reason,
                Err(other) => return Err(other.into()),
            };

            self.stats.record_conflict();
            warn!(
                saga_type = %saga_type,
                saga_id = %document.id,
                revision = %document.revision,
                attempt,
                reason = %reason,
                "saga write conflict"
            );

            if !invoker.resolves_conflicts() {
                return Err(SagaError::Concurrency {
                    saga_type,
                    saga_id: document.id,
                    reason,
                });
            }

            if attempt >= self.max_attempts {
                error!(
                    saga_type = %saga_type,
                    saga_id = %document.id,
                    attempts = attempt,
                    "saga write conflicts exhausted retries"
                );
                return Err(SagaError::ConflictRetriesExhausted {
                    saga_type,
                    saga_id: document.id,
                    attempts: attempt,
                    reason,
                });
            }

            let Some(fresh) = self.fetch_fresh(&document, &values, mode).await? else {
                error!(
                    saga_type = %saga_type,
                    saga_id = %document.id,
                    "saga instance vanished while resolving conflict"
                );
                return Err(SagaError::SagaVanished {
                    saga_type,
                    saga_id: document.id,
                });
            };

            invoker.invoke_conflict_resolution(&fresh).await?;
            self.stats.record_conflict_resolved();
            info!(
                saga_type = %saga_type,
                saga_id = %fresh.id,
                revision = %fresh.revision,
                attempt,
                "saga write conflict resolved; retrying as update"
            );

            mode = WriteMode::Update;
            attempt += 1;
        }
    }

    /// Delete the instance bound to `invoker`. Delete conflicts are not retried.
    pub async fn delete(&self, invoker: &dyn HandlerInvoker) -> Result<(), SagaError> {
        let document = bound_document(invoker)?;
        match self.storage.delete(&document).await {
            Ok(()) => {
                self.stats.record_deleted();
                Ok(())
            }
            Err(StorageError::Conflict(reason)) => {
                let saga_type = saga_type_name(invoker);
                self.stats.record_conflict();
                warn!(
                    saga_type = %saga_type,
                    saga_id = %document.id,
                    reason = %reason,
                    "saga delete conflict"
                );
                Err(SagaError::Concurrency {
                    saga_type,
                    saga_id: document.id,
                    reason,
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn fetch_fresh(
        &self,
        document: &SagaDocument,
        values: &[IndexedProperty],
        mode: WriteMode,
    ) -> Result<Option<SagaDocument>, SagaError> {
        let by_id = self
            .storage
            .find(
                &document.data_type,
                ID_PROPERTY,
                &CorrelationValue::Uuid(*document.id.as_uuid()),
            )
            .await?;
        if by_id.is_some() || mode == WriteMode::Update {
            return Ok(by_id);
        }

        // Insert lost against another instance holding one of our correlation values.
        for value in values.iter().filter(|v| v.name != ID_PROPERTY && !v.value.is_unset()) {
            if let Some(winner) = self
                .storage
                .find(&document.data_type, &value.name, &value.value)
                .await?
            {
                return Ok(Some(winner));
            }
        }
        Ok(None)
    }
}

fn bound_document(invoker: &dyn HandlerInvoker) -> Result<SagaDocument, SagaError> {
    invoker
        .saga_document()?
        .ok_or_else(|| InvokeError::NoSagaData(invoker.handler_name().to_string()).into())
}

fn saga_type_name(invoker: &dyn HandlerInvoker) -> String {
    invoker
        .saga_type()
        .map(|t| t.name())
        .unwrap_or_else(|| invoker.handler_name())
        .to_string()
}
