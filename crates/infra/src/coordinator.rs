//! Saga instance lifecycle.
//!
//! ```text
//! IncomingContext
//!   ↓
//! 1. Resolve correlation rules for every saga invoker
//!   ↓
//! 2. Acquire exclusive access locks (optional, sorted keys)
//!   ↓
//! 3. Bind: load by correlation value | create if initiator | error handler
//!   ↓
//! 4. Run the rest of the pipeline (handlers)
//!   ↓
//! 5. Persist: inserts, then updates, then deletes (conflict controlled)
//!   ↓
//! 6. Release locks in reverse order (also on failure)
//! ```
//!
//! Several messages correlating to the same instance may run at once on
//! different workers. Storage revisions keep every write honest; locks only
//! reduce how often writers collide.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sagabus_core::{IndexedProperty, SagaId};
use sagabus_messages::{CorrelationProperty, HandlerInvoker};

use crate::concurrency::{ConflictController, WriteMode};
use crate::config::SagaSettings;
use crate::error::SagaError;
use crate::error_handler::{CorrelationErrorHandler, LogAndSkip};
use crate::lock::{ExclusiveAccessLock, lock_key, normalize_keys};
use crate::pipeline::{IncomingContext, IncomingStep, Next};
use crate::resolver::CorrelationResolver;
use crate::stats::SagaStats;
use crate::storage::SagaStorage;

/// Correlation rules resolved for one saga invoker of the current message.
#[derive(Debug)]
struct Binding {
    index: usize,
    /// Rules for this message, used for lookup and lock keys.
    properties: Vec<CorrelationProperty>,
    /// Every path of the saga data type, handed to storage for its index.
    indexed: Vec<CorrelationProperty>,
}

/// One saga instance touched by the current message.
#[derive(Debug)]
struct Touched {
    saga_id: SagaId,
    members: Vec<usize>,
    properties: Vec<CorrelationProperty>,
}

#[derive(Debug, Default)]
struct WritePlan {
    inserts: Vec<(usize, Vec<CorrelationProperty>)>,
    updates: Vec<(usize, Vec<CorrelationProperty>)>,
    deletes: Vec<usize>,
}

/// Pipeline step that finds, creates and persists saga instances.
#[derive(Clone)]
pub struct SagaCoordinator {
    storage: Arc<dyn SagaStorage>,
    resolver: Arc<CorrelationResolver>,
    error_handler: Arc<dyn CorrelationErrorHandler>,
    lock: Option<Arc<dyn ExclusiveAccessLock>>,
    settings: SagaSettings,
    stats: Arc<SagaStats>,
}

impl SagaCoordinator {
    pub fn new(storage: Arc<dyn SagaStorage>, resolver: Arc<CorrelationResolver>) -> Self {
        Self {
            storage,
            resolver,
            error_handler: Arc::new(LogAndSkip),
            lock: None,
            settings: SagaSettings::default(),
            stats: Arc::new(SagaStats::default()),
        }
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn CorrelationErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn with_lock(mut self, lock: Arc<dyn ExclusiveAccessLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn with_settings(mut self, settings: SagaSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_stats(mut self, stats: Arc<SagaStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<SagaStats> {
        &self.stats
    }

    fn bindings(&self, ctx: &IncomingContext) -> Result<Vec<Binding>, SagaError> {
        let mut bindings = Vec::new();
        for (index, invoker) in ctx.invokers.iter().enumerate() {
            if !invoker.has_saga() {
                continue;
            }
            let Some(saga_type) = invoker.saga_type() else {
                continue;
            };
            let rules = self.resolver.get(saga_type)?;
            let properties = rules.for_message(ctx.message.as_ref())?;
            bindings.push(Binding {
                index,
                properties,
                indexed: rules.indexed(),
            });
        }
        Ok(bindings)
    }

    fn lock_keys(&self, ctx: &IncomingContext, bindings: &[Binding]) -> Vec<String> {
        if self.lock.is_none() {
            return Vec::new();
        }
        let keys = bindings
            .iter()
            .flat_map(|b| b.properties.iter())
            .filter_map(|p| {
                let value = p.value_from(&ctx.context, ctx.message.as_ref())?;
                Some(lock_key(
                    p.saga_data_type(),
                    p.property_name(),
                    &value,
                    self.settings.lock_buckets,
                ))
            })
            .collect();
        normalize_keys(keys)
    }

    async fn acquire_locks(
        &self,
        keys: Vec<String>,
        cancellation: &CancellationToken,
    ) -> Result<Vec<String>, SagaError> {
        let Some(lock) = &self.lock else {
            return Ok(Vec::new());
        };

        let mut held = Vec::with_capacity(keys.len());
        for key in keys {
            match lock.acquire(&key, cancellation).await {
                Ok(true) => held.push(key),
                Ok(false) => {
                    warn!(key = %key, "exclusive access lock not acquired");
                    self.release_locks(&held).await;
                    return Err(SagaError::LockTimeout { key });
                }
                Err(err) => {
                    self.release_locks(&held).await;
                    return Err(err.into());
                }
            }
        }
        Ok(held)
    }

    async fn release_locks(&self, held: &[String]) {
        let Some(lock) = &self.lock else {
            return;
        };
        for key in held.iter().rev() {
            match lock.release(key).await {
                Ok(true) => {}
                Ok(false) => warn!(key = %key, "released exclusive access lock was not held"),
                Err(err) => warn!(key = %key, error = %err, "exclusive access lock release failed"),
            }
        }
    }

    async fn run_locked(
        &self,
        ctx: &mut IncomingContext,
        bindings: &[Binding],
        next: Next<'_>,
    ) -> Result<(), SagaError> {
        for binding in bindings {
            self.bind(ctx, binding).await?;
        }
        next.run(ctx).await?;
        self.persist(ctx, bindings).await
    }

    /// Load, create, or hand off to the error handler. Never short-circuits
    /// other invokers unless the error handler fails.
    async fn bind(&self, ctx: &mut IncomingContext, binding: &Binding) -> Result<(), SagaError> {
        let message = ctx.message.as_ref();
        let context = &ctx.context;
        let invoker = &mut ctx.invokers[binding.index];

        let mut extracted = Vec::new();
        for property in &binding.properties {
            let Some(value) = property.value_from(context, message) else {
                continue;
            };
            let found = self
                .storage
                .find(property.saga_data_type(), property.property_name(), &value)
                .await?;
            if let Some(document) = found {
                invoker.set_saga_data(&document, false)?;
                self.stats.record_loaded();
                debug!(
                    saga_type = property.saga_type(),
                    saga_id = %document.id,
                    revision = %document.revision,
                    property = property.property_name(),
                    "saga instance loaded"
                );
                return Ok(());
            }
            extracted.push(IndexedProperty::new(property.property_name(), value));
        }

        if message
            .type_hierarchy()
            .any(|t| invoker.can_be_initiated_by(t))
        {
            let saga_id = invoker.create_saga_data(&extracted)?;
            self.stats.record_created();
            debug!(
                saga_type = invoker.saga_type().map(|t| t.name()).unwrap_or_default(),
                saga_id = %saga_id,
                message_type = %message.message_type(),
                "saga instance created"
            );
            return Ok(());
        }

        self.stats.record_correlation_miss();
        self.error_handler
            .handle_correlation_error(&binding.properties, &mut **invoker, message)
            .await
    }

    fn plan(&self, invokers: &[Box<dyn HandlerInvoker>], bindings: &[Binding]) -> WritePlan {
        let mut touched: Vec<Touched> = Vec::new();
        for binding in bindings {
            let invoker = &invokers[binding.index];
            if invoker.is_skipped() {
                continue;
            }
            let Some(saga_id) = invoker.saga_id() else {
                continue;
            };

            let entry = match touched.iter().position(|t| t.saga_id == saga_id) {
                Some(pos) => &mut touched[pos],
                None => {
                    touched.push(Touched {
                        saga_id,
                        members: Vec::new(),
                        properties: Vec::new(),
                    });
                    let last = touched.len() - 1;
                    &mut touched[last]
                }
            };
            entry.members.push(binding.index);
            for property in &binding.indexed {
                let seen = entry
                    .properties
                    .iter()
                    .any(|p| p.property_name() == property.property_name());
                if !seen {
                    entry.properties.push(property.clone());
                }
            }
        }

        let mut plan = WritePlan::default();
        for instance in touched {
            let completed = instance
                .members
                .iter()
                .copied()
                .find(|&i| invokers[i].was_marked_as_complete());

            if let Some(index) = completed {
                if invokers[index].is_new() {
                    debug!(saga_id = %instance.saga_id, "new saga instance completed; discarded");
                } else {
                    plan.deletes.push(index);
                }
                continue;
            }

            // Every changed copy is written, in handler order; copies after the
            // first meet the revision check and go through conflict resolution.
            let writers: Vec<usize> = instance
                .members
                .iter()
                .copied()
                .filter(|&i| !invokers[i].was_marked_as_unchanged())
                .collect();

            if writers.is_empty() {
                self.stats.record_unchanged();
                debug!(saga_id = %instance.saga_id, "saga instance unchanged; not written");
                continue;
            }
            if writers.len() > 1 {
                debug!(
                    saga_id = %instance.saga_id,
                    writers = writers.len(),
                    "saga instance changed by several handlers; writing each"
                );
            }
            for index in writers {
                let write = (index, instance.properties.clone());
                if invokers[index].is_new() {
                    plan.inserts.push(write);
                } else {
                    plan.updates.push(write);
                }
            }
        }
        plan
    }

    async fn persist(&self, ctx: &mut IncomingContext, bindings: &[Binding]) -> Result<(), SagaError> {
        let plan = self.plan(&ctx.invokers, bindings);
        let controller = ConflictController::new(
            self.storage.as_ref(),
            &self.stats,
            self.settings.max_conflict_attempts,
        );

        for (index, properties) in &plan.inserts {
            controller
                .persist(&mut *ctx.invokers[*index], properties, WriteMode::Insert)
                .await?;
        }
        for (index, properties) in &plan.updates {
            controller
                .persist(&mut *ctx.invokers[*index], properties, WriteMode::Update)
                .await?;
        }
        for index in &plan.deletes {
            controller.delete(&*ctx.invokers[*index]).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl IncomingStep for SagaCoordinator {
    async fn process(&self, ctx: &mut IncomingContext, next: Next<'_>) -> Result<(), SagaError> {
        let bindings = self.bindings(ctx)?;
        if bindings.is_empty() {
            return next.run(ctx).await;
        }

        let keys = self.lock_keys(ctx, &bindings);
        let held = self.acquire_locks(keys, &ctx.cancellation).await?;
        let result = self.run_locked(ctx, &bindings, next).await;
        self.release_locks(&held).await;
        result
    }
}
