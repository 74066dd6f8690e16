//! Bounded parallel message processing.
//!
//! Messages that correlate to the same saga instance are deliberately allowed
//! to run side by side; storage revisions and conflict resolution sort them out.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sagabus_messages::{Message, MessageContext};

use crate::config::SagaSettings;
use crate::error::SagaError;
use crate::pipeline::{IncomingContext, SagaPipeline};
use crate::registry::HandlerRegistry;

/// Runs submitted messages through the pipeline on the tokio runtime, at most
/// `max_parallelism` at a time.
#[derive(Debug)]
pub struct SagaWorkerPool {
    pipeline: Arc<SagaPipeline>,
    registry: Arc<HandlerRegistry>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl SagaWorkerPool {
    pub fn new(pipeline: SagaPipeline, registry: HandlerRegistry, settings: &SagaSettings) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            registry: Arc::new(registry),
            permits: Arc::new(Semaphore::new(settings.max_parallelism.max(1))),
            shutdown: CancellationToken::new(),
        }
    }

    /// Queue one message. Must be called from within a tokio runtime.
    pub fn submit(
        &self,
        message: Arc<dyn Message>,
        context: MessageContext,
    ) -> JoinHandle<Result<(), SagaError>> {
        let pipeline = self.pipeline.clone();
        let registry = self.registry.clone();
        let permits = self.permits.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let _permit = tokio::select! {
                permit = permits.acquire_owned() => permit.map_err(|_| SagaError::Shutdown)?,
                _ = shutdown.cancelled() => return Err(SagaError::Shutdown),
            };

            let invokers = registry.invokers_for(&message);
            let mut ctx = IncomingContext::new(message, context, invokers)
                .with_cancellation(shutdown.child_token());
            pipeline.process(&mut ctx).await
        })
    }

    /// Process a batch concurrently; results come back in submission order.
    pub async fn process_all(
        &self,
        batch: Vec<(Arc<dyn Message>, MessageContext)>,
    ) -> Vec<Result<(), SagaError>> {
        let handles: Vec<_> = batch
            .into_iter()
            .map(|(message, context)| self.submit(message, context))
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => {
                    warn!(error = %err, "saga worker task failed");
                    Err(SagaError::Worker(err.to_string()))
                }
            };
            results.push(result);
        }
        results
    }

    /// Stop accepting work. Messages waiting for a permit fail with
    /// [`SagaError::Shutdown`]; running ones see their cancellation token fire.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("saga worker pool shutting down");
        }
        self.shutdown.cancel();
        self.permits.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
