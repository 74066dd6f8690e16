//! Incoming message pipeline.
//!
//! ```text
//! message + invokers
//!   ↓
//! SagaCoordinator   (bind instances, lock, persist afterwards)
//!   ↓
//! DispatchStep      (run every non-skipped handler, in order)
//! ```
//!
//! Steps wrap the rest of the chain: a step does its pre-work, calls
//! [`Next::run`], then does its post-work once downstream returns.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use sagabus_messages::{HandlerInvoker, Message, MessageContext};

use crate::coordinator::SagaCoordinator;
use crate::error::SagaError;

/// Everything one message carries through the pipeline.
pub struct IncomingContext {
    pub context: MessageContext,
    pub message: Arc<dyn Message>,
    pub invokers: Vec<Box<dyn HandlerInvoker>>,
    pub cancellation: CancellationToken,
}

impl IncomingContext {
    pub fn new(
        message: Arc<dyn Message>,
        context: MessageContext,
        invokers: Vec<Box<dyn HandlerInvoker>>,
    ) -> Self {
        Self {
            context,
            message,
            invokers,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

impl core::fmt::Debug for IncomingContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let handlers: Vec<&str> = self.invokers.iter().map(|i| i.handler_name()).collect();
        f.debug_struct("IncomingContext")
            .field("message_id", &self.context.message_id())
            .field("message_type", &self.message.message_type())
            .field("handlers", &handlers)
            .finish()
    }
}

/// One stage of incoming message processing.
#[async_trait]
pub trait IncomingStep: Send + Sync {
    async fn process(&self, ctx: &mut IncomingContext, next: Next<'_>) -> Result<(), SagaError>;
}

/// The remainder of the pipeline after the current step.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    steps: &'a [Arc<dyn IncomingStep>],
}

impl<'a> Next<'a> {
    pub fn new(steps: &'a [Arc<dyn IncomingStep>]) -> Self {
        Self { steps }
    }

    pub async fn run(self, ctx: &mut IncomingContext) -> Result<(), SagaError> {
        match self.steps.split_first() {
            Some((step, rest)) => step.process(ctx, Next { steps: rest }).await,
            None => Ok(()),
        }
    }
}

/// Invokes every handler that was not skipped during correlation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchStep;

#[async_trait]
impl IncomingStep for DispatchStep {
    async fn process(&self, ctx: &mut IncomingContext, next: Next<'_>) -> Result<(), SagaError> {
        for invoker in ctx.invokers.iter_mut() {
            if invoker.is_skipped() {
                trace!(handler = invoker.handler_name(), "handler skipped");
                continue;
            }
            invoker.invoke(&ctx.context).await?;
        }
        next.run(ctx).await
    }
}

/// Ordered chain of incoming steps.
#[derive(Clone)]
pub struct SagaPipeline {
    steps: Vec<Arc<dyn IncomingStep>>,
}

impl SagaPipeline {
    pub fn new(steps: Vec<Arc<dyn IncomingStep>>) -> Self {
        Self { steps }
    }

    /// Coordinator followed by dispatch.
    pub fn standard(coordinator: SagaCoordinator) -> Self {
        Self::new(vec![Arc::new(coordinator), Arc::new(DispatchStep)])
    }

    pub async fn process(&self, ctx: &mut IncomingContext) -> Result<(), SagaError> {
        let result = Next::new(&self.steps).run(ctx).await;
        if let Err(err) = &result {
            debug!(
                message_id = %ctx.context.message_id(),
                message_type = %ctx.message.message_type(),
                error = %err,
                "message processing failed"
            );
        }
        result
    }
}

impl core::fmt::Debug for SagaPipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SagaPipeline")
            .field("steps", &self.steps.len())
            .finish()
    }
}
