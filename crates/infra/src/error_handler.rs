//! What happens when a message finds no saga instance and may not start one.

use async_trait::async_trait;

use sagabus_messages::{CorrelationProperty, HandlerInvoker, Message};

use crate::error::SagaError;

/// Pluggable reaction to a correlation miss.
///
/// Returning `Ok` lets processing continue; implementations are expected to
/// skip the invoker unless they bound an instance themselves. Returning an
/// error fails the whole message.
#[async_trait]
pub trait CorrelationErrorHandler: Send + Sync {
    async fn handle_correlation_error(
        &self,
        properties: &[CorrelationProperty],
        invoker: &mut dyn HandlerInvoker,
        message: &dyn Message,
    ) -> Result<(), SagaError>;
}

/// Default: log at debug and skip the handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAndSkip;

#[async_trait]
impl CorrelationErrorHandler for LogAndSkip {
    async fn handle_correlation_error(
        &self,
        properties: &[CorrelationProperty],
        invoker: &mut dyn HandlerInvoker,
        message: &dyn Message,
    ) -> Result<(), SagaError> {
        let tried: Vec<&str> = properties.iter().map(|p| p.property_name()).collect();
        tracing::debug!(
            handler = invoker.handler_name(),
            message_type = %message.message_type(),
            properties = ?tried,
            "no saga instance correlates and message may not initiate one; skipping handler"
        );
        invoker.skip_invocation();
        Ok(())
    }
}

/// Fail the message instead of skipping, handing it to outer redelivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailOnMissingSaga;

#[async_trait]
impl CorrelationErrorHandler for FailOnMissingSaga {
    async fn handle_correlation_error(
        &self,
        _properties: &[CorrelationProperty],
        invoker: &mut dyn HandlerInvoker,
        message: &dyn Message,
    ) -> Result<(), SagaError> {
        let saga_type = invoker
            .saga_type()
            .map(|t| t.name())
            .unwrap_or_else(|| invoker.handler_name());
        Err(SagaError::CorrelationFailed {
            saga_type: saga_type.to_string(),
            message_type: message.message_type().to_string(),
        })
    }
}
