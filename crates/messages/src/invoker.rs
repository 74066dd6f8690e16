//! Handler invokers: one handler bound to the message currently being processed.
//!
//! The dispatch machinery creates one invoker per handler that should see the
//! current message. Saga invokers additionally carry the saga instance the
//! coordinator found or created for them, and expose it in type-erased form
//! ([`SagaDocument`]) so infra never needs to know the concrete data type.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use sagabus_core::{
    IndexedProperty, PropertyTable, Revision, SagaData, SagaDocument, SagaId, SagaMetadata,
};

use crate::context::MessageContext;
use crate::correlation::CorrelationProperty;
use crate::message::{MessageType, TypedMessage};
use crate::saga::{Handles, Saga, SagaInstance, SagaType};

/// Errors raised by an invoker.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// User handler or conflict-resolution code failed.
    #[error("handler '{handler}' failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("saga data serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A saga operation was requested before any instance was bound.
    #[error("handler '{0}' has no saga data bound")]
    NoSagaData(String),

    #[error("saga data type mismatch: expected '{expected}', got '{actual}'")]
    WrongDataType { expected: String, actual: String },
}

/// One handler bound to the current message.
#[async_trait]
pub trait HandlerInvoker: Send + Sync {
    fn handler_name(&self) -> &str;

    fn has_saga(&self) -> bool;

    fn saga_type(&self) -> Option<&SagaType>;

    /// Whether `message_type` may start a new instance of this invoker's saga.
    fn can_be_initiated_by(&self, message_type: MessageType) -> bool;

    /// Bind a brand-new instance with a fresh id and the given correlation values.
    fn create_saga_data(&mut self, initial: &[IndexedProperty]) -> Result<SagaId, InvokeError>;

    /// Bind an existing (or, with `is_new`, a brand-new) instance.
    fn set_saga_data(&mut self, document: &SagaDocument, is_new: bool) -> Result<(), InvokeError>;

    /// The bound instance in type-erased form.
    fn saga_document(&self) -> Result<Option<SagaDocument>, InvokeError>;

    fn saga_id(&self) -> Option<SagaId>;

    /// Current values of `properties` on the bound instance, deduplicated by name.
    fn correlation_values(
        &self,
        properties: &[CorrelationProperty],
    ) -> Result<Vec<IndexedProperty>, InvokeError>;

    fn is_new(&self) -> bool;

    fn was_marked_as_complete(&self) -> bool;

    fn was_marked_as_unchanged(&self) -> bool;

    /// Prevent the handler from running for this message.
    fn skip_invocation(&mut self);

    fn is_skipped(&self) -> bool;

    fn resolves_conflicts(&self) -> bool;

    /// Record identity and revision assigned by storage after a successful write.
    fn set_metadata(&mut self, id: SagaId, revision: Revision);

    /// Merge the freshly persisted state into the bound instance and adopt its
    /// id and revision.
    async fn invoke_conflict_resolution(
        &mut self,
        fresh: &SagaDocument,
    ) -> Result<(), InvokeError>;

    async fn invoke(&mut self, ctx: &MessageContext) -> Result<(), InvokeError>;
}

/// Invoker for a saga handling message `M`.
pub struct SagaInvoker<S: Saga, M> {
    saga: Arc<S>,
    message: Arc<M>,
    saga_type: SagaType,
    table: PropertyTable<S::Data>,
    instance: Option<SagaInstance<S::Data>>,
    skipped: bool,
}

impl<S, M> SagaInvoker<S, M>
where
    S: Handles<M>,
    M: TypedMessage,
{
    pub fn new(saga: Arc<S>, message: Arc<M>) -> Self {
        Self {
            saga,
            message,
            saga_type: SagaType::of::<S>(),
            table: PropertyTable::<S::Data>::for_data(),
            instance: None,
            skipped: false,
        }
    }

    pub fn instance(&self) -> Option<&SagaInstance<S::Data>> {
        self.instance.as_ref()
    }

    fn check_data_type(&self, document: &SagaDocument) -> Result<(), InvokeError> {
        let expected = <S::Data as SagaData>::DATA_TYPE;
        if document.data_type != expected {
            return Err(InvokeError::WrongDataType {
                expected: expected.to_string(),
                actual: document.data_type.clone(),
            });
        }
        Ok(())
    }

    fn bound_mut(&mut self) -> Result<&mut SagaInstance<S::Data>, InvokeError> {
        self.instance
            .as_mut()
            .ok_or_else(|| InvokeError::NoSagaData(S::SAGA_TYPE.to_string()))
    }
}

#[async_trait]
impl<S, M> HandlerInvoker for SagaInvoker<S, M>
where
    S: Handles<M>,
    M: TypedMessage,
{
    fn handler_name(&self) -> &str {
        S::SAGA_TYPE
    }

    fn has_saga(&self) -> bool {
        true
    }

    fn saga_type(&self) -> Option<&SagaType> {
        Some(&self.saga_type)
    }

    fn can_be_initiated_by(&self, message_type: MessageType) -> bool {
        self.saga_type.is_initiated_by(message_type)
    }

    fn create_saga_data(&mut self, initial: &[IndexedProperty]) -> Result<SagaId, InvokeError> {
        let mut data = S::Data::default();
        *data.metadata_mut() = SagaMetadata::new(SagaId::new());

        for property in initial {
            let Some(accessor) = self.table.get(&property.name) else {
                continue;
            };
            if !accessor.set(&mut data, &property.value) {
                tracing::debug!(
                    saga_type = S::SAGA_TYPE,
                    property = %property.name,
                    value = %property.value,
                    "initial correlation value not assignable"
                );
            }
        }

        let id = data.id();
        self.instance = Some(SagaInstance::new(data, true));
        Ok(id)
    }

    fn set_saga_data(&mut self, document: &SagaDocument, is_new: bool) -> Result<(), InvokeError> {
        self.check_data_type(document)?;
        let data: S::Data = document.to_data()?;
        self.instance = Some(SagaInstance::new(data, is_new));
        Ok(())
    }

    fn saga_document(&self) -> Result<Option<SagaDocument>, InvokeError> {
        self.instance
            .as_ref()
            .map(|i| SagaDocument::from_data(i.data()))
            .transpose()
            .map_err(InvokeError::from)
    }

    fn saga_id(&self) -> Option<SagaId> {
        self.instance.as_ref().map(|i| i.data().id())
    }

    fn correlation_values(
        &self,
        properties: &[CorrelationProperty],
    ) -> Result<Vec<IndexedProperty>, InvokeError> {
        let instance = self
            .instance
            .as_ref()
            .ok_or_else(|| InvokeError::NoSagaData(S::SAGA_TYPE.to_string()))?;

        let mut seen = HashSet::new();
        let values = properties
            .iter()
            .filter(|p| p.saga_data_type() == <S::Data as SagaData>::DATA_TYPE)
            .filter(|p| seen.insert(p.property_name().to_string()))
            .filter_map(|p| self.table.get(p.property_name()))
            .map(|accessor| {
                IndexedProperty::new(accessor.path(), accessor.value(instance.data()))
            })
            .collect();
        Ok(values)
    }

    fn is_new(&self) -> bool {
        self.instance.as_ref().is_some_and(|i| i.is_new())
    }

    fn was_marked_as_complete(&self) -> bool {
        self.instance.as_ref().is_some_and(|i| i.is_completed())
    }

    fn was_marked_as_unchanged(&self) -> bool {
        self.instance.as_ref().is_some_and(|i| i.is_unchanged())
    }

    fn skip_invocation(&mut self) {
        self.skipped = true;
    }

    fn is_skipped(&self) -> bool {
        self.skipped
    }

    fn resolves_conflicts(&self) -> bool {
        S::RESOLVES_CONFLICTS
    }

    fn set_metadata(&mut self, id: SagaId, revision: Revision) {
        if let Some(instance) = self.instance.as_mut() {
            *instance.data.metadata_mut() = SagaMetadata { id, revision };
            instance.is_new = false;
        }
    }

    async fn invoke_conflict_resolution(
        &mut self,
        fresh: &SagaDocument,
    ) -> Result<(), InvokeError> {
        self.check_data_type(fresh)?;
        let fresh_data: S::Data = fresh.to_data()?;
        let saga = self.saga.clone();
        let instance = self.bound_mut()?;

        saga.resolve_conflict(&mut instance.data, &fresh_data)
            .await
            .map_err(|source| InvokeError::Handler {
                handler: S::SAGA_TYPE.to_string(),
                source,
            })?;

        *instance.data.metadata_mut() = SagaMetadata {
            id: fresh.id,
            revision: fresh.revision,
        };
        instance.is_new = false;
        Ok(())
    }

    async fn invoke(&mut self, ctx: &MessageContext) -> Result<(), InvokeError> {
        if self.skipped {
            return Ok(());
        }
        let saga = self.saga.clone();
        let message = self.message.clone();
        let instance = self.bound_mut()?;

        saga.handle(instance, &message, ctx)
            .await
            .map_err(|source| InvokeError::Handler {
                handler: S::SAGA_TYPE.to_string(),
                source,
            })
    }
}

/// Boxed future returned by plain handler functions.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

pub type HandlerFn<M> = Arc<dyn Fn(Arc<M>, MessageContext) -> HandlerFuture + Send + Sync>;

/// Invoker for a plain (non-saga) handler function.
pub struct HandlerFnInvoker<M> {
    name: String,
    message: Arc<M>,
    handler: HandlerFn<M>,
    skipped: bool,
}

impl<M: TypedMessage> HandlerFnInvoker<M> {
    pub fn new<F>(name: impl Into<String>, message: Arc<M>, handler: F) -> Self
    where
        F: Fn(Arc<M>, MessageContext) -> HandlerFuture + Send + Sync + 'static,
    {
        Self::from_shared(name, message, Arc::new(handler))
    }

    pub fn from_shared(name: impl Into<String>, message: Arc<M>, handler: HandlerFn<M>) -> Self {
        Self {
            name: name.into(),
            message,
            handler,
            skipped: false,
        }
    }

    fn no_saga(&self) -> InvokeError {
        InvokeError::NoSagaData(self.name.clone())
    }
}

#[async_trait]
impl<M: TypedMessage> HandlerInvoker for HandlerFnInvoker<M> {
    fn handler_name(&self) -> &str {
        &self.name
    }

    fn has_saga(&self) -> bool {
        false
    }

    fn saga_type(&self) -> Option<&SagaType> {
        None
    }

    fn can_be_initiated_by(&self, _message_type: MessageType) -> bool {
        false
    }

    fn create_saga_data(&mut self, _initial: &[IndexedProperty]) -> Result<SagaId, InvokeError> {
        Err(self.no_saga())
    }

    fn set_saga_data(&mut self, _document: &SagaDocument, _is_new: bool) -> Result<(), InvokeError> {
        Err(self.no_saga())
    }

    fn saga_document(&self) -> Result<Option<SagaDocument>, InvokeError> {
        Ok(None)
    }

    fn saga_id(&self) -> Option<SagaId> {
        None
    }

    fn correlation_values(
        &self,
        _properties: &[CorrelationProperty],
    ) -> Result<Vec<IndexedProperty>, InvokeError> {
        Err(self.no_saga())
    }

    fn is_new(&self) -> bool {
        false
    }

    fn was_marked_as_complete(&self) -> bool {
        false
    }

    fn was_marked_as_unchanged(&self) -> bool {
        false
    }

    fn skip_invocation(&mut self) {
        self.skipped = true;
    }

    fn is_skipped(&self) -> bool {
        self.skipped
    }

    fn resolves_conflicts(&self) -> bool {
        false
    }

    fn set_metadata(&mut self, _id: SagaId, _revision: Revision) {}

    async fn invoke_conflict_resolution(
        &mut self,
        _fresh: &SagaDocument,
    ) -> Result<(), InvokeError> {
        Err(self.no_saga())
    }

    async fn invoke(&mut self, ctx: &MessageContext) -> Result<(), InvokeError> {
        if self.skipped {
            return Ok(());
        }
        (self.handler)(self.message.clone(), ctx.clone())
            .await
            .map_err(|source| InvokeError::Handler {
                handler: self.name.clone(),
                source,
            })
    }
}
