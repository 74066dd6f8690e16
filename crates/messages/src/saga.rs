//! Saga author surface.
//!
//! A saga is a long-lived handler whose state ([`SagaData`]) survives across
//! messages. Implementors define:
//! - the saga data type and a stable saga type name
//! - which message types may start a new instance
//! - how incoming messages correlate to instances (see [`Correlator`])
//! - how to handle each message type (one [`Handles`] impl per type)
//! - optionally, how to merge a stale in-memory instance with the latest
//!   persisted state after a write conflict
//!
//! Infra is responsible for finding or creating instances, running handlers
//! and persisting the outcome.

use async_trait::async_trait;

use sagabus_core::{ConfigResult, SagaData};

use crate::context::MessageContext;
use crate::correlation::{Correlator, SagaDataCorrelationProperties};
use crate::message::{MessageType, TypedMessage};

/// Saga contract (mechanics only).
#[async_trait]
pub trait Saga: Send + Sync + 'static {
    type Data: SagaData;

    /// Stable saga type identifier (e.g. "saga.order_fulfilment").
    const SAGA_TYPE: &'static str;

    /// Message types allowed to create a new instance when none correlates.
    const INITIATED_BY: &'static [MessageType];

    /// Set to `true` when [`Saga::resolve_conflict`] is implemented.
    ///
    /// Without it a write conflict fails the message immediately.
    const RESOLVES_CONFLICTS: bool = false;

    /// Declare correlation rules. Called once per process.
    fn correlate(correlator: &mut Correlator<Self::Data>) -> ConfigResult<()>;

    /// Merge `fresh` (the latest persisted state) into `data` (the in-memory
    /// instance that already ran the handler) after a write conflict.
    ///
    /// The runtime copies the fresh revision onto `data` afterwards.
    async fn resolve_conflict(
        &self,
        _data: &mut Self::Data,
        _fresh: &Self::Data,
    ) -> anyhow::Result<()> {
        anyhow::bail!("saga '{}' does not resolve conflicts", Self::SAGA_TYPE)
    }
}

/// Handle one message type within a saga.
#[async_trait]
pub trait Handles<M: TypedMessage>: Saga {
    async fn handle(
        &self,
        saga: &mut SagaInstance<Self::Data>,
        message: &M,
        ctx: &MessageContext,
    ) -> anyhow::Result<()>;
}

/// One saga instance as seen by a handler.
///
/// Handlers mutate the data and signal persistence intent through
/// [`mark_as_complete`](Self::mark_as_complete) and
/// [`mark_as_unchanged`](Self::mark_as_unchanged).
#[derive(Debug, Clone)]
pub struct SagaInstance<D> {
    pub(crate) data: D,
    pub(crate) is_new: bool,
    completed: bool,
    unchanged: bool,
}

impl<D> SagaInstance<D> {
    pub fn new(data: D, is_new: bool) -> Self {
        Self {
            data,
            is_new,
            completed: false,
            unchanged: false,
        }
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    pub fn into_data(self) -> D {
        self.data
    }

    /// Whether the instance was created for the current message.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Delete the instance after the message has been handled.
    pub fn mark_as_complete(&mut self) {
        self.completed = true;
    }

    /// Skip every storage write for this instance, whatever was mutated.
    pub fn mark_as_unchanged(&mut self) {
        self.unchanged = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_unchanged(&self) -> bool {
        self.unchanged
    }
}

impl<D> core::ops::Deref for SagaInstance<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.data
    }
}

impl<D> core::ops::DerefMut for SagaInstance<D> {
    fn deref_mut(&mut self) -> &mut D {
        &mut self.data
    }
}

/// Runtime descriptor of a saga type, used as the correlation cache key.
#[derive(Clone, Copy)]
pub struct SagaType {
    name: &'static str,
    data_type: &'static str,
    initiated_by: &'static [MessageType],
    build: fn() -> ConfigResult<SagaDataCorrelationProperties>,
}

impl core::fmt::Debug for SagaType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SagaType")
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .field("initiated_by", &self.initiated_by)
            .finish()
    }
}

impl SagaType {
    pub fn of<S: Saga>() -> Self {
        Self {
            name: S::SAGA_TYPE,
            data_type: <S::Data as SagaData>::DATA_TYPE,
            initiated_by: S::INITIATED_BY,
            build: build_properties::<S>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn data_type(&self) -> &'static str {
        self.data_type
    }

    pub fn is_initiated_by(&self, message_type: MessageType) -> bool {
        self.initiated_by.contains(&message_type)
    }

    /// Run the saga's correlation declaration.
    pub fn build_properties(&self) -> ConfigResult<SagaDataCorrelationProperties> {
        (self.build)()
    }
}

fn build_properties<S: Saga>() -> ConfigResult<SagaDataCorrelationProperties> {
    let mut correlator = Correlator::<S::Data>::new(S::SAGA_TYPE);
    S::correlate(&mut correlator)?;
    Ok(correlator.build())
}
