//! `sagabus-messages`: messages, correlation rules and the saga author surface.
//!
//! This crate is storage-agnostic: it describes *what* a saga correlates on and
//! how a handler is invoked, while `sagabus-infra` decides where instances live.

pub mod context;
pub mod correlation;
pub mod invoker;
pub mod message;
pub mod saga;

pub use context::{
    HEADER_CORRELATION_ID, HEADER_MESSAGE_ID, HEADER_SOURCE_QUEUE, MessageContext,
};
pub use correlation::{CorrelationProperty, Correlator, SagaDataCorrelationProperties};
pub use invoker::{
    HandlerFn, HandlerFnInvoker, HandlerFuture, HandlerInvoker, InvokeError, SagaInvoker,
};
pub use message::{Message, MessageType, TypedMessage};
pub use saga::{Handles, Saga, SagaInstance, SagaType};
