//! Saga runtime: storage and lock boundaries, correlation cache, the
//! instance lifecycle coordinator and the message pipeline around it.

pub mod concurrency;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod error_handler;
pub mod lock;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod stats;
pub mod storage;
pub mod worker;


pub use concurrency::{ConflictController, WriteMode};
pub use config::SagaSettings;
pub use coordinator::SagaCoordinator;
pub use error::SagaError;
pub use error_handler::{CorrelationErrorHandler, FailOnMissingSaga, LogAndSkip};
pub use lock::{ExclusiveAccessLock, InMemoryExclusiveAccessLock, LockError};
pub use pipeline::{DispatchStep, IncomingContext, IncomingStep, Next, SagaPipeline};
pub use registry::HandlerRegistry;
pub use resolver::CorrelationResolver;
pub use stats::{SagaStats, SagaStatsSnapshot};
pub use storage::{InMemorySagaStorage, SagaStorage, StorageError};
pub use worker::SagaWorkerPool;
