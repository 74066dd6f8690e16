use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use sagabus_core::{CorrelationValue, IndexedProperty, SagaDocument};

/// Storage operation error.
///
/// `Conflict` must be kept apart from every other failure: it is the signal
/// that drives optimistic retries and conflict resolution.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Revision precondition failed, the id already exists on insert, or a
    /// correlation value is already owned by another instance.
    #[error("saga write conflict: {0}")]
    Conflict(String),

    #[error("saga document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("saga storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}

/// Persistence contract for saga data.
///
/// ## Revisions
///
/// The backend owns revision management:
/// - `insert` stores the document at revision 0
/// - `update` requires the document's revision to equal the stored one and
///   advances it by exactly one
/// - `delete` requires the document's revision to equal the stored one
///
/// On success the backend writes the new revision back into `document`.
///
/// ## Correlation index
///
/// `properties` are the current correlation values of the instance, passed so
/// the backend can keep its own lookup index. Lookups by the `Id` property
/// always go straight to the instance and never through that index.
#[async_trait]
pub trait SagaStorage: Send + Sync {
    /// Find the instance of `data_type` whose `property` equals `value`.
    async fn find(
        &self,
        data_type: &str,
        property: &str,
        value: &CorrelationValue,
    ) -> Result<Option<SagaDocument>, StorageError>;

    async fn insert(
        &self,
        document: &mut SagaDocument,
        properties: &[IndexedProperty],
    ) -> Result<(), StorageError>;

    async fn update(
        &self,
        document: &mut SagaDocument,
        properties: &[IndexedProperty],
    ) -> Result<(), StorageError>;

    async fn delete(&self, document: &SagaDocument) -> Result<(), StorageError>;
}

#[async_trait]
impl<S> SagaStorage for Arc<S>
where
    S: SagaStorage + ?Sized,
{
    async fn find(
        &self,
        data_type: &str,
        property: &str,
        value: &CorrelationValue,
    ) -> Result<Option<SagaDocument>, StorageError> {
        (**self).find(data_type, property, value).await
    }

    async fn insert(
        &self,
        document: &mut SagaDocument,
        properties: &[IndexedProperty],
    ) -> Result<(), StorageError> {
        (**self).insert(document, properties).await
    }

    async fn update(
        &self,
        document: &mut SagaDocument,
        properties: &[IndexedProperty],
    ) -> Result<(), StorageError> {
        (**self).update(document, properties).await
    }

    async fn delete(&self, document: &SagaDocument) -> Result<(), StorageError> {
        (**self).delete(document).await
    }
}
