use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use sagabus_core::{
    CorrelationValue, ID_PROPERTY, IndexedProperty, Revision, SagaDocument, SagaId, ScalarKind,
};

use super::r#trait::{SagaStorage, StorageError};

type IndexKey = (String, CorrelationValue);

#[derive(Debug, Clone)]
struct Row {
    document: SagaDocument,
    indexed: Vec<IndexKey>,
}

/// All instances of one saga data type.
#[derive(Debug, Default)]
struct Partition {
    rows: HashMap<SagaId, Row>,
    index: HashMap<IndexKey, SagaId>,
}

impl Partition {
    fn index_keys(properties: &[IndexedProperty]) -> Vec<IndexKey> {
        let mut keys: Vec<IndexKey> = properties
            .iter()
            .filter(|p| p.name != ID_PROPERTY && !p.value.is_unset())
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    fn check_unique(&self, id: SagaId, keys: &[IndexKey]) -> Result<(), StorageError> {
        for key in keys {
            if let Some(owner) = self.index.get(key) {
                if *owner != id {
                    return Err(StorageError::Conflict(format!(
                        "{} = {} is already used by saga {owner}",
                        key.0, key.1
                    )));
                }
            }
        }
        Ok(())
    }

    fn unindex(&mut self, id: SagaId) {
        if let Some(row) = self.rows.get(&id) {
            for key in &row.indexed {
                if self.index.get(key) == Some(&id) {
                    self.index.remove(key);
                }
            }
        }
    }

    fn store(&mut self, document: SagaDocument, indexed: Vec<IndexKey>) {
        let id = document.id;
        for key in &indexed {
            self.index.insert(key.clone(), id);
        }
        self.rows.insert(id, Row { document, indexed });
    }
}

/// In-memory saga storage.
///
/// Intended for tests/dev. Keeps one unique correlation index per saga data
/// type, so two instances can never share a correlation value. Unset values
/// (the default of their kind) are not indexed.
#[derive(Debug, Default)]
pub struct InMemorySagaStorage {
    partitions: RwLock<HashMap<String, Partition>>,
}

impl InMemorySagaStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored instance of `data_type`.
    pub fn documents(&self, data_type: &str) -> Result<Vec<SagaDocument>, StorageError> {
        let partitions = self.read()?;
        let mut docs: Vec<SagaDocument> = partitions
            .get(data_type)
            .map(|p| p.rows.values().map(|r| r.document.clone()).collect())
            .unwrap_or_default();
        docs.sort_by_key(|d| d.id);
        Ok(docs)
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Partition>>, StorageError> {
        self.partitions
            .read()
            .map_err(|_| StorageError::Backend("lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Partition>>, StorageError> {
        self.partitions
            .write()
            .map_err(|_| StorageError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait]
impl SagaStorage for InMemorySagaStorage {
    async fn find(
        &self,
        data_type: &str,
        property: &str,
        value: &CorrelationValue,
    ) -> Result<Option<SagaDocument>, StorageError> {
        let partitions = self.read()?;
        let Some(partition) = partitions.get(data_type) else {
            return Ok(None);
        };

        let id = if property == ID_PROPERTY {
            match value.clone().coerce(ScalarKind::Uuid) {
                Some(CorrelationValue::Uuid(uuid)) => Some(SagaId::from_uuid(uuid)),
                _ => None,
            }
        } else {
            partition
                .index
                .get(&(property.to_string(), value.clone()))
                .copied()
        };

        Ok(id
            .and_then(|id| partition.rows.get(&id))
            .map(|row| row.document.clone()))
    }

    async fn insert(
        &self,
        document: &mut SagaDocument,
        properties: &[IndexedProperty],
    ) -> Result<(), StorageError> {
        if !document.revision.is_initial() {
            return Err(StorageError::Backend(format!(
                "cannot insert saga {} with revision {}",
                document.id, document.revision
            )));
        }

        let mut partitions = self.write()?;
        let partition = partitions.entry(document.data_type.clone()).or_default();

        if partition.rows.contains_key(&document.id) {
            return Err(StorageError::Conflict(format!(
                "saga {} already exists",
                document.id
            )));
        }

        let keys = Partition::index_keys(properties);
        partition.check_unique(document.id, &keys)?;

        document.revision = Revision::INITIAL;
        partition.store(document.clone(), keys);
        Ok(())
    }

    async fn update(
        &self,
        document: &mut SagaDocument,
        properties: &[IndexedProperty],
    ) -> Result<(), StorageError> {
        let mut partitions = self.write()?;
        let partition = partitions.entry(document.data_type.clone()).or_default();

        let Some(current) = partition.rows.get(&document.id) else {
            return Err(StorageError::Conflict(format!(
                "saga {} does not exist",
                document.id
            )));
        };
        if !document.revision.matches(current.document.revision) {
            return Err(StorageError::Conflict(format!(
                "saga {} expected revision {}, found {}",
                document.id, document.revision, current.document.revision
            )));
        }

        let keys = Partition::index_keys(properties);
        partition.check_unique(document.id, &keys)?;

        partition.unindex(document.id);
        document.revision = document.revision.next();
        partition.store(document.clone(), keys);
        Ok(())
    }

    async fn delete(&self, document: &SagaDocument) -> Result<(), StorageError> {
        let mut partitions = self.write()?;
        let partition = partitions.entry(document.data_type.clone()).or_default();

        let Some(current) = partition.rows.get(&document.id) else {
            return Err(StorageError::Conflict(format!(
                "saga {} does not exist",
                document.id
            )));
        };
        if !document.revision.matches(current.document.revision) {
            return Err(StorageError::Conflict(format!(
                "saga {} expected revision {}, found {}",
                document.id, document.revision, current.document.revision
            )));
        }

        partition.unindex(document.id);
        partition.rows.remove(&document.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn doc(data_type: &str) -> SagaDocument {
        SagaDocument {
            id: SagaId::new(),
            revision: Revision::INITIAL,
            data_type: data_type.to_string(),
            body: json!({ "count": 0 }),
        }
    }

    fn key(value: &str) -> Vec<IndexedProperty> {
        vec![IndexedProperty::new(
            "Key",
            CorrelationValue::String(value.to_string()),
        )]
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    #[tokio::test]
    async fn insert_then_find_by_correlation_value() {
        let storage = InMemorySagaStorage::new();
        let mut d = doc("t");
        storage.insert(&mut d, &key("a")).await.unwrap();

        let found = storage
            .find("t", "Key", &CorrelationValue::String("a".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, d.id);
        assert_eq!(found.revision, Revision::INITIAL);

        assert!(storage
            .find("other", "Key", &CorrelationValue::String("a".into()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn find_by_id_bypasses_index() {
        let storage = InMemorySagaStorage::new();
        let mut d = doc("t");
        storage.insert(&mut d, &[]).await.unwrap();

        let by_uuid = storage
            .find("t", ID_PROPERTY, &CorrelationValue::Uuid(*d.id.as_uuid()))
            .await
            .unwrap();
        assert_eq!(by_uuid.map(|x| x.id), Some(d.id));

        let by_string = storage
            .find("t", ID_PROPERTY, &CorrelationValue::String(d.id.to_string()))
            .await
            .unwrap();
        assert!(by_string.is_some());
    }

    #[tokio::test]
    async fn duplicate_id_or_correlation_value_conflicts() {
        let storage = InMemorySagaStorage::new();
        let mut first = doc("t");
        storage.insert(&mut first, &key("a")).await.unwrap();

        let mut same_id = first.clone();
        let err = storage.insert(&mut same_id, &key("b")).await.unwrap_err();
        assert!(err.is_conflict());

        let mut same_value = doc("t");
        let err = storage.insert(&mut same_value, &key("a")).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let storage = InMemorySagaStorage::new();
        let mut d = doc("t");
        storage.insert(&mut d, &key("a")).await.unwrap();

        let mut stale = d.clone();
        storage.update(&mut d, &key("a")).await.unwrap();
        assert_eq!(d.revision, Revision::new(1));

        let err = storage.update(&mut stale, &key("a")).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(stale.revision, Revision::INITIAL);
    }

    #[tokio::test]
    async fn update_moves_index_entries() {
        let storage = InMemorySagaStorage::new();
        let mut d = doc("t");
        storage.insert(&mut d, &key("a")).await.unwrap();
        storage.update(&mut d, &key("b")).await.unwrap();

        let a = CorrelationValue::String("a".into());
        let b = CorrelationValue::String("b".into());
        assert!(storage.find("t", "Key", &a).await.unwrap().is_none());
        assert!(storage.find("t", "Key", &b).await.unwrap().is_some());

        let mut other = doc("t");
        storage.insert(&mut other, &key("a")).await.unwrap();
    }

    #[tokio::test]
    async fn unset_values_are_not_indexed() {
        let storage = InMemorySagaStorage::new();
        let empty = key("");

        let mut first = doc("t");
        storage.insert(&mut first, &empty).await.unwrap();
        let mut second = doc("t");
        storage.insert(&mut second, &empty).await.unwrap();

        let unset = CorrelationValue::String(String::new());
        assert!(storage.find("t", "Key", &unset).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_checks_revision_and_clears_index() {
        let storage = InMemorySagaStorage::new();
        let mut d = doc("t");
        storage.insert(&mut d, &key("a")).await.unwrap();

        let stale = d.clone();
        storage.update(&mut d, &key("a")).await.unwrap();
        assert!(storage.delete(&stale).await.unwrap_err().is_conflict());

        storage.delete(&d).await.unwrap();
        assert!(storage.documents("t").unwrap().is_empty());
        let a = CorrelationValue::String("a".into());
        assert!(storage.find("t", "Key", &a).await.unwrap().is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: the stored revision equals the number of successful updates,
        /// and the id never changes.
        #[test]
        fn revision_counts_successful_updates(stale_attempts in proptest::collection::vec(any::<bool>(), 1..40)) {
            let storage = InMemorySagaStorage::new();
            let mut d = doc("t");
            let id = d.id;
            block_on(storage.insert(&mut d, &key("a"))).unwrap();

            let mut successes = 0u64;
            for stale in stale_attempts {
                let mut attempt = d.clone();
                if stale {
                    attempt.revision = Revision::new(attempt.revision.get() + 1);
                    prop_assert!(block_on(storage.update(&mut attempt, &key("a"))).is_err());
                } else {
                    block_on(storage.update(&mut attempt, &key("a"))).unwrap();
                    prop_assert_eq!(attempt.revision, d.revision.next());
                    d = attempt;
                    successes += 1;
                }
            }

            let stored = block_on(storage.find("t", ID_PROPERTY, &CorrelationValue::Uuid(*id.as_uuid())))
                .unwrap()
                .unwrap();
            prop_assert_eq!(stored.id, id);
            prop_assert_eq!(stored.revision.get(), successes);
        }
    }
}
