//! Per saga type correlation cache.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use sagabus_core::{ConfigError, ConfigResult};
use sagabus_messages::{
    CorrelationProperty, Message, Saga, SagaDataCorrelationProperties, SagaType,
};

type Built = ConfigResult<Arc<SagaDataCorrelationProperties>>;

#[derive(Debug)]
struct Entry {
    data_type: &'static str,
    cell: Arc<OnceLock<Built>>,
}

/// Caches each saga type's correlation rules, keyed by saga type name.
///
/// A saga's declaration runs at most once per resolver; concurrent first
/// lookups wait for the same build. The cache only ever grows.
#[derive(Debug, Default)]
pub struct CorrelationResolver {
    entries: RwLock<HashMap<&'static str, Entry>>,
}

impl CorrelationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and cache `S`'s rules now, surfacing configuration errors at startup.
    pub fn register<S: Saga>(&self) -> ConfigResult<Arc<SagaDataCorrelationProperties>> {
        self.get(&SagaType::of::<S>())
    }

    /// Rules of `saga_type`, built on first use.
    pub fn get(&self, saga_type: &SagaType) -> ConfigResult<Arc<SagaDataCorrelationProperties>> {
        let cell = self.cell_for(saga_type)?;
        cell.get_or_init(|| {
            tracing::debug!(saga_type = saga_type.name(), "building correlation rules");
            saga_type.build_properties().map(Arc::new)
        })
        .clone()
    }

    /// Rules of `saga_type` that apply to `message`.
    pub fn properties_for(
        &self,
        saga_type: &SagaType,
        message: &dyn Message,
    ) -> ConfigResult<Vec<CorrelationProperty>> {
        self.get(saga_type)?.for_message(message)
    }

    fn cell_for(&self, saga_type: &SagaType) -> ConfigResult<Arc<OnceLock<Built>>> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(saga_type.name()) {
                return Self::check(entry, saga_type);
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(saga_type.name()).or_insert_with(|| Entry {
            data_type: saga_type.data_type(),
            cell: Arc::new(OnceLock::new()),
        });
        Self::check(entry, saga_type)
    }

    fn check(entry: &Entry, saga_type: &SagaType) -> ConfigResult<Arc<OnceLock<Built>>> {
        if entry.data_type != saga_type.data_type() {
            return Err(ConfigError::DuplicateSagaType {
                saga_type: saga_type.name().to_string(),
                existing: entry.data_type.to_string(),
            });
        }
        Ok(entry.cell.clone())
    }
}
