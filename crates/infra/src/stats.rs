//! Saga runtime statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time copy of [`SagaStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SagaStatsSnapshot {
    pub created: u64,
    pub loaded: u64,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub unchanged: u64,
    pub correlation_misses: u64,
    pub conflicts: u64,
    pub conflicts_resolved: u64,
}

/// Lock-free counters shared by coordinator instances.
#[derive(Debug, Default)]
pub struct SagaStats {
    created: AtomicU64,
    loaded: AtomicU64,
    inserted: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
    unchanged: AtomicU64,
    correlation_misses: AtomicU64,
    conflicts: AtomicU64,
    conflicts_resolved: AtomicU64,
}

macro_rules! counter {
    ($($record:ident => $field:ident),* $(,)?) => {
        impl SagaStats {
            $(
                pub fn $record(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> SagaStatsSnapshot {
                SagaStatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counter! {
    record_created => created,
    record_loaded => loaded,
    record_inserted => inserted,
    record_updated => updated,
    record_deleted => deleted,
    record_unchanged => unchanged,
    record_correlation_miss => correlation_misses,
    record_conflict => conflicts,
    record_conflict_resolved => conflicts_resolved,
}
