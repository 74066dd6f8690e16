//! Exclusive access lock boundary.
//!
//! Locks only lower the rate of write conflicts under contention; optimistic
//! concurrency in storage stays the correctness backstop.

pub mod in_memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use sagabus_core::CorrelationValue;

pub use in_memory::InMemoryExclusiveAccessLock;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock backend failure: {0}")]
    Backend(String),
}

/// Named mutual exclusion, typically keyed by correlation value.
#[async_trait]
pub trait ExclusiveAccessLock: Send + Sync {
    /// Try to take `key`. Returns `false` (not an error) on timeout or cancellation.
    async fn acquire(
        &self,
        key: &str,
        cancellation: &CancellationToken,
    ) -> Result<bool, LockError>;

    /// Give `key` back. Returns `false` if it was not held.
    async fn release(&self, key: &str) -> Result<bool, LockError>;

    /// Diagnostic check whether `key` is currently held.
    async fn is_lock_acquired(
        &self,
        key: &str,
        cancellation: &CancellationToken,
    ) -> Result<bool, LockError>;
}

/// Lock key for one correlation value of one saga data type.
pub fn lock_key(
    data_type: &str,
    property: &str,
    value: &CorrelationValue,
    buckets: Option<u32>,
) -> String {
    let key = format!("{data_type}:{property}:{value}");
    match buckets {
        Some(n) if n > 0 => {
            format!("sagabus-bucket:{}", fnv1a(key.as_bytes()) % u64::from(n))
        }
        _ => key,
    }
}

/// Sort and deduplicate keys so every worker acquires them in the same order.
pub fn normalize_keys(mut keys: Vec<String>) -> Vec<String> {
    keys.sort();
    keys.dedup();
    keys
}

// Stable across processes, unlike the std hasher.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}
