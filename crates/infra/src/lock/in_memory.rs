use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use super::{ExclusiveAccessLock, LockError};
use crate::config::SagaSettings;

/// Process-local exclusive access lock.
///
/// Acquisition polls the held-key set every `poll_interval` until the key is
/// free, the timeout elapses, or the cancellation token fires.
#[derive(Debug)]
pub struct InMemoryExclusiveAccessLock {
    held: Mutex<HashSet<String>>,
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for InMemoryExclusiveAccessLock {
    fn default() -> Self {
        Self::from_settings(&SagaSettings::default())
    }
}

impl InMemoryExclusiveAccessLock {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            timeout,
            poll_interval,
        }
    }

    /// Timeout and poll interval from `lock_timeout` / `lock_poll_interval`.
    pub fn from_settings(settings: &SagaSettings) -> Self {
        Self::new(settings.lock_timeout, settings.lock_poll_interval)
    }

    fn try_take(&self, key: &str) -> Result<bool, LockError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| LockError::Backend("lock poisoned".to_string()))?;
        Ok(held.insert(key.to_string()))
    }
}

#[async_trait]
impl ExclusiveAccessLock for InMemoryExclusiveAccessLock {
    async fn acquire(
        &self,
        key: &str,
        cancellation: &CancellationToken,
    ) -> Result<bool, LockError> {
        let deadline = Instant::now() + self.timeout;

        loop {
            if cancellation.is_cancelled() {
                return Ok(false);
            }
            if self.try_take(key)? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }

            tokio::select! {
                _ = cancellation.cancelled() => return Ok(false),
                _ = sleep(self.poll_interval) => {}
            }
        }
    }

    async fn release(&self, key: &str) -> Result<bool, LockError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| LockError::Backend("lock poisoned".to_string()))?;
        Ok(held.remove(key))
    }

    async fn is_lock_acquired(
        &self,
        key: &str,
        _cancellation: &CancellationToken,
    ) -> Result<bool, LockError> {
        let held = self
            .held
            .lock()
            .map_err(|_| LockError::Backend("lock poisoned".to_string()))?;
        Ok(held.contains(key))
    }
}
