//! Saga runtime settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use sagabus_core::{ConfigError, ConfigResult};

pub const ENV_MAX_CONFLICT_ATTEMPTS: &str = "SAGABUS_MAX_CONFLICT_ATTEMPTS";
pub const ENV_LOCK_TIMEOUT_MS: &str = "SAGABUS_LOCK_TIMEOUT_MS";
pub const ENV_LOCK_POLL_INTERVAL_MS: &str = "SAGABUS_LOCK_POLL_INTERVAL_MS";
pub const ENV_LOCK_BUCKETS: &str = "SAGABUS_LOCK_BUCKETS";
pub const ENV_MAX_PARALLELISM: &str = "SAGABUS_MAX_PARALLELISM";

/// Saga runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaSettings {
    /// Upper bound of write attempts per instance when conflicts are resolved
    pub max_conflict_attempts: u32,
    /// How long to wait for an exclusive access lock
    pub lock_timeout: Duration,
    /// How often a waiting lock acquisition retries
    pub lock_poll_interval: Duration,
    /// Fold lock keys into this many buckets (none = one lock per key)
    pub lock_buckets: Option<u32>,
    /// Maximum messages processed concurrently by a worker pool
    pub max_parallelism: usize,
}

impl Default for SagaSettings {
    fn default() -> Self {
        Self {
            max_conflict_attempts: 10,
            lock_timeout: Duration::from_secs(10),
            lock_poll_interval: Duration::from_millis(5),
            lock_buckets: None,
            max_parallelism: 4,
        }
    }
}

impl SagaSettings {
    pub fn with_max_conflict_attempts(mut self, attempts: u32) -> Self {
        self.max_conflict_attempts = attempts;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    pub fn with_lock_buckets(mut self, buckets: u32) -> Self {
        self.lock_buckets = Some(buckets);
        self
    }

    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = max;
        self
    }

    /// Load settings from the process environment, falling back to defaults.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(v) = parse_positive::<u32>(&lookup, ENV_MAX_CONFLICT_ATTEMPTS)? {
            settings.max_conflict_attempts = v;
        }
        if let Some(v) = parse_positive::<u64>(&lookup, ENV_LOCK_TIMEOUT_MS)? {
            settings.lock_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_positive::<u64>(&lookup, ENV_LOCK_POLL_INTERVAL_MS)? {
            settings.lock_poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse_positive::<u32>(&lookup, ENV_LOCK_BUCKETS)? {
            settings.lock_buckets = Some(v);
        }
        if let Some(v) = parse_positive::<usize>(&lookup, ENV_MAX_PARALLELISM)? {
            settings.max_parallelism = v;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would stall or disable processing.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_conflict_attempts == 0 {
            return Err(ConfigError::invalid_setting(
                "max_conflict_attempts",
                "must be at least 1",
            ));
        }
        if self.max_parallelism == 0 {
            return Err(ConfigError::invalid_setting(
                "max_parallelism",
                "must be at least 1",
            ));
        }
        if self.lock_poll_interval.is_zero() {
            return Err(ConfigError::invalid_setting(
                "lock_poll_interval",
                "must be non-zero",
            ));
        }
        if self.lock_buckets == Some(0) {
            return Err(ConfigError::invalid_setting(
                "lock_buckets",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

fn parse_positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> ConfigResult<Option<T>>
where
    T: core::str::FromStr + PartialEq + Default,
    T::Err: core::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let value: T = raw
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid_setting(key, format!("'{raw}': {e}")))?;
    if value == T::default() {
        return Err(ConfigError::invalid_setting(key, "must be greater than zero"));
    }
    Ok(Some(value))
}
