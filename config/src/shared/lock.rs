use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Locking behavior for a dump run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LockConfig {
    /// Skips the long query guard and every lock. Snapshots will not be consistent.
    #[serde(default)]
    pub no_locks: bool,
    /// Disables vendor backup locks even when the server supports them.
    #[serde(default)]
    pub no_backup_locks: bool,
    /// Uses one `LOCK TABLE ... READ` statement over every dumped table instead of a global
    /// read lock.
    #[serde(default)]
    pub lock_all_tables: bool,
    /// Long running query pre-check performed before any lock is taken.
    #[serde(default)]
    pub long_query: LongQueryGuardConfig,
}

impl LockConfig {
    /// Validates lock configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.long_query.validate()
    }
}

/// Long query guard settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LongQueryGuardConfig {
    /// Queries running longer than this many seconds block lock acquisition.
    #[serde(default = "default_threshold_secs")]
    pub threshold_secs: u64,
    /// Number of times the check is repeated before giving up.
    #[serde(default)]
    pub retries: u32,
    /// Seconds to wait between two checks.
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Kills blocking queries instead of waiting for them.
    #[serde(default)]
    pub kill_long_queries: bool,
}

impl LongQueryGuardConfig {
    /// Default threshold, in seconds, above which a query is considered long.
    pub const DEFAULT_THRESHOLD_SECS: u64 = 60;

    /// Default wait, in seconds, between two guard checks.
    pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 60;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.retries > 0 && self.retry_interval_secs == 0 {
            return Err(ValidationError::LongQueryRetryIntervalZero);
        }

        Ok(())
    }
}

impl Default for LongQueryGuardConfig {
    fn default() -> Self {
        Self {
            threshold_secs: default_threshold_secs(),
            retries: 0,
            retry_interval_secs: default_retry_interval_secs(),
            kill_long_queries: false,
        }
    }
}

fn default_threshold_secs() -> u64 {
    LongQueryGuardConfig::DEFAULT_THRESHOLD_SECS
}

fn default_retry_interval_secs() -> u64 {
    LongQueryGuardConfig::DEFAULT_RETRY_INTERVAL_SECS
}
