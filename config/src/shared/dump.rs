use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{DiskLimitsConfig, LockConfig, ValidationError};

/// Configuration for one dump run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DumpConfig {
    /// Directory receiving the dump files, the run journal and the not-updated tables list.
    pub output_directory: PathBuf,
    /// Number of workers in the main pool. The reduced-locking pre-pass uses as many again.
    #[serde(default = "default_threads")]
    pub threads: u16,
    /// Locking behavior.
    #[serde(default)]
    pub lock: LockConfig,
    /// Copies non-transactional tables with a dedicated worker set while locks are held, so that
    /// locks can be released as soon as those tables are read.
    #[serde(default)]
    pub less_locking: bool,
    /// Releases locks as soon as every worker holds its snapshot.
    #[serde(default)]
    pub trx_consistency_only: bool,
    /// Schedules a checksum job for every data table.
    #[serde(default)]
    pub dump_checksums: bool,
    /// Suppresses schema jobs.
    #[serde(default)]
    pub no_schemas: bool,
    /// Lists tables not updated in the last `n` days before discovery runs.
    #[serde(default)]
    pub updated_since_days: Option<u32>,
    /// Pauses workers when the output directory runs low on space.
    #[serde(default)]
    pub disk_limits: Option<DiskLimitsConfig>,
    /// Non-interactive run: interrupts never prompt the operator.
    #[serde(default)]
    pub daemon_mode: bool,
    /// Snapshot token shared by every connection on distributed servers. Derived from the
    /// current log position when absent.
    #[serde(default)]
    pub snapshot_token: Option<String>,
}

impl DumpConfig {
    /// Default size of the main worker pool.
    pub const DEFAULT_THREADS: u16 = 4;

    /// Creates a configuration with defaults for every optional setting.
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            output_directory: output_directory.into(),
            threads: default_threads(),
            lock: LockConfig::default(),
            less_locking: false,
            trx_consistency_only: false,
            dump_checksums: false,
            no_schemas: false,
            updated_since_days: None,
            disk_limits: None,
            daemon_mode: false,
            snapshot_token: None,
        }
    }

    /// Validates dump configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.threads == 0 {
            return Err(ValidationError::ThreadsZero);
        }

        self.lock.validate()?;

        if let Some(disk_limits) = &self.disk_limits {
            disk_limits.validate()?;
        }

        Ok(())
    }

    /// Returns whether the reduced-locking pre-pass is active.
    ///
    /// Running without locks, or releasing them right after the snapshot is taken, leaves nothing
    /// for the pre-pass to shorten.
    pub fn less_locking_enabled(&self) -> bool {
        self.less_locking && !self.lock.no_locks && !self.trx_consistency_only
    }
}

impl Config for DumpConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

fn default_threads() -> u16 {
    DumpConfig::DEFAULT_THREADS
}
