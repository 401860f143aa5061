use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Free disk space thresholds that pause and resume the workers.
///
/// Workers are paused once free space drops below `pause_at_mb` and resumed only after it rises
/// above `resume_at_mb`, which must be strictly greater so that a single noisy sample cannot make
/// the run oscillate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DiskLimitsConfig {
    /// Free space, in MiB, below which the workers are paused.
    pub pause_at_mb: u64,
    /// Free space, in MiB, above which paused workers are resumed.
    pub resume_at_mb: u64,
    /// Interval between two free space samples, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl DiskLimitsConfig {
    /// Default interval between two free space samples.
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;

    /// Creates limits with the default poll interval.
    pub fn new(pause_at_mb: u64, resume_at_mb: u64) -> Self {
        Self {
            pause_at_mb,
            resume_at_mb,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    /// Validates that the thresholds form a proper hysteresis band.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.resume_at_mb <= self.pause_at_mb {
            return Err(ValidationError::DiskLimitsNotIncreasing {
                pause_at_mb: self.pause_at_mb,
                resume_at_mb: self.resume_at_mb,
            });
        }

        if self.poll_interval_ms == 0 {
            return Err(ValidationError::DiskPollIntervalZero);
        }

        Ok(())
    }
}

impl FromStr for DiskLimitsConfig {
    type Err = ValidationError;

    /// Parses the `<pause_mb>:<resume_mb>` form accepted on the command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format_error = || ValidationError::DiskLimitsFormat(s.to_owned());

        let (pause, resume) = s.split_once(':').ok_or_else(format_error)?;
        let pause_at_mb = pause.trim().parse().map_err(|_| format_error())?;
        let resume_at_mb = resume.trim().parse().map_err(|_| format_error())?;

        let limits = Self::new(pause_at_mb, resume_at_mb);
        limits.validate()?;

        Ok(limits)
    }
}

fn default_poll_interval_ms() -> u64 {
    DiskLimitsConfig::DEFAULT_POLL_INTERVAL_MS
}
