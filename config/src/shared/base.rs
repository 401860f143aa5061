use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The worker pool cannot be empty.
    #[error("`threads` cannot be zero")]
    ThreadsZero,
    /// The disk resume threshold must sit strictly above the pause threshold.
    #[error(
        "Invalid disk limits: `resume_at_mb` ({resume_at_mb}) must be greater than `pause_at_mb` ({pause_at_mb})"
    )]
    DiskLimitsNotIncreasing { pause_at_mb: u64, resume_at_mb: u64 },
    /// The disk monitor needs a non-zero poll interval.
    #[error("Invalid disk limits: `poll_interval_ms` cannot be zero")]
    DiskPollIntervalZero,
    /// Retrying the long query guard requires a non-zero interval.
    #[error("Invalid long query guard: `retry_interval_secs` cannot be zero when `retries` is set")]
    LongQueryRetryIntervalZero,
    /// A textual disk limit could not be parsed.
    #[error("Invalid disk limits `{0}`: expected `<pause_mb>:<resume_mb>`")]
    DiskLimitsFormat(String),
}
