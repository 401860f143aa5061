//! Shared configuration types for dump runs.

mod base;
mod disk;
mod dump;
mod lock;

pub use base::ValidationError;
pub use disk::DiskLimitsConfig;
pub use dump::DumpConfig;
pub use lock::{LockConfig, LongQueryGuardConfig};
