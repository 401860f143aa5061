//! Concurrency primitives shared by the coordinator, the workers and the control tasks.
//!
//! Every primitive is a thin wrapper over a [`tokio::sync::watch`] channel so that state can be
//! read synchronously at loop boundaries and awaited when a task needs to block on it.

pub mod disk_monitor;
pub mod pause;
pub mod shutdown;
pub mod signal;
