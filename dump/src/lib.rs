//! Coordination core of a parallel logical dump for MySQL-family servers.
//!
//! A [`run::DumpRun`] takes the lightest lock that keeps the dump consistent, fixes a snapshot
//! shared by every worker session, hands discovered objects to a pool of workers, and releases
//! the lock as soon as the last non-transactional table was read. Serialization of rows and
//! schemas, object discovery and the wire client are supplied by the caller through the traits
//! in [`client`], [`discovery`] and [`workers::executor`].

pub mod balance;
pub mod client;
pub mod concurrency;
pub mod context;
pub mod control;
pub mod discovery;
pub mod error;
pub mod journal;
pub mod lock;
mod macros;
pub mod not_updated;
pub mod replication;
pub mod run;
pub mod scheduler;
pub mod server;
pub mod snapshot;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
