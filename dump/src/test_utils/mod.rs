//! Test doubles for dump runs.
//!
//! - [`server`] scripts a server: canned results, injected failures, and a log of every
//!   statement each session issued.
//! - [`discovery`] enumerates a fixed set of objects.
//! - [`executor`] records the jobs it ran and can hold them behind a gate.
//! - [`context`] builds run contexts around a configuration.
//! - [`notify`] waits on notifications with a timeout so that tests fail instead of hanging.

pub mod context;
pub mod discovery;
pub mod executor;
pub mod notify;
pub mod server;
