//! Connection-level abstractions consumed by the dump engine.
//!
//! The engine never speaks the wire protocol itself. It issues statements through
//! [`DumpConnection`] and opens new sessions through [`Connector`].

mod connection;
mod result;

pub use connection::{Connector, DumpConnection, ServerError};
pub use result::QueryResult;
