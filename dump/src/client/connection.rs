use std::future::Future;

use thiserror::Error;

use crate::client::QueryResult;
use crate::types::QualifiedTableName;

/// Error reported by the server or the client library for a single statement.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("server error {code}: {message}")]
pub struct ServerError {
    /// Vendor error code.
    pub code: u32,
    /// Error text as reported by the server.
    pub message: String,
    /// Table the error refers to, when the client can identify it.
    ///
    /// Lock statements over many tables use it to drop the offending table and retry.
    pub table: Option<QualifiedTableName>,
}

impl ServerError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            table: None,
        }
    }

    /// Attaches the table the error refers to.
    pub fn with_table(mut self, table: QualifiedTableName) -> Self {
        self.table = Some(table);
        self
    }
}

/// A single server session.
///
/// Session state (open transactions, held locks, session variables) belongs to one connection,
/// so every consistency primitive is issued on the connection that must hold it.
pub trait DumpConnection: Send + 'static {
    /// Executes a statement, discarding any result set.
    fn execute(&mut self, statement: &str) -> impl Future<Output = Result<(), ServerError>> + Send;

    /// Executes a statement and buffers its result set.
    fn query(
        &mut self,
        statement: &str,
    ) -> impl Future<Output = Result<QueryResult, ServerError>> + Send;
}

/// Opens new sessions against the dumped server.
pub trait Connector: Send + Sync + 'static {
    type Connection: DumpConnection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, ServerError>> + Send;
}
