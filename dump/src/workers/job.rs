use std::fmt;
use std::sync::Arc;

use crate::types::{DatabaseDescriptor, TableDescriptor};

/// Unit of work consumed by the workers.
#[derive(Debug, Clone)]
pub enum Job {
    /// Copies the rows of one table.
    DumpTable(Arc<TableDescriptor>),
    /// Copies several non-transactional tables under a single table lock. Only served by the
    /// reduced-locking pre-pass.
    DumpTableBatch(Vec<Arc<TableDescriptor>>),
    /// Writes the `CREATE DATABASE` statement of a database.
    DumpSchema(Arc<DatabaseDescriptor>),
    /// Writes the definition of a view.
    DumpView(Arc<TableDescriptor>),
    /// Computes the checksum of a table.
    DumpChecksum(Arc<TableDescriptor>),
    /// Writes the triggers, routines and events of a database.
    DumpPostSchema(Arc<DatabaseDescriptor>),
    /// Stops the worker that receives it.
    Shutdown,
}

impl Job {
    /// Returns the number of non-transactional units this job completes once processed.
    ///
    /// The lock release signal waits until every such unit is done.
    pub fn non_transactional_units(&self) -> usize {
        match self {
            Job::DumpTable(table) if !table.is_transactional() => 1,
            Job::DumpTableBatch(_) => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::DumpTable(table) => write!(f, "table {}", table.name()),
            Job::DumpTableBatch(tables) => write!(f, "batch of {} tables", tables.len()),
            Job::DumpSchema(database) => write!(f, "schema {}", database.name()),
            Job::DumpView(view) => write!(f, "view {}", view.name()),
            Job::DumpChecksum(table) => write!(f, "checksum {}", table.name()),
            Job::DumpPostSchema(database) => write!(f, "post schema {}", database.name()),
            Job::Shutdown => f.write_str("shutdown"),
        }
    }
}
