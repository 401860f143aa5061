//! Server-side locking for the duration of the non-transactional phase.

mod coordinator;
mod guard;

pub use coordinator::{LockCoordinator, LockHandle, LockMode};
pub use guard::LongQueryGuard;

use crate::types::QualifiedTableName;

/// Builds a single `LOCK TABLE ... READ` statement covering every table.
pub(crate) fn lock_tables_statement<'a, I>(tables: I) -> String
where
    I: IntoIterator<Item = &'a QualifiedTableName>,
{
    let clauses: Vec<String> = tables
        .into_iter()
        .map(|table| format!("{} READ", table.quoted()))
        .collect();

    format!("LOCK TABLE {}", clauses.join(", "))
}
