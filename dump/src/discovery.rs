use std::future::Future;

use crate::client::DumpConnection;
use crate::error::DumpResult;
use crate::scheduler::JobScheduler;
use crate::types::QualifiedTableName;

/// Enumerates the objects selected for the dump.
///
/// Filtering (explicit lists, skip lists, patterns, the not-updated tables list exposed by the
/// run context) is the implementation's concern.
pub trait Discovery<C>: Send + Sync + 'static
where
    C: DumpConnection,
{
    /// Returns every base table that must be locked when locking tables one by one.
    fn lockable_tables(
        &self,
        connection: &mut C,
    ) -> impl Future<Output = DumpResult<Vec<QualifiedTableName>>> + Send;

    /// Walks the selected databases and creates their jobs through `scheduler`.
    ///
    /// Runs on the main connection after the snapshot is established. Implementations should
    /// stop as soon as an entry point refuses work because the run was cancelled.
    fn discover(
        &self,
        connection: &mut C,
        scheduler: &JobScheduler,
    ) -> impl Future<Output = DumpResult<()>> + Send;
}
