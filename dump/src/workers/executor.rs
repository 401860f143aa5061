use std::future::Future;

use crate::client::DumpConnection;
use crate::context::RunContext;
use crate::error::DumpResult;
use crate::types::TableDescriptor;
use crate::workers::job::Job;

/// Writes the output of individual jobs.
///
/// The engine decides when and on which session a job runs; implementations decide how rows,
/// schemas and checksums are read and serialized. Batches are unrolled by the worker, so
/// [`Job::DumpTableBatch`] and [`Job::Shutdown`] never reach an executor.
pub trait JobExecutor<C>: Send + Sync + 'static
where
    C: DumpConnection,
{
    /// Runs `job` on the worker's session, which is already bound to the run's snapshot.
    ///
    /// A returned error is counted by the worker and the run continues.
    fn execute(
        &self,
        connection: &mut C,
        job: &Job,
        context: &RunContext,
    ) -> impl Future<Output = DumpResult<()>> + Send;

    /// Writes the per-table metadata file once every worker drained.
    ///
    /// The default implementation writes nothing.
    fn write_table_metadata(
        &self,
        _table: &TableDescriptor,
        _context: &RunContext,
    ) -> impl Future<Output = DumpResult<()>> + Send {
        async { Ok(()) }
    }
}
