use std::future::Future;

use crate::error::DumpResult;

/// Background task consuming jobs.
///
/// `H` is the handle returned once the worker started and `S` the state observable through it.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Error type returned when the worker fails to start.
    type Error;

    /// Starts the worker and returns once it is ready to take jobs.
    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// Handle to a running worker.
pub trait WorkerHandle<S> {
    /// Returns the current state of the worker.
    fn state(&self) -> S;

    /// Waits for the worker to finish and returns its result.
    fn wait(self) -> impl Future<Output = DumpResult<()>> + Send;
}
