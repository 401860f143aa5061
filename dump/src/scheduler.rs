use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::bail;
use crate::balance::balance_tables;
use crate::concurrency::signal::{OnceSignalRx, OnceSignalTx, create_once_signal};
use crate::context::RunContext;
use crate::error::{DumpResult, ErrorKind};
use crate::types::{DatabaseDescriptor, TableDescriptor};
use crate::workers::job::Job;

#[derive(Debug, Default)]
struct TrackerState {
    outstanding: usize,
    dispatch_done: bool,
}

/// Tracks the non-transactional work that must finish before locks can be released.
///
/// The release signal fires once dispatch is finished and every registered unit completed,
/// which includes runs with no non-transactional table at all.
#[derive(Debug)]
pub struct NonTransactionalTracker {
    state: Mutex<TrackerState>,
    release_tx: OnceSignalTx,
}

impl NonTransactionalTracker {
    pub fn new() -> Self {
        let (release_tx, _) = create_once_signal();

        Self {
            state: Mutex::new(TrackerState::default()),
            release_tx,
        }
    }

    /// Registers `units` that will be completed by the workers.
    pub fn register(&self, units: usize) {
        let mut state = self.lock();
        state.outstanding += units;
    }

    /// Records that no more units will be registered.
    pub fn finish_dispatch(&self) {
        let mut state = self.lock();
        state.dispatch_done = true;
        self.maybe_release(&state);
    }

    /// Records that a worker finished, or skipped, `units` units.
    pub fn complete(&self, units: usize) {
        if units == 0 {
            return;
        }

        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(units);
        self.maybe_release(&state);
    }

    /// Fires the release signal whatever is outstanding. Used when units can no longer complete.
    pub fn abandon(&self) {
        if self.release_tx.fire() {
            warn!(
                outstanding = self.outstanding(),
                "non-transactional work abandoned, locks can be released"
            );
        }
    }

    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// Subscribes to the lock release signal.
    pub fn release_rx(&self) -> OnceSignalRx {
        self.release_tx.subscribe()
    }

    pub fn is_released(&self) -> bool {
        self.release_tx.has_fired()
    }

    fn maybe_release(&self, state: &TrackerState) {
        if state.dispatch_done && state.outstanding == 0 && self.release_tx.fire() {
            info!("non-transactional tables done, locks can be released");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for NonTransactionalTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Job creation entry points used by discovery.
///
/// Schema and checksum jobs are enqueued immediately. Table, view and post-schema jobs are staged
/// until [`JobScheduler::dispatch`] runs, since the set of non-transactional tables must be known
/// before any of them is handed to a worker. Every entry point refuses work once the run is
/// cancelled.
#[derive(Debug, Clone)]
pub struct JobScheduler {
    context: Arc<RunContext>,
}

/// Number of jobs enqueued by [`JobScheduler::dispatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub non_transactional_tables: usize,
    pub less_locking_batches: usize,
    pub transactional_tables: usize,
    pub views: usize,
    pub post_schemas: usize,
}

impl JobScheduler {
    pub fn new(context: Arc<RunContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.context
    }

    /// Enqueues the schema job of `database` unless one was already created.
    ///
    /// Returns whether a job was enqueued. Schema jobs are never created when schemas are disabled.
    pub fn create_schema_job(&self, database: &Arc<DatabaseDescriptor>) -> DumpResult<bool> {
        self.ensure_not_cancelled()?;

        if self.context.config().no_schemas {
            return Ok(false);
        }

        if !database.mark_dumped() {
            debug!(database = database.name(), "schema job already created");
            return Ok(false);
        }

        self.context
            .main_queue()
            .push(Job::DumpSchema(database.clone()))?;

        Ok(true)
    }

    /// Stages the data job of `table`.
    pub fn create_table_job(&self, table: Arc<TableDescriptor>) -> DumpResult<()> {
        self.ensure_not_cancelled()?;

        self.context.register_table(table.clone());
        self.context.staged().tables.push(table);

        Ok(())
    }

    /// Stages the definition job of `view`.
    pub fn create_view_job(&self, view: Arc<TableDescriptor>) -> DumpResult<()> {
        self.ensure_not_cancelled()?;

        self.context.staged().views.push(view);

        Ok(())
    }

    /// Stages the triggers, routines and events job of `database`.
    pub fn create_post_schema_job(&self, database: Arc<DatabaseDescriptor>) -> DumpResult<()> {
        self.ensure_not_cancelled()?;

        self.context.staged().post_schemas.push(database);

        Ok(())
    }

    /// Enqueues the checksum job of `table` on the main queue.
    pub fn create_checksum_job(&self, table: Arc<TableDescriptor>) -> DumpResult<()> {
        self.ensure_not_cancelled()?;

        self.context.main_queue().push(Job::DumpChecksum(table))
    }

    /// Enqueues every staged job once discovery is complete.
    ///
    /// Non-transactional tables go first: as balanced batches on the pre-pass queue in
    /// reduced-locking mode, otherwise as individual jobs on the main queue. Transactional tables,
    /// views and post-schema objects follow on the main queue, each group in discovery order.
    /// Dispatch is finished for the release tracker as soon as the non-transactional jobs are
    /// enqueued, even when the run was cancelled and nothing is enqueued.
    pub fn dispatch(&self) -> DumpResult<DispatchSummary> {
        let staged = std::mem::take(&mut *self.context.staged());
        let tracker = self.context.tracker();
        let mut summary = DispatchSummary::default();

        if self.context.is_cancelled() {
            warn!("run cancelled, discarding staged jobs");
            tracker.finish_dispatch();

            return Ok(summary);
        }

        let (transactional, non_transactional): (Vec<_>, Vec<_>) = staged
            .tables
            .into_iter()
            .partition(|table| table.is_transactional());
        summary.non_transactional_tables = non_transactional.len();

        let non_transactional_result = match self.context.less_locking_queue() {
            Some(queue) => {
                let batches = balance_tables(non_transactional, self.context.worker_count());
                summary.less_locking_batches = batches.len();

                tracker.register(batches.len());
                batches
                    .into_iter()
                    .try_for_each(|batch| queue.push(Job::DumpTableBatch(batch)))
            }
            None => {
                tracker.register(non_transactional.len());
                non_transactional
                    .into_iter()
                    .try_for_each(|table| self.push_table(table))
            }
        };

        // Dispatch must be marked finished even on failure, or the release signal never fires.
        tracker.finish_dispatch();
        non_transactional_result?;

        info!(
            non_transactional_tables = summary.non_transactional_tables,
            less_locking_batches = summary.less_locking_batches,
            "non-transactional jobs dispatched"
        );

        summary.transactional_tables = transactional.len();
        for table in transactional {
            self.push_table(table)?;
        }

        summary.views = staged.views.len();
        for view in staged.views {
            self.context.main_queue().push(Job::DumpView(view))?;
        }

        summary.post_schemas = staged.post_schemas.len();
        for database in staged.post_schemas {
            self.context
                .main_queue()
                .push(Job::DumpPostSchema(database))?;
        }

        Ok(summary)
    }

    fn push_table(&self, table: Arc<TableDescriptor>) -> DumpResult<()> {
        if self.context.config().dump_checksums {
            self.context
                .main_queue()
                .push(Job::DumpChecksum(table.clone()))?;
        }

        self.context.main_queue().push(Job::DumpTable(table))
    }

    fn ensure_not_cancelled(&self) -> DumpResult<()> {
        if self.context.is_cancelled() {
            bail!(
                ErrorKind::OperationCanceled,
                "Job creation refused after cancellation"
            );
        }

        Ok(())
    }
}
