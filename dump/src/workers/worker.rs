use std::fmt;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info};

use crate::client::{Connector, DumpConnection};
use crate::concurrency::pause::wait_resumed;
use crate::concurrency::shutdown::is_cancelled;
use crate::context::RunContext;
use crate::error::{DumpError, DumpResult, ErrorKind};
use crate::lock::lock_tables_statement;
use crate::snapshot::SnapshotPlan;
use crate::types::TableDescriptor;
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::executor::JobExecutor;
use crate::workers::job::Job;
use crate::workers::queue::JobQueue;
use crate::{bail, dump_error};

/// Pass a worker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Copies non-transactional tables while the main connection still holds its lock.
    LessLocking,
    /// Serves the main queue under the run's snapshot.
    Main,
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerPhase::LessLocking => f.write_str("less_locking"),
            WorkerPhase::Main => f.write_str("main"),
        }
    }
}

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Opening its session and joining the snapshot.
    Starting,
    /// Session ready, readiness signaled.
    Ready,
    /// Executing jobs.
    Running,
    /// Run cancelled, skipping jobs until its shutdown job.
    Draining,
    Terminated,
}

/// Identity of a worker and its one-shot readiness signal.
#[derive(Debug)]
pub struct WorkerSlot {
    id: usize,
    phase: WorkerPhase,
    ready_tx: Option<oneshot::Sender<()>>,
}

impl WorkerSlot {
    pub fn new(id: usize, phase: WorkerPhase) -> (Self, oneshot::Receiver<()>) {
        let (ready_tx, ready_rx) = oneshot::channel();

        let slot = Self {
            id,
            phase,
            ready_tx: Some(ready_tx),
        };

        (slot, ready_rx)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    /// Returns the queue served by this worker.
    pub fn queue<'a>(&self, context: &'a RunContext) -> Option<&'a JobQueue> {
        match self.phase {
            WorkerPhase::LessLocking => context.less_locking_queue(),
            WorkerPhase::Main => Some(context.main_queue()),
        }
    }

    fn signal_ready(&mut self) {
        if let Some(ready_tx) = self.ready_tx.take() {
            // The pool stops listening only when it gave up on the run.
            let _ = ready_tx.send(());
        }
    }
}

/// Handle to a started [`DumpWorker`].
#[derive(Debug)]
pub struct DumpWorkerHandle {
    id: usize,
    state_rx: watch::Receiver<WorkerState>,
    handle: Option<JoinHandle<DumpResult<()>>>,
}

impl DumpWorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl WorkerHandle<WorkerState> for DumpWorkerHandle {
    fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    async fn wait(mut self) -> DumpResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| join_error(self.id, err))??;

        Ok(())
    }
}

fn join_error(id: usize, err: tokio::task::JoinError) -> DumpError {
    if err.is_cancelled() {
        dump_error!(
            ErrorKind::WorkerCancelled,
            "Dump worker was cancelled",
            format!("worker {id}: {err}")
        )
    } else {
        dump_error!(
            ErrorKind::WorkerPanic,
            "Dump worker panicked",
            format!("worker {id}: {err}")
        )
    }
}

/// Worker owning one server session and consuming the queue of its pass.
#[derive(Debug)]
pub struct DumpWorker<K, E> {
    id: usize,
    phase: WorkerPhase,
    context: Arc<RunContext>,
    connector: Arc<K>,
    executor: Arc<E>,
    snapshot: Arc<SnapshotPlan>,
}

impl<K, E> DumpWorker<K, E> {
    pub fn new(
        id: usize,
        phase: WorkerPhase,
        context: Arc<RunContext>,
        connector: Arc<K>,
        executor: Arc<E>,
        snapshot: Arc<SnapshotPlan>,
    ) -> Self {
        Self {
            id,
            phase,
            context,
            connector,
            executor,
            snapshot,
        }
    }
}

impl<K, E> Worker<DumpWorkerHandle, WorkerState> for DumpWorker<K, E>
where
    K: Connector,
    E: JobExecutor<K::Connection>,
{
    type Error = DumpError;

    /// Spawns the worker and waits for its readiness signal.
    ///
    /// A worker that cannot open its session or join the snapshot never signals readiness; its
    /// error is returned instead.
    async fn start(self) -> Result<DumpWorkerHandle, Self::Error> {
        let id = self.id;
        let (slot, ready_rx) = WorkerSlot::new(id, self.phase);
        let (state_tx, state_rx) = watch::channel(WorkerState::Starting);

        let span = tracing::info_span!("dump_worker", worker_id = id, phase = %self.phase);
        let worker = async move {
            let result = self.run(slot, &state_tx).await;
            state_tx.send_replace(WorkerState::Terminated);

            result
        }
        .instrument(span.or_current());

        let handle = tokio::spawn(worker);

        if ready_rx.await.is_err() {
            return match handle.await {
                Ok(Err(err)) => Err(err),
                Ok(Ok(())) => Err(dump_error!(
                    ErrorKind::WorkerStartupFailed,
                    "Dump worker stopped before signaling readiness",
                    format!("worker {id}")
                )),
                Err(err) => Err(join_error(id, err)),
            };
        }

        Ok(DumpWorkerHandle {
            id,
            state_rx,
            handle: Some(handle),
        })
    }
}

/// Non-transactional units of the job a worker is processing.
///
/// Dropped without [`PendingUnits::complete`], the job panicked or its task was aborted. The units
/// will never complete, so the run is cancelled and the lock release signal fired.
struct PendingUnits<'a> {
    context: &'a RunContext,
    units: usize,
    completed: bool,
}

impl<'a> PendingUnits<'a> {
    fn new(context: &'a RunContext, units: usize) -> Self {
        Self {
            context,
            units,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
        self.context.tracker().complete(self.units);
    }
}

impl Drop for PendingUnits<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        error!(units = self.units, "job did not complete, cancelling the run");
        self.context.shutdown_tx().shutdown();
        self.context.tracker().abandon();
    }
}

impl<K, E> DumpWorker<K, E>
where
    K: Connector,
    E: JobExecutor<K::Connection>,
{
    async fn run(
        self,
        mut slot: WorkerSlot,
        state_tx: &watch::Sender<WorkerState>,
    ) -> DumpResult<()> {
        let mut connection = self.connector.connect().await.map_err(|err| {
            dump_error!(
                ErrorKind::WorkerStartupFailed,
                "Dump worker could not connect",
                err.to_string(),
                source: err
            )
        })?;

        // Pre-pass workers lock their batches explicitly instead of joining the snapshot.
        if slot.phase() == WorkerPhase::Main {
            self.snapshot.bind_worker(&mut connection).await?;
        }

        let Some(queue) = slot.queue(&self.context) else {
            bail!(
                ErrorKind::InvalidState,
                "No queue for the worker's pass",
                format!("phase {}", slot.phase())
            );
        };

        state_tx.send_replace(WorkerState::Ready);
        slot.signal_ready();
        debug!("dump worker ready");

        let mut pause_rx = self.context.pause_tx().subscribe();
        let mut shutdown_rx = self.context.shutdown_rx();
        let mut processed = 0usize;

        state_tx.send_replace(WorkerState::Running);

        loop {
            wait_resumed(&mut pause_rx, &mut shutdown_rx).await;

            let Some(job) = queue.pop().await else {
                debug!("queue closed without a shutdown job");
                break;
            };

            if matches!(job, Job::Shutdown) {
                break;
            }

            let pending = PendingUnits::new(&self.context, job.non_transactional_units());

            if is_cancelled(&shutdown_rx) {
                state_tx.send_if_modified(|state| {
                    let changed = *state != WorkerState::Draining;
                    *state = WorkerState::Draining;
                    changed
                });
                debug!(job = %job, "run cancelled, skipping job");
            } else {
                self.process(&mut connection, &job).await;
                processed += 1;
            }

            pending.complete();
        }

        info!(processed, "dump worker finished");

        Ok(())
    }

    async fn process(&self, connection: &mut K::Connection, job: &Job) {
        match job {
            Job::DumpTable(table) => {
                if !table.mark_dumped() {
                    debug!(table = %table.name(), "table already dumped");
                    return;
                }

                self.execute(connection, job).await;
            }
            Job::DumpTableBatch(tables) => self.process_batch(connection, tables).await,
            Job::Shutdown => {}
            _ => self.execute(connection, job).await,
        }
    }

    /// Copies a batch of non-transactional tables under a lock held by this session only.
    async fn process_batch(
        &self,
        connection: &mut K::Connection,
        tables: &[Arc<TableDescriptor>],
    ) {
        let statement = lock_tables_statement(tables.iter().map(|table| table.name()));
        if let Err(err) = connection.execute(&statement).await {
            error!(tables = tables.len(), error = %err, "could not lock batch, skipping it");
            self.context.errors().increment();
            return;
        }

        for table in tables {
            if !table.mark_dumped() {
                continue;
            }

            self.execute(connection, &Job::DumpTable(table.clone())).await;
        }

        if let Err(err) = connection.execute("UNLOCK TABLES").await {
            error!(error = %err, "could not unlock batch");
            self.context.errors().increment();
        }
    }

    async fn execute(&self, connection: &mut K::Connection, job: &Job) {
        if let Err(err) = self.executor.execute(connection, job, &self.context).await {
            error!(job = %job, error = %err, "job failed");
            self.context.errors().increment();
        }
    }
}
