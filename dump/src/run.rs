//! One dump run from the first connection to the finalized journal.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use config::shared::DumpConfig;
use tracing::{Instrument, error, info, info_span, warn};

use crate::client::Connector;
use crate::concurrency::disk_monitor::{DiskSpaceMonitor, FsProbe};
use crate::concurrency::pause::{PauseTx, create_pause_channel};
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::concurrency::signal::wait_fired;
use crate::context::RunContext;
use crate::control::ShutdownCoordinator;
use crate::discovery::Discovery;
use crate::error::{DumpError, DumpResult, ErrorKind};
use crate::journal::MetadataJournal;
use crate::lock::{LockCoordinator, LockMode};
use crate::not_updated::collect_not_updated_tables;
use crate::replication::read_replication_snapshot;
use crate::scheduler::{DispatchSummary, JobScheduler};
use crate::server::{ServerKind, detect_server};
use crate::snapshot::SnapshotPlan;
use crate::workers::executor::JobExecutor;
use crate::workers::pool::WorkerPool;
use crate::workers::worker::WorkerPhase;
use crate::{bail, dump_error};

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Recoverable errors counted during the run.
    pub error_count: usize,
    pub lock_mode: LockMode,
    pub dispatch: DispatchSummary,
    /// Path of the finalized journal.
    pub journal_path: PathBuf,
}

/// Orchestrates a dump run.
///
/// Server connections come from `connector`, the objects to dump from `discovery`, and the job
/// output is written by `executor`. The pause and shutdown transmitters are created with the run
/// so that callers can wire their own controls before starting it.
#[derive(Debug)]
pub struct DumpRun<K, D, E> {
    config: Arc<DumpConfig>,
    connector: Arc<K>,
    discovery: Arc<D>,
    executor: Arc<E>,
    pause_tx: PauseTx,
    shutdown_tx: ShutdownTx,
    process_signals: bool,
}

impl<K, D, E> DumpRun<K, D, E>
where
    K: Connector,
    D: Discovery<K::Connection>,
    E: JobExecutor<K::Connection>,
{
    pub fn new(config: DumpConfig, connector: K, discovery: D, executor: E) -> Self {
        let (pause_tx, _) = create_pause_channel();
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
            discovery: Arc::new(discovery),
            executor: Arc::new(executor),
            pause_tx,
            shutdown_tx,
            process_signals: false,
        }
    }

    /// Handles SIGINT and SIGTERM for the duration of the run, prompting on the terminal.
    pub fn with_process_signals(mut self) -> Self {
        self.process_signals = true;
        self
    }

    pub fn pause_tx(&self) -> &PauseTx {
        &self.pause_tx
    }

    pub fn shutdown_tx(&self) -> &ShutdownTx {
        &self.shutdown_tx
    }

    /// Runs the dump.
    ///
    /// Fatal errors and cancellation are returned as errors and leave `metadata.partial` behind.
    /// Counted errors are reported in the summary.
    pub async fn run(self) -> DumpResult<RunSummary> {
        let span = info_span!(
            "dump_run",
            output_directory = %self.config.output_directory.display(),
            threads = self.config.threads
        );

        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> DumpResult<RunSummary> {
        self.config.validate()?;

        let mut main = self.connector.connect().await.map_err(|err| {
            dump_error!(
                ErrorKind::ServerConnectionFailed,
                "Could not connect to the server",
                err.to_string(),
                source: err
            )
        })?;

        let server = detect_server(&mut main).await?;
        info!(kind = %server.kind, version = %server.version, "server detected");

        let journal = MetadataJournal::open(&self.config.output_directory).await?;

        let not_updated_tables = match self.config.updated_since_days {
            Some(days) => {
                collect_not_updated_tables(&mut main, days, &self.config.output_directory).await?
            }
            None => Vec::new(),
        };

        let context = Arc::new(RunContext::new(
            self.config.clone(),
            server,
            not_updated_tables,
            self.pause_tx.clone(),
            self.shutdown_tx.clone(),
        ));

        let disk_monitor = self.config.disk_limits.clone().map(|limits| {
            DiskSpaceMonitor::start(
                FsProbe::new(self.config.output_directory.clone()),
                limits,
                self.pause_tx.clone(),
            )
        });
        let coordinator = self.start_coordinator();

        let result = self.execute(main, &context, journal).await;

        if let Some(coordinator) = coordinator {
            coordinator.stop().await;
        }
        if let Some(disk_monitor) = disk_monitor {
            disk_monitor.disable().await;
        }

        match &result {
            Ok(summary) => info!(
                error_count = summary.error_count,
                journal = %summary.journal_path.display(),
                "dump finished"
            ),
            Err(err) if err.kind() == ErrorKind::OperationCanceled => {
                warn!("dump cancelled, the run journal was left partial")
            }
            Err(err) => error!(error = %err, "dump failed"),
        }

        result
    }

    async fn execute(
        &self,
        mut main: K::Connection,
        context: &Arc<RunContext>,
        mut journal: MetadataJournal,
    ) -> DumpResult<RunSummary> {
        let config = context.config();
        let server = context.server().clone();
        let locks = LockCoordinator::new(&config.lock, context.errors());

        let mut shutdown_rx = context.shutdown_rx();
        let lock = locks
            .acquire(&mut main, &server, self.discovery.as_ref(), &mut shutdown_rx)
            .await?;
        let lock_mode = lock.mode().clone();

        let snapshot = Arc::new(
            SnapshotPlan::establish(
                &mut main,
                &server,
                config.snapshot_token.as_deref(),
                lock.holds_table_locks(),
            )
            .await?,
        );

        journal.write_started(Local::now()).await?;
        if server.kind == ServerKind::MySql {
            let info = read_replication_snapshot(&mut main).await;
            journal.write_snapshot_info(&info).await?;
        }

        let worker_count = context.worker_count();

        let pre_pass = match context.less_locking_queue() {
            Some(_) => Some(
                WorkerPool::start(
                    WorkerPhase::LessLocking,
                    context,
                    &self.connector,
                    &self.executor,
                    &snapshot,
                )
                .await?,
            ),
            None => None,
        };

        let main_pool = match WorkerPool::start(
            WorkerPhase::Main,
            context,
            &self.connector,
            &self.executor,
            &snapshot,
        )
        .await
        {
            Ok(pool) => pool,
            Err(err) => {
                if let (Some(pool), Some(queue)) = (pre_pass, context.less_locking_queue()) {
                    queue.shutdown(pool.len());
                    if let Err(join_err) = pool.wait_all().await {
                        error!(error = %join_err, "pre-pass workers failed while stopping");
                    }
                }

                return Err(err);
            }
        };

        let mut lock = Some(lock);
        if config.trx_consistency_only
            && let Some(lock) = lock.take()
        {
            locks.release(&mut main, lock).await;
            warn!(
                "locks released once every worker joined the snapshot, replication coordinates are only accurate for transactional tables"
            );
        }

        let scheduler = JobScheduler::new(context.clone());
        let mut failure: Option<DumpError> = None;

        match self.discovery.discover(&mut main, &scheduler).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::OperationCanceled => {
                info!("discovery stopped by cancellation");
            }
            Err(err) => {
                error!(error = %err, "discovery failed, stopping the workers");
                context.shutdown_tx().shutdown();
                failure = Some(err);
            }
        }

        let (dispatch, dispatched) = match scheduler.dispatch() {
            Ok(dispatch) => (dispatch, true),
            Err(err) => {
                error!(error = %err, "dispatch failed, stopping the workers");
                context.shutdown_tx().shutdown();
                failure.get_or_insert(err);
                (DispatchSummary::default(), false)
            }
        };
        info!(
            non_transactional_tables = dispatch.non_transactional_tables,
            transactional_tables = dispatch.transactional_tables,
            views = dispatch.views,
            "jobs dispatched"
        );

        if let Some(queue) = context.less_locking_queue() {
            queue.shutdown(worker_count);
        }

        if let Some(lock) = lock.take() {
            // Units never enqueued by a failed dispatch would hold the release forever.
            if dispatched {
                let mut release_rx = context.tracker().release_rx();
                wait_fired(&mut release_rx).await;
            }

            locks.release(&mut main, lock).await;
        }

        drop(main);

        let mut worker_errors = Vec::new();
        if let Some(pool) = pre_pass
            && let Err(err) = pool.wait_all().await
        {
            worker_errors.push(err);
        }

        context.main_queue().shutdown(worker_count);
        if let Err(err) = main_pool.wait_all().await {
            worker_errors.push(err);
        }

        if let Some(err) = failure {
            return Err(err);
        }

        if !worker_errors.is_empty() {
            return Err(worker_errors.into());
        }

        if context.is_cancelled() {
            bail!(
                ErrorKind::OperationCanceled,
                "Dump cancelled",
                format!("journal left at {}", journal.partial_path().display())
            );
        }

        for table in context.registered_tables() {
            if let Err(err) = self.executor.write_table_metadata(&table, context).await {
                error!(table = %table.name(), error = %err, "could not write table metadata");
                context.errors().increment();
            }
        }

        let journal_path = journal.finalize(Local::now()).await?;

        Ok(RunSummary {
            error_count: context.errors().get(),
            lock_mode,
            dispatch,
            journal_path,
        })
    }

    #[cfg(unix)]
    fn start_coordinator(&self) -> Option<ShutdownCoordinator> {
        if !self.process_signals {
            return None;
        }

        match crate::control::start_process_coordinator(
            self.config.daemon_mode,
            self.pause_tx.clone(),
            self.shutdown_tx.clone(),
        ) {
            Ok(coordinator) => Some(coordinator),
            Err(err) => {
                warn!(error = %err, "could not install signal handlers");
                None
            }
        }
    }

    #[cfg(not(unix))]
    fn start_coordinator(&self) -> Option<ShutdownCoordinator> {
        if self.process_signals {
            warn!("signal handling is only supported on unix");
        }

        None
    }
}
