use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use config::shared::DumpConfig;

use crate::concurrency::pause::PauseTx;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx};
use crate::scheduler::NonTransactionalTracker;
use crate::server::ServerInfo;
use crate::types::{DatabaseDescriptor, QualifiedTableName, TableDescriptor};
use crate::workers::queue::JobQueue;

/// Number of recoverable errors seen during a run.
///
/// Counted errors never stop the run; they are reported in the run summary.
#[derive(Debug, Default)]
pub struct ErrorCounter(AtomicUsize);

impl ErrorCounter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Objects found by discovery whose jobs are enqueued only once discovery completes.
#[derive(Debug, Default)]
pub(crate) struct StagedObjects {
    pub(crate) tables: Vec<Arc<TableDescriptor>>,
    pub(crate) views: Vec<Arc<TableDescriptor>>,
    pub(crate) post_schemas: Vec<Arc<DatabaseDescriptor>>,
}

/// State shared by every component of one dump run.
///
/// Created when the run starts and dropped after the journal is finalized. Jobs do not point back
/// to it; workers hand it to the executor alongside each job instead.
#[derive(Debug)]
pub struct RunContext {
    config: Arc<DumpConfig>,
    server: ServerInfo,
    main_queue: JobQueue,
    less_locking_queue: Option<JobQueue>,
    tracker: NonTransactionalTracker,
    staged: Mutex<StagedObjects>,
    tables: Mutex<Vec<Arc<TableDescriptor>>>,
    not_updated_tables: Vec<QualifiedTableName>,
    pause_tx: PauseTx,
    shutdown_tx: ShutdownTx,
    errors: ErrorCounter,
}

impl RunContext {
    pub fn new(
        config: Arc<DumpConfig>,
        server: ServerInfo,
        not_updated_tables: Vec<QualifiedTableName>,
        pause_tx: PauseTx,
        shutdown_tx: ShutdownTx,
    ) -> Self {
        let less_locking_queue = config
            .less_locking_enabled()
            .then(|| JobQueue::new("less_locking"));

        Self {
            config,
            server,
            main_queue: JobQueue::new("main"),
            less_locking_queue,
            tracker: NonTransactionalTracker::new(),
            staged: Mutex::new(StagedObjects::default()),
            tables: Mutex::new(Vec::new()),
            not_updated_tables,
            pause_tx,
            shutdown_tx,
            errors: ErrorCounter::default(),
        }
    }

    pub fn config(&self) -> &DumpConfig {
        &self.config
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    /// Number of workers in each pool.
    pub fn worker_count(&self) -> usize {
        usize::from(self.config.threads)
    }

    pub fn main_queue(&self) -> &JobQueue {
        &self.main_queue
    }

    /// Queue served by the reduced-locking pre-pass, present only when that mode is active.
    pub fn less_locking_queue(&self) -> Option<&JobQueue> {
        self.less_locking_queue.as_ref()
    }

    pub fn tracker(&self) -> &NonTransactionalTracker {
        &self.tracker
    }

    /// Tables whose last update is older than the configured threshold.
    pub fn not_updated_tables(&self) -> &[QualifiedTableName] {
        &self.not_updated_tables
    }

    pub fn pause_tx(&self) -> &PauseTx {
        &self.pause_tx
    }

    pub fn shutdown_tx(&self) -> &ShutdownTx {
        &self.shutdown_tx
    }

    pub fn shutdown_rx(&self) -> ShutdownRx {
        self.shutdown_tx.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown_tx.is_shutdown()
    }

    pub fn errors(&self) -> &ErrorCounter {
        &self.errors
    }

    /// Every table registered by discovery, in discovery order.
    pub fn registered_tables(&self) -> Vec<Arc<TableDescriptor>> {
        lock(&self.tables).clone()
    }

    pub(crate) fn register_table(&self, table: Arc<TableDescriptor>) {
        lock(&self.tables).push(table);
    }

    pub(crate) fn staged(&self) -> MutexGuard<'_, StagedObjects> {
        lock(&self.staged)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
