use std::sync::Arc;

use tracing::{debug, error, info};

use crate::client::Connector;
use crate::context::RunContext;
use crate::error::DumpResult;
use crate::snapshot::SnapshotPlan;
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::executor::JobExecutor;
use crate::workers::worker::{DumpWorker, DumpWorkerHandle, WorkerPhase, WorkerState};

/// Fixed set of workers serving one queue.
///
/// Workers are started one after the other and each is waited on until ready, so that a started
/// pool means every session already joined the snapshot.
#[derive(Debug)]
pub struct WorkerPool {
    phase: WorkerPhase,
    handles: Vec<DumpWorkerHandle>,
}

impl WorkerPool {
    /// Starts `context.worker_count()` workers for `phase`.
    ///
    /// Main workers take ids `1..=n` and pre-pass workers `n+1..=2n`. When a worker fails to
    /// start, the phase's queue is closed, the workers already started are joined, and the
    /// startup error is returned.
    pub async fn start<K, E>(
        phase: WorkerPhase,
        context: &Arc<RunContext>,
        connector: &Arc<K>,
        executor: &Arc<E>,
        snapshot: &Arc<SnapshotPlan>,
    ) -> DumpResult<Self>
    where
        K: Connector,
        E: JobExecutor<K::Connection>,
    {
        let count = context.worker_count();
        let first_id = match phase {
            WorkerPhase::Main => 1,
            WorkerPhase::LessLocking => count + 1,
        };

        let mut pool = Self {
            phase,
            handles: Vec::with_capacity(count),
        };

        for id in first_id..first_id + count {
            let worker = DumpWorker::new(
                id,
                phase,
                context.clone(),
                connector.clone(),
                executor.clone(),
                snapshot.clone(),
            );

            match worker.start().await {
                Ok(handle) => {
                    debug!(worker_id = id, %phase, "worker started");
                    pool.handles.push(handle);
                }
                Err(err) => {
                    error!(worker_id = id, %phase, error = %err, "worker failed to start");

                    let queue = match phase {
                        WorkerPhase::Main => Some(context.main_queue()),
                        WorkerPhase::LessLocking => context.less_locking_queue(),
                    };
                    if let Some(queue) = queue {
                        queue.close();
                    }

                    if let Err(join_err) = pool.wait_all().await {
                        error!(%phase, error = %join_err, "started workers failed while stopping");
                    }

                    return Err(err);
                }
            }
        }

        info!(%phase, workers = count, "worker pool ready");

        Ok(pool)
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Current state of every worker, in id order.
    pub fn states(&self) -> Vec<(usize, WorkerState)> {
        self.handles
            .iter()
            .map(|handle| (handle.id(), handle.state()))
            .collect()
    }

    /// Waits for every worker to terminate.
    ///
    /// Errors from all workers are collected; several are returned aggregated.
    pub async fn wait_all(self) -> DumpResult<()> {
        let mut errors = Vec::new();

        for handle in self.handles {
            let id = handle.id();
            if let Err(err) = handle.wait().await {
                error!(worker_id = id, phase = %self.phase, error = %err, "worker completed with error");
                errors.push(err);
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        debug!(phase = %self.phase, "all workers terminated");

        Ok(())
    }
}
