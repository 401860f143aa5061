use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use crate::bail;
use crate::error::{DumpResult, ErrorKind};
use crate::workers::job::Job;

/// Unbounded FIFO queue shared by the producers of a pass and the workers serving it.
///
/// Closing the queue appends one [`Job::Shutdown`] per worker under the same lock that guards
/// pushes, so no job can ever land behind them.
#[derive(Debug)]
pub struct JobQueue {
    name: &'static str,
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>,
}

impl JobQueue {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            name,
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Appends a job.
    ///
    /// Fails once the queue was shut down or closed.
    pub fn push(&self, job: Job) -> DumpResult<()> {
        let tx = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(tx) = tx.as_ref() else {
            bail!(
                ErrorKind::QueueClosed,
                "Job pushed to a closed queue",
                format!("queue `{}`, job {job}", self.name)
            );
        };

        if tx.send(job).is_err() {
            bail!(
                ErrorKind::QueueClosed,
                "Job pushed to a queue without consumers",
                format!("queue `{}`", self.name)
            );
        }

        Ok(())
    }

    /// Appends exactly `workers` shutdown jobs and closes the queue.
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&self, workers: usize) {
        let mut tx = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sender) = tx.take() else {
            return;
        };

        for _ in 0..workers {
            // The receiver lives as long as the queue.
            let _ = sender.send(Job::Shutdown);
        }

        debug!(queue = self.name, workers, "queue shut down");
    }

    /// Closes the queue without shutdown jobs. Workers stop once the remaining jobs are drained.
    pub fn close(&self) {
        let mut tx = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tx.take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Waits for the next job.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Job> {
        self.rx.lock().await.recv().await
    }
}
