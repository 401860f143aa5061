use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Notify, watch};

use crate::bail;
use crate::client::DumpConnection;
use crate::context::RunContext;
use crate::error::{DumpResult, ErrorKind};
use crate::test_utils::notify::TimedNotify;
use crate::test_utils::server::MockConnection;
use crate::types::TableDescriptor;
use crate::workers::executor::JobExecutor;
use crate::workers::job::Job;

#[derive(Debug, Default)]
struct Records {
    executed: Vec<(usize, String)>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    metadata: Vec<String>,
}

#[derive(Debug)]
struct Inner {
    records: Mutex<Records>,
    gate: watch::Sender<bool>,
    started: Arc<Notify>,
}

/// Executor recording every job it runs, with the session that ran it.
///
/// Table jobs read their table on the session so that the server log shows the copy. A gated
/// executor holds every job until [`RecordingExecutor::open_gate`] is called.
#[derive(Debug, Clone)]
pub struct RecordingExecutor {
    inner: Arc<Inner>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::with_gate(true)
    }

    /// Creates an executor holding every job until the gate opens.
    pub fn gated() -> Self {
        Self::with_gate(false)
    }

    fn with_gate(open: bool) -> Self {
        let (gate, _) = watch::channel(open);

        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(Records::default()),
                gate,
                started: Arc::new(Notify::new()),
            }),
        }
    }

    /// Fails the job whose label is `label`.
    pub fn fail_on(&self, label: &str) {
        self.records().failing.insert(label.to_owned());
    }

    /// Panics in the job whose label is `label`, after recording it.
    pub fn panic_on(&self, label: &str) {
        self.records().panicking.insert(label.to_owned());
    }

    pub fn open_gate(&self) {
        self.inner.gate.send_replace(true);
    }

    /// Notified when a job starts, before the gate is checked.
    ///
    /// A start without a waiter is remembered for the next one.
    pub fn started(&self) -> TimedNotify {
        TimedNotify::new(self.inner.started.clone())
    }

    /// Labels of the executed jobs, in execution order.
    pub fn executed(&self) -> Vec<String> {
        self.records()
            .executed
            .iter()
            .map(|(_, label)| label.clone())
            .collect()
    }

    /// Executed jobs with the id of the session that ran them.
    pub fn executed_by(&self) -> Vec<(usize, String)> {
        self.records().executed.clone()
    }

    /// Tables whose metadata file was written.
    pub fn metadata_written(&self) -> Vec<String> {
        self.records().metadata.clone()
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl JobExecutor<MockConnection> for RecordingExecutor {
    async fn execute(
        &self,
        connection: &mut MockConnection,
        job: &Job,
        _context: &RunContext,
    ) -> DumpResult<()> {
        self.inner.started.notify_one();

        let mut gate = self.inner.gate.subscribe();
        // The sender lives as long as the executor.
        let _ = gate.wait_for(|open| *open).await;

        let label = job.to_string();
        let (failing, panicking) = {
            let mut records = self.records();
            records.executed.push((connection.id(), label.clone()));
            (
                records.failing.contains(&label),
                records.panicking.contains(&label),
            )
        };

        if panicking {
            panic!("scripted panic in job {label}");
        }

        match job {
            Job::DumpTable(table) => {
                connection
                    .query(&format!(
                        "SELECT /*!40001 SQL_NO_CACHE */ * FROM {}",
                        table.name().quoted()
                    ))
                    .await?;
            }
            Job::DumpChecksum(table) => {
                connection
                    .query(&format!("CHECKSUM TABLE {}", table.name().quoted()))
                    .await?;
            }
            _ => {}
        }

        if failing {
            bail!(ErrorKind::JobFailed, "Scripted job failure", label);
        }

        Ok(())
    }

    async fn write_table_metadata(
        &self,
        table: &TableDescriptor,
        _context: &RunContext,
    ) -> DumpResult<()> {
        self.records().metadata.push(table.name().to_string());

        Ok(())
    }
}
