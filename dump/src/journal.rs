//! Run journal recording when the dump started and finished and where the snapshot sits in the
//! replication stream.
//!
//! The journal is written to `metadata.partial` and renamed to `metadata` only once the run
//! completed, so a file named `metadata` always describes a finished dump.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::dump_error;
use crate::error::{DumpResult, ErrorKind};
use crate::types::ReplicationSnapshotInfo;

/// Name of the journal while the run is in progress.
pub const PARTIAL_JOURNAL_FILE_NAME: &str = "metadata.partial";

/// Name of the journal of a finished run.
pub const JOURNAL_FILE_NAME: &str = "metadata";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug)]
pub struct MetadataJournal {
    file: File,
    partial_path: PathBuf,
    final_path: PathBuf,
}

impl MetadataJournal {
    /// Creates `metadata.partial` in `output_directory`, truncating a leftover one.
    pub async fn open(output_directory: &Path) -> DumpResult<Self> {
        let partial_path = output_directory.join(PARTIAL_JOURNAL_FILE_NAME);
        let final_path = output_directory.join(JOURNAL_FILE_NAME);

        let file = File::create(&partial_path).await.map_err(|err| {
            dump_error!(
                ErrorKind::JournalOpenFailed,
                "Could not create the run journal",
                format!("{}: {err}", partial_path.display()),
                source: err
            )
        })?;

        debug!(path = %partial_path.display(), "run journal opened");

        Ok(Self {
            file,
            partial_path,
            final_path,
        })
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    pub async fn write_started(&mut self, at: DateTime<Local>) -> DumpResult<()> {
        self.write(&format!("Started dump at: {}\n", at.format(TIMESTAMP_FORMAT)))
            .await
    }

    pub async fn write_snapshot_info(&mut self, info: &ReplicationSnapshotInfo) -> DumpResult<()> {
        self.write(&format_snapshot_info(info)).await
    }

    /// Writes the finish line, syncs the file and renames it to `metadata`.
    pub async fn finalize(mut self, at: DateTime<Local>) -> DumpResult<PathBuf> {
        self.write(&format!("Finished dump at: {}\n", at.format(TIMESTAMP_FORMAT)))
            .await?;

        self.file.flush().await.map_err(write_error)?;
        self.file.sync_all().await.map_err(write_error)?;
        drop(self.file);

        fs::rename(&self.partial_path, &self.final_path)
            .await
            .map_err(|err| {
                dump_error!(
                    ErrorKind::JournalWriteFailed,
                    "Could not finalize the run journal",
                    format!(
                        "{} -> {}: {err}",
                        self.partial_path.display(),
                        self.final_path.display()
                    ),
                    source: err
                )
            })?;

        info!(path = %self.final_path.display(), "run journal finalized");

        Ok(self.final_path)
    }

    async fn write(&mut self, text: &str) -> DumpResult<()> {
        self.file
            .write_all(text.as_bytes())
            .await
            .map_err(write_error)?;
        // Each section is flushed so an interrupted run keeps what it recorded.
        self.file.flush().await.map_err(write_error)
    }
}

fn write_error(err: std::io::Error) -> crate::error::DumpError {
    dump_error!(
        ErrorKind::JournalWriteFailed,
        "Could not write the run journal",
        err.to_string(),
        source: err
    )
}

/// Renders the primary and replica coordinates as journal blocks.
pub fn format_snapshot_info(info: &ReplicationSnapshotInfo) -> String {
    let mut text = String::new();

    if let Some(primary) = &info.primary {
        let _ = write!(
            text,
            "SHOW MASTER STATUS:\n\tLog: {}\n\tPos: {}\n\tGTID:{}\n\n",
            primary.log_file,
            primary.position,
            primary.gtid.as_deref().unwrap_or_default()
        );
    }

    for replica in &info.replicas {
        text.push_str("SHOW SLAVE STATUS:");
        if info.multi_source {
            let _ = write!(
                text,
                "\n\tConnection name: {}",
                replica.connection_name.as_deref().unwrap_or_default()
            );
        }
        let _ = write!(
            text,
            "\n\tHost: {}\n\tLog: {}\n\tPos: {}\n\tGTID:{}\n\n",
            replica.host,
            replica.log_file,
            replica.position,
            replica.gtid.as_deref().unwrap_or_default()
        );
    }

    text
}
