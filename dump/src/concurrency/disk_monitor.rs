use std::io;
use std::path::PathBuf;
use std::time::Duration;

use config::shared::DiskLimitsConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::concurrency::pause::{PauseReason, PauseTx};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Source of free space samples for the output directory.
pub trait FreeSpaceProbe: Send + 'static {
    /// Returns the free space available to the dump, in MiB.
    fn free_space_mb(&mut self) -> io::Result<u64>;
}

/// Reads the free space of the filesystem holding a directory.
#[derive(Debug, Clone)]
pub struct FsProbe {
    path: PathBuf,
}

impl FsProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FreeSpaceProbe for FsProbe {
    fn free_space_mb(&mut self) -> io::Result<u64> {
        fs2::available_space(&self.path).map(|bytes| bytes / BYTES_PER_MB)
    }
}

/// Background loop pausing every worker while the output directory is low on space.
///
/// The monitor starts in the running state. It pauses the workers at the first sample below
/// `pause_at_mb` and resumes them at the first sample above `resume_at_mb`. It has no other exit
/// than [`DiskSpaceMonitor::disable`].
#[derive(Debug)]
pub struct DiskSpaceMonitor {
    disable_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DiskSpaceMonitor {
    /// Spawns the monitor loop.
    pub fn start<P>(mut probe: P, limits: DiskLimitsConfig, pause_tx: PauseTx) -> Self
    where
        P: FreeSpaceProbe,
    {
        let (disable_tx, mut disable_rx) = watch::channel(false);

        info!(
            pause_at_mb = limits.pause_at_mb,
            resume_at_mb = limits.resume_at_mb,
            "starting disk space monitor"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(limits.poll_interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut running = true;

            loop {
                tokio::select! {
                    biased;

                    _ = disable_rx.changed() => {
                        info!("disk space monitor disabled");

                        return;
                    }

                    _ = ticker.tick() => {
                        let free_mb = match probe.free_space_mb() {
                            Ok(free_mb) => free_mb,
                            Err(err) => {
                                warn!(error = %err, "could not read free disk space, assuming enough space");
                                continue;
                            }
                        };

                        let next_running = compute_next_running(
                            running,
                            free_mb,
                            limits.pause_at_mb,
                            limits.resume_at_mb,
                        );

                        debug!(free_mb, running, next_running, "disk space monitor sampled free space");

                        if next_running == running {
                            continue;
                        }

                        if next_running {
                            info!(free_mb, resume_at_mb = limits.resume_at_mb, "enough disk space, resuming workers");
                            pause_tx.resume(PauseReason::DiskSpace);
                        } else {
                            warn!(free_mb, pause_at_mb = limits.pause_at_mb, "low disk space, pausing workers");
                            pause_tx.pause(PauseReason::DiskSpace);
                        }

                        running = next_running;
                    }
                }
            }
        });

        Self { disable_tx, handle }
    }

    /// Stops the monitor and waits for its task to finish.
    ///
    /// A pause held by the monitor stays held; the run tears down the pause channel anyway.
    pub async fn disable(self) {
        self.disable_tx.send_replace(true);

        if let Err(err) = self.handle.await {
            warn!(error = %err, "disk space monitor task did not finish cleanly");
        }
    }
}

/// Computes the next running state from the current one and a free space sample.
fn compute_next_running(running: bool, free_mb: u64, pause_at_mb: u64, resume_at_mb: u64) -> bool {
    if running {
        return free_mb >= pause_at_mb;
    }

    free_mb > resume_at_mb
}
