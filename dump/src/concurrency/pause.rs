use std::fmt;

use tokio::sync::watch;

use crate::concurrency::shutdown::ShutdownRx;

/// Party holding a worker pause.
///
/// Each reason is held and released independently, so the operator resuming from an interrupt
/// prompt never releases a pause the disk monitor still needs, and the other way around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Free space on the output directory is below the pause threshold.
    DiskSpace,
    /// The operator interrupted the run and has not answered the prompt yet.
    Operator,
}

impl PauseReason {
    fn bit(self) -> u8 {
        match self {
            PauseReason::DiskSpace => 0b01,
            PauseReason::Operator => 0b10,
        }
    }
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseReason::DiskSpace => f.write_str("disk space"),
            PauseReason::Operator => f.write_str("operator"),
        }
    }
}

/// Set of reasons currently holding the workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PauseState(u8);

impl PauseState {
    /// Returns whether any reason holds the workers.
    pub fn is_paused(&self) -> bool {
        self.0 != 0
    }

    /// Returns whether `reason` holds the workers.
    pub fn contains(&self, reason: PauseReason) -> bool {
        self.0 & reason.bit() != 0
    }
}

/// Transmitter side of the pause channel.
///
/// Workers only look at the pause state between jobs, so engaging it never interrupts a job
/// in progress.
#[derive(Debug, Clone)]
pub struct PauseTx(watch::Sender<PauseState>);

impl PauseTx {
    /// Wraps a watch sender into a [`PauseTx`].
    pub fn new(tx: watch::Sender<PauseState>) -> Self {
        Self(tx)
    }

    /// Holds the workers for `reason`.
    ///
    /// Returns `true` when the reason was not already held.
    pub fn pause(&self, reason: PauseReason) -> bool {
        self.0.send_if_modified(|state| {
            if state.contains(reason) {
                return false;
            }

            state.0 |= reason.bit();

            true
        })
    }

    /// Releases the hold for `reason`. Workers resume once no reason is held.
    ///
    /// Returns `true` when the reason was held.
    pub fn resume(&self, reason: PauseReason) -> bool {
        self.0.send_if_modified(|state| {
            if !state.contains(reason) {
                return false;
            }

            state.0 &= !reason.bit();

            true
        })
    }

    /// Returns the current pause state.
    pub fn state(&self) -> PauseState {
        *self.0.borrow()
    }

    /// Creates a new pause receiver subscription.
    pub fn subscribe(&self) -> PauseRx {
        self.0.subscribe()
    }
}

/// Receiver side of the pause channel.
pub type PauseRx = watch::Receiver<PauseState>;

/// Creates a new pause channel with no reason held.
pub fn create_pause_channel() -> (PauseTx, PauseRx) {
    let (tx, rx) = watch::channel(PauseState::default());
    (PauseTx::new(tx), rx)
}

/// Waits until no reason holds the workers or the run is cancelled.
///
/// Returns immediately when the workers are not paused.
pub async fn wait_resumed(pause_rx: &mut PauseRx, shutdown_rx: &mut ShutdownRx) {
    if !pause_rx.borrow().is_paused() {
        return;
    }

    tokio::select! {
        biased;

        _ = crate::concurrency::shutdown::cancelled(shutdown_rx) => {}
        // A dropped transmitter can never resume anyone, so stop waiting.
        _ = pause_rx.wait_for(|state| !state.is_paused()) => {}
    }
}
