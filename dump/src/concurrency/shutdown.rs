//! Cooperative cancellation for a dump run.
//!
//! Cancellation is a flag that only ever moves from `false` to `true`. Long running loops check it
//! at their top and before retry sleeps; in-flight queries are never interrupted.

use tokio::sync::watch;

/// Transmitter side of the cancellation channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Wraps a watch sender into a [`ShutdownTx`].
    pub fn new(tx: watch::Sender<bool>) -> Self {
        Self(tx)
    }

    /// Requests cancellation of the run.
    ///
    /// Returns `true` only for the call that flipped the flag.
    pub fn shutdown(&self) -> bool {
        self.0.send_if_modified(|cancelled| {
            if *cancelled {
                return false;
            }

            *cancelled = true;

            true
        })
    }

    /// Returns whether cancellation has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Creates a new cancellation receiver.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiver side of the cancellation channel.
pub type ShutdownRx = watch::Receiver<bool>;

/// Creates a new cancellation channel in the "not cancelled" state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx::new(tx), rx)
}

/// Returns whether cancellation was requested, without waiting.
pub fn is_cancelled(shutdown_rx: &ShutdownRx) -> bool {
    *shutdown_rx.borrow()
}

/// Waits until cancellation is requested.
///
/// Never completes when the sender is dropped without cancelling.
pub async fn cancelled(shutdown_rx: &mut ShutdownRx) {
    if shutdown_rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
