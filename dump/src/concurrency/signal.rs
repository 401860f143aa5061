//! One-shot coordination signals.
//!
//! The lock release signal must fire exactly once per run no matter how many tasks race to
//! produce it. [`OnceSignalTx::fire`] reports which caller won.

use tokio::sync::watch;

/// Transmitter side of a one-shot signal.
#[derive(Debug, Clone)]
pub struct OnceSignalTx(watch::Sender<bool>);

impl OnceSignalTx {
    /// Fires the signal.
    ///
    /// Returns `true` for the single call that fired it and `false` for every later call.
    pub fn fire(&self) -> bool {
        self.0.send_if_modified(|fired| {
            if *fired {
                return false;
            }

            *fired = true;

            true
        })
    }

    /// Returns whether the signal has fired.
    pub fn has_fired(&self) -> bool {
        *self.0.borrow()
    }

    /// Creates a new receiver for this signal.
    pub fn subscribe(&self) -> OnceSignalRx {
        self.0.subscribe()
    }
}

/// Receiver side of a one-shot signal.
pub type OnceSignalRx = watch::Receiver<bool>;

/// Creates a one-shot signal in the "not fired" state.
pub fn create_once_signal() -> (OnceSignalTx, OnceSignalRx) {
    let (tx, rx) = watch::channel(false);
    (OnceSignalTx(tx), rx)
}

/// Waits until the signal fires.
///
/// Returns `false` when every transmitter was dropped before firing.
pub async fn wait_fired(rx: &mut OnceSignalRx) -> bool {
    rx.wait_for(|fired| *fired).await.is_ok()
}
