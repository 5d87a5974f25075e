//! Shutdown signalling.
//!
//! Cancellation is a `watch` channel carrying `true` once shutdown has begun.
//! A dropped sender counts as shutdown.

use tokio::sync::watch;

/// Receiving half of a shutdown channel.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Create a shutdown channel in the running state.
pub fn channel() -> (watch::Sender<bool>, ShutdownSignal) {
    watch::channel(false)
}

/// Resolve once shutdown has been requested or the sender is gone.
pub async fn cancelled(signal: &mut ShutdownSignal) {
    let _ = signal.wait_for(|stop| *stop).await;
}

/// Non-blocking check.
pub fn is_cancelled(signal: &ShutdownSignal) -> bool {
    *signal.borrow() || signal.has_changed().is_err()
}
