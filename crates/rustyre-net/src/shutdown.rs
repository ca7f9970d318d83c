//! Shared cancellation token for coordinating background task shutdown.
//!
//! Every transport spawns tokio tasks (broadcast loops, accept loops, read
//! loops) that must stop when their owner goes away. [`ShutdownToken`] bundles
//! the stop signal and the task handles so owners can signal once and then
//! await everything.

use tokio::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A cancellation token that coordinates shutdown of background tasks.
///
/// Background tasks hold a subscribed `watch::Receiver<bool>` and check it in
/// their `tokio::select!` loops; the owner calls [`signal_stop()`] followed by
/// [`join_all()`].
///
/// [`signal_stop()`]: Self::signal_stop
/// [`join_all()`]: Self::join_all
pub struct ShutdownToken {
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            stop_tx,
            stop_rx,
            task_handles: Mutex::new(Vec::new()),
        }
    }

    /// Get a new subscription to the stop signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Check whether the stop signal has been sent.
    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Register a background task handle to await on shutdown.
    pub async fn add_task(&self, handle: JoinHandle<()>) {
        self.task_handles.lock().await.push(handle);
    }

    /// Send the stop signal to all subscribers. Idempotent.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Await all registered background tasks, draining the handle list.
    ///
    /// Any `JoinError`s (panics, cancellations) are silently ignored.
    pub async fn join_all(&self) {
        let handles: Vec<JoinHandle<()>> = self.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_token_is_not_stopped() {
        let token = ShutdownToken::new();
        assert!(!token.is_stopped());
    }

    #[test]
    fn signal_stop_is_visible_to_subscribers() {
        let token = ShutdownToken::new();
        let rx = token.subscribe();

        assert!(!*rx.borrow());
        token.signal_stop();
        assert!(*rx.borrow());
        assert!(token.is_stopped());
    }

    #[test]
    fn signal_stop_is_idempotent() {
        let token = ShutdownToken::new();
        token.signal_stop();
        token.signal_stop();
        assert!(token.is_stopped());
    }

    #[tokio::test]
    async fn join_all_completes_when_tasks_finish() {
        let token = ShutdownToken::new();
        let mut rx = token.subscribe();

        let handle = tokio::spawn(async move {
            let _ = rx.changed().await;
        });
        token.add_task(handle).await;

        token.signal_stop();
        token.join_all().await;

        assert!(token.task_handles.lock().await.is_empty());
    }

    #[tokio::test]
    async fn join_all_on_empty_handles() {
        let token = ShutdownToken::new();
        token.join_all().await;
    }
}
