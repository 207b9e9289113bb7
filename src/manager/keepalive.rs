//! Keep-alive ping scheduling.
//!
//! At most one ping deadline is armed at a time. Arming replaces whatever
//! was pending, so any traffic that proves liveness pushes the next ping a
//! full interval out instead of stacking timers.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Cancel-and-replace timer that delivers ping deadlines over a channel.
///
/// The owning task drains the receiver returned by [`KeepAliveScheduler::new`]
/// and performs the actual ping; the scheduler only decides WHEN.
#[derive(Debug)]
pub struct KeepAliveScheduler {
    interval: Duration,
    fire_tx: mpsc::UnboundedSender<()>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl KeepAliveScheduler {
    /// Build a scheduler firing `interval` after each arm, paired with the
    /// receiver the ping loop drains.
    pub fn new(interval: Duration) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        (
            Self {
                interval,
                fire_tx,
                pending: Mutex::new(None),
            },
            fire_rx,
        )
    }

    /// Arm the next deadline, replacing any pending one.
    pub fn schedule_next(&self) {
        // The deadline is fixed here, not when the task first polls.
        let deadline = tokio::time::Instant::now() + self.interval;
        let fire_tx = self.fire_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // Receiver gone means the ping loop shut down; nothing to do.
            let _ = fire_tx.send(());
        });
        let mut pending = self.lock_pending();
        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
        debug!(interval_secs = self.interval.as_secs(), "keep-alive armed");
    }

    /// Drop any pending deadline. Idempotent.
    pub fn cancel(&self) {
        if let Some(task) = self.lock_pending().take() {
            task.abort();
            debug!("keep-alive cancelled");
        }
    }

    /// True while a deadline is armed and has not yet fired.
    pub fn has_pending(&self) -> bool {
        self.lock_pending()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        // Timer tasks never panic while holding this lock.
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for KeepAliveScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
