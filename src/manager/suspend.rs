//! Scoped suspend inhibition.
//!
//! Hosts that aggressively suspend need the process held awake while a timer
//! fire or broker callback is being serviced. The blocker counts outstanding
//! guards; platform hooks can watch the count cross zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Shared counter of in-flight reactions that must finish before the host
/// may suspend. Cloning is cheap; all clones share one count.
#[derive(Debug, Clone, Default)]
pub struct SuspendBlocker {
    active: Arc<AtomicUsize>,
}

impl SuspendBlocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the host awake until the returned guard drops.
    pub fn stay_awake(&self) -> StayAwakeGuard {
        let previous = self.active.fetch_add(1, Ordering::SeqCst);
        trace!(active = previous + 1, "stay-awake acquired");
        StayAwakeGuard {
            active: Arc::clone(&self.active),
        }
    }

    /// Number of guards currently alive.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// RAII handle from [`SuspendBlocker::stay_awake`]. Releases on drop, so the
/// hold spans exactly the scope of the reaction that acquired it.
#[derive(Debug)]
pub struct StayAwakeGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for StayAwakeGuard {
    fn drop(&mut self) {
        let previous = self.active.fetch_sub(1, Ordering::SeqCst);
        trace!(active = previous - 1, "stay-awake released");
    }
}
