//! Network reachability signals.
//!
//! The manager never probes the network itself; it asks a
//! [`ReachabilityProbe`] for point-in-time answers and reacts to edge events
//! from a platform-fed watch channel.

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Point-in-time connectivity answers.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync + 'static {
    /// Whether a usable network path currently exists.
    async fn is_online(&self) -> bool;

    /// Whether policy permits background data transfer. Defaults to the
    /// online answer; platforms without such a policy report both the same.
    async fn background_data_enabled(&self) -> bool {
        self.is_online().await
    }
}

/// Probe that always reports online. Suits hosts with permanent links, and
/// doubles as the neutral fixture base.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticReachability;

#[async_trait]
impl ReachabilityProbe for StaticReachability {
    async fn is_online(&self) -> bool {
        true
    }
}

/// Watch a platform connectivity feed, suppress repeats and deliver each
/// genuine edge to `on_change`. The callback must not block; hand heavy work
/// off to a task.
///
/// The value current at spawn time is the baseline; only later edges fire.
pub fn spawn_monitor<F>(mut signal: watch::Receiver<bool>, on_change: F) -> JoinHandle<()>
where
    F: Fn(bool) + Send + 'static,
{
    let mut last = *signal.borrow_and_update();
    tokio::spawn(async move {
        while signal.changed().await.is_ok() {
            let online = *signal.borrow_and_update();
            if online == last {
                continue;
            }
            last = online;
            debug!(online, "reachability changed");
            on_change(online);
        }
    })
}
