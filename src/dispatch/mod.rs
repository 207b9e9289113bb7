//! Observer fan-out.
//!
//! Local components register interest in status changes and inbound
//! messages. The registry holds weak references so a dropped observer is
//! unhooked automatically, and delivery happens outside the registry lock so
//! observers may re-register or unregister from within a callback.

use crate::manager::ConnectionStatus;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};

/// One committed status transition (or an explicit re-announcement).
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub status: ConnectionStatus,
    /// Human-readable cause, e.g. "connection lost - no network connection".
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn now(status: ConnectionStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One inbound message from a subscribed topic.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub topic: String,
    pub payload: Bytes,
}

/// An outbound publish handed to the intake channel. Best-effort; requests
/// that cannot be sent are logged and dropped.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: Bytes,
}

/// Receives fan-out events. Callbacks run on the manager's reaction tasks
/// and should return promptly.
#[async_trait::async_trait]
pub trait Observer: Send + Sync + 'static {
    async fn status_changed(&self, event: &StatusEvent);

    async fn message_received(&self, event: &MessageEvent);
}

/// Weak-reference observer registry with ordered delivery.
#[derive(Default)]
pub struct Dispatcher {
    observers: Mutex<Vec<Weak<dyn Observer>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer. Registration order is delivery order. Duplicate
    /// registrations deliver duplicate events.
    pub fn register<O: Observer>(&self, observer: &Arc<O>) {
        let weak = Arc::downgrade(observer);
        let weak: Weak<dyn Observer> = weak;
        self.lock().push(weak);
    }

    /// Remove every registration of this observer. Unknown observers are
    /// ignored.
    pub fn unregister<O: Observer>(&self, observer: &Arc<O>) {
        let target = Arc::downgrade(observer);
        let target: Weak<dyn Observer> = target;
        self.lock().retain(|entry| !Weak::ptr_eq(entry, &target));
    }

    /// Live observer count; prunes dead entries as a side effect.
    pub fn observer_count(&self) -> usize {
        let mut observers = self.lock();
        observers.retain(|entry| entry.strong_count() > 0);
        observers.len()
    }

    pub async fn dispatch_status(&self, event: &StatusEvent) {
        for observer in self.snapshot() {
            observer.status_changed(event).await;
        }
    }

    pub async fn dispatch_message(&self, event: &MessageEvent) {
        for observer in self.snapshot() {
            observer.message_received(event).await;
        }
    }

    /// Upgrade the registry under the lock, prune the dead, and return the
    /// strong snapshot to deliver against.
    fn snapshot(&self) -> Vec<Arc<dyn Observer>> {
        let mut observers = self.lock();
        let mut alive = Vec::with_capacity(observers.len());
        observers.retain(|entry| match entry.upgrade() {
            Some(strong) => {
                alive.push(strong);
                true
            }
            None => false,
        });
        alive
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Weak<dyn Observer>>> {
        match self.observers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
