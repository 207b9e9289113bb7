//! In-memory doubles for exercising the connection manager without a
//! broker, a network or a real clock.

use crate::broker::{
    BrokerCallback, BrokerClient, BrokerClientFactory, ConnectOptions, Message, Topic,
};
use crate::dispatch::{MessageEvent, Observer, StatusEvent};
use crate::error::{BrokerError, BrokerResult};
use crate::manager::reachability::ReachabilityProbe;
use crate::manager::ConnectionStatus;
use crate::notify::{NoticeKind, UserNotifier};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared control surface for every [`LoopbackBroker`] a
/// [`LoopbackFactory`] hands out. Tests flip failure toggles, inject
/// inbound traffic and inspect recorded calls through this handle.
#[derive(Default)]
pub struct LoopbackControl {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_publish: AtomicBool,
    fail_ping: AtomicBool,
    create_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    ping_calls: AtomicUsize,
    published: Mutex<Vec<(String, Message)>>,
    subscribed: Mutex<Vec<Topic>>,
    callback: Mutex<Option<Arc<dyn BrokerCallback>>>,
}

impl LoopbackControl {
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_ping(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn ping_calls(&self) -> usize {
        self.ping_calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<(String, Message)> {
        lock(&self.published).clone()
    }

    pub fn subscribed(&self) -> Vec<Topic> {
        lock(&self.subscribed).clone()
    }

    fn current_callback(&self) -> Option<Arc<dyn BrokerCallback>> {
        lock(&self.callback).clone()
    }

    /// Deliver an inbound message through the registered callback, as the
    /// broker would for a subscribed topic.
    pub async fn inject_message(&self, topic: &str, payload: &[u8]) {
        if let Some(callback) = self.current_callback() {
            callback
                .message_arrived(topic.to_string(), Message::new(payload.to_vec()))
                .await;
        }
    }

    /// Kill the connection from the broker side and raise the lost
    /// callback.
    pub async fn drop_connection(&self, cause: &str) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(callback) = self.current_callback() {
            callback.connection_lost(cause.to_string()).await;
        }
    }
}

/// Factory producing loopback clients that all share one control handle.
#[derive(Default)]
pub struct LoopbackFactory {
    control: Arc<LoopbackControl>,
}

impl LoopbackFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn control(&self) -> Arc<LoopbackControl> {
        Arc::clone(&self.control)
    }
}

impl BrokerClientFactory for LoopbackFactory {
    type Client = LoopbackBroker;

    fn create(&self, _host: &str, _port: u16, _client_id: &str) -> BrokerResult<Self::Client> {
        self.control.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(LoopbackBroker {
            control: Arc::clone(&self.control),
        })
    }
}

/// Broker client double; records calls and echoes publishes to subscribed
/// topics back through the callback.
pub struct LoopbackBroker {
    control: Arc<LoopbackControl>,
}

fn filter_matches(filter: &str, topic: &str) -> bool {
    match filter.strip_suffix('#') {
        Some(prefix) => topic.starts_with(prefix),
        None => filter == topic,
    }
}

#[async_trait]
impl BrokerClient for LoopbackBroker {
    async fn connect(&mut self, _options: &ConnectOptions) -> BrokerResult<()> {
        self.control.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.control.fail_connect.load(Ordering::SeqCst) {
            return Err(BrokerError::connect_failure("connection refused"));
        }
        self.control.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> BrokerResult<()> {
        self.control.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.control.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &Topic, message: &Message) -> BrokerResult<()> {
        if self.control.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::publish_failure("broker rejected publish"));
        }
        if !self.control.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::publish_failure("not connected"));
        }
        lock(&self.control.published).push((topic.name().to_string(), message.clone()));
        let echoes = lock(&self.control.subscribed)
            .iter()
            .any(|sub| filter_matches(sub.name(), topic.name()));
        if echoes {
            if let Some(callback) = self.control.current_callback() {
                callback
                    .message_arrived(topic.name().to_string(), message.clone())
                    .await;
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topics: &[Topic]) -> BrokerResult<()> {
        if self.control.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BrokerError::subscribe_failure("broker rejected subscribe"));
        }
        lock(&self.control.subscribed).extend_from_slice(topics);
        Ok(())
    }

    async fn ping(&self) -> BrokerResult<()> {
        self.control.ping_calls.fetch_add(1, Ordering::SeqCst);
        if self.control.fail_ping.load(Ordering::SeqCst) {
            return Err(BrokerError::ping_failure("no ping response"));
        }
        if !self.control.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::ping_failure("not connected"));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.control.connected.load(Ordering::SeqCst)
    }

    fn set_callback(&mut self, handler: Arc<dyn BrokerCallback>) {
        *lock(&self.control.callback) = Some(handler);
    }
}

/// Observer that records everything it sees.
#[derive(Default)]
pub struct RecordingObserver {
    statuses: Mutex<Vec<(ConnectionStatus, String)>>,
    messages: Mutex<Vec<MessageEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn statuses(&self) -> Vec<(ConnectionStatus, String)> {
        lock(&self.statuses).clone()
    }

    pub fn messages(&self) -> Vec<MessageEvent> {
        lock(&self.messages).clone()
    }
}

#[async_trait]
impl Observer for RecordingObserver {
    async fn status_changed(&self, event: &StatusEvent) {
        lock(&self.statuses).push((event.status, event.reason.clone()));
    }

    async fn message_received(&self, event: &MessageEvent) {
        lock(&self.messages).push(event.clone());
    }
}

/// Probe whose answers the test sets directly.
#[derive(Default)]
pub struct TestReachability {
    offline: AtomicBool,
    data_disabled: AtomicBool,
}

impl TestReachability {
    pub fn online() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn set_data_enabled(&self, enabled: bool) {
        self.data_disabled.store(!enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for TestReachability {
    async fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    async fn background_data_enabled(&self) -> bool {
        !self.data_disabled.load(Ordering::SeqCst)
    }
}

/// Notifier that counts notices per severity.
#[derive(Default)]
pub struct CountingNotifier {
    infos: AtomicUsize,
    warnings: AtomicUsize,
    last: Mutex<Option<String>>,
}

impl CountingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn info_count(&self) -> usize {
        self.infos.load(Ordering::SeqCst)
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }

    pub fn last_message(&self) -> Option<String> {
        lock(&self.last).clone()
    }
}

impl UserNotifier for CountingNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        match kind {
            NoticeKind::Info => self.infos.fetch_add(1, Ordering::SeqCst),
            NoticeKind::Warning => self.warnings.fetch_add(1, Ordering::SeqCst),
        };
        *lock(&self.last) = Some(message.to_string());
    }
}
