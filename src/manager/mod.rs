//! Connection lifecycle management.
//!
//! [`ConnectionManager`] owns the broker client and keeps it connected for
//! as long as the user wants it connected: it schedules keep-alive pings,
//! reacts to lost connections and reachability changes, and fans status
//! transitions out to observers. All status decisions go through the pure
//! [`state::next_status`] function; everything in this module is the impure
//! shell around it.

pub mod keepalive;
pub mod reachability;
pub mod state;
pub mod suspend;

pub use state::{ConnectionStatus, ConnectionTrigger};

use crate::broker::{BrokerCallback, BrokerClient, BrokerClientFactory, Message, QosLevel, Topic};
use crate::config::{ClientIdentity, ConfigError, ServiceConfig};
use crate::dispatch::{Dispatcher, MessageEvent, PublishRequest, StatusEvent};
use crate::error::{BrokerError, BrokerResult};
use crate::notify::{NoticeKind, UserNotifier};
use chrono::{DateTime, Utc};
use keepalive::KeepAliveScheduler;
use reachability::ReachabilityProbe;
use state::next_status;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use suspend::SuspendBlocker;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const REASON_CONNECTING: &str = "connecting";
const REASON_CONNECTED: &str = "connected";
const REASON_WAITING_FOR_NETWORK: &str = "waiting for network connection";
const REASON_LOST_NO_NETWORK: &str = "connection lost - no network connection";
const REASON_LOST_RECONNECTING: &str = "connection lost - reconnecting";
const REASON_UNABLE_TO_CONNECT: &str = "unable to connect";
const REASON_UNABLE_TO_SUBSCRIBE: &str = "unable to subscribe";
const REASON_DISCONNECTED: &str = "disconnected";
const REASON_DATA_DISABLED: &str = "not connected - background data disabled";
const REASON_BAD_PARAMETERS: &str = "invalid connection parameters";

/// Why [`ConnectionManager::disconnect`] was called.
#[derive(Debug, Clone)]
pub enum DisconnectReason {
    /// The user asked; no automatic reconnection until the next `start()`.
    UserRequest,
    /// A component declared the connection broken; the retry clock keeps
    /// running.
    Failure(String),
}

/// Long-lived connection keeper over a [`BrokerClientFactory`].
///
/// Cheap to clone; all clones drive the same connection. Must be
/// constructed inside a Tokio runtime because it spawns its worker tasks.
pub struct ConnectionManager<F: BrokerClientFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: BrokerClientFactory> Clone for ConnectionManager<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct MutableState<C> {
    status: ConnectionStatus,
    reason: String,
    changed_at: DateTime<Utc>,
    client: Option<C>,
}

struct Inner<F: BrokerClientFactory> {
    config: ServiceConfig,
    identity: ClientIdentity,
    subscriptions: Vec<Topic>,
    factory: F,
    probe: Arc<dyn ReachabilityProbe>,
    notifier: Arc<dyn UserNotifier>,
    dispatcher: Arc<Dispatcher>,
    // Single mutual-exclusion point: every status decision and every broker
    // call that needs the client handle happens under this lock.
    state: Mutex<MutableState<F::Client>>,
    // Mirror of `state.status` for cheap synchronous reads.
    status_tx: watch::Sender<ConnectionStatus>,
    // Bumped on every client teardown; callbacks carrying an older value
    // belong to a dead client and are dropped.
    generation: AtomicU64,
    // Capacity 1: racing reconnect triggers collapse into one attempt.
    reconnect_tx: mpsc::Sender<()>,
    keepalive: KeepAliveScheduler,
    blocker: SuspendBlocker,
}

impl<F: BrokerClientFactory> ConnectionManager<F> {
    pub fn new(
        config: ServiceConfig,
        factory: F,
        probe: Arc<dyn ReachabilityProbe>,
        notifier: Arc<dyn UserNotifier>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let identity = config.client_identity()?;
        let subscriptions = config.subscription_topics()?;
        let interval = Duration::from_secs(u64::from(config.broker.keep_alive_secs));
        let (keepalive, fire_rx) = KeepAliveScheduler::new(interval);
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        let (status_tx, _) = watch::channel(ConnectionStatus::Initial);

        let inner = Arc::new(Inner {
            config,
            identity,
            subscriptions,
            factory,
            probe,
            notifier,
            dispatcher,
            state: Mutex::new(MutableState {
                status: ConnectionStatus::Initial,
                reason: String::new(),
                changed_at: Utc::now(),
                client: None,
            }),
            status_tx,
            generation: AtomicU64::new(0),
            reconnect_tx,
            keepalive,
            blocker: SuspendBlocker::new(),
        });

        spawn_reconnect_worker(Arc::downgrade(&inner), reconnect_rx);
        spawn_ping_loop(Arc::downgrade(&inner), fire_rx);

        Ok(Self { inner })
    }

    /// Current status, read without taking the state lock.
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status_tx.borrow()
    }

    /// Watch channel following status changes; handy for waiting on a
    /// particular status.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// True while a keep-alive (or retry) deadline is armed.
    pub fn has_pending_ping(&self) -> bool {
        self.inner.keepalive.has_pending()
    }

    /// Outstanding stay-awake guards.
    pub fn stay_awake_count(&self) -> usize {
        self.inner.blocker.active_count()
    }

    /// Ask for the connection to be up. Idempotent: calling while already
    /// connected just re-announces the current status.
    pub async fn start(&self) {
        self.inner.start().await;
    }

    /// Take the connection down.
    pub async fn disconnect(&self, reason: DisconnectReason) {
        self.inner.disconnect(reason).await;
    }

    /// Publish one message. Hard error when not connected; nothing queues.
    pub async fn publish(&self, topic: &Topic, message: &Message) -> BrokerResult<()> {
        self.inner.publish(topic, message).await
    }

    /// Channel-based publish intake. Requests that cannot be published are
    /// logged and dropped.
    pub fn publish_intake(&self) -> mpsc::Sender<PublishRequest> {
        let (tx, mut rx) = mpsc::channel::<PublishRequest>(32);
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.handle_publish_request(request).await;
            }
        });
        tx
    }

    /// Feed platform connectivity edges into the manager. The value current
    /// at attach time is the baseline; only later edges are acted on.
    pub fn attach_reachability_events(&self, signal: watch::Receiver<bool>) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        reachability::spawn_monitor(signal, move |online| {
            let Some(inner) = weak.upgrade() else { return };
            tokio::spawn(async move {
                inner.on_reachability_changed(online).await;
            });
        })
    }

    /// Re-broadcast the current status to all observers, timestamped with
    /// when the status was last committed.
    pub async fn announce_status(&self) {
        self.inner.announce_status().await;
    }
}

fn spawn_reconnect_worker<F: BrokerClientFactory>(
    weak: Weak<Inner<F>>,
    mut reconnect_rx: mpsc::Receiver<()>,
) {
    tokio::spawn(async move {
        while reconnect_rx.recv().await.is_some() {
            let Some(inner) = weak.upgrade() else { break };
            inner.run_connect_attempt().await;
        }
    });
}

fn spawn_ping_loop<F: BrokerClientFactory>(
    weak: Weak<Inner<F>>,
    mut fire_rx: mpsc::UnboundedReceiver<()>,
) {
    tokio::spawn(async move {
        while fire_rx.recv().await.is_some() {
            let Some(inner) = weak.upgrade() else { break };
            inner.on_keepalive_fire().await;
        }
    });
}

impl<F: BrokerClientFactory> Inner<F> {
    async fn start(self: &Arc<Self>) {
        let _awake = self.blocker.stay_awake();
        let online = self.probe.is_online().await;
        let data_enabled = self.probe.background_data_enabled().await;
        let trigger = ConnectionTrigger::StartRequested {
            online,
            data_enabled,
        };

        let mut events = Vec::new();
        let mut reconnect = false;
        {
            let mut state = self.state.lock().await;
            match next_status(state.status, trigger) {
                Some(ConnectionStatus::Connecting) => {
                    events.push(self.commit(&mut state, ConnectionStatus::Connecting, REASON_CONNECTING));
                    reconnect = true;
                }
                Some(ConnectionStatus::WaitingForNetwork) => {
                    events.push(self.commit(
                        &mut state,
                        ConnectionStatus::WaitingForNetwork,
                        REASON_WAITING_FOR_NETWORK,
                    ));
                }
                Some(ConnectionStatus::DataDisabled) => {
                    events.push(self.commit(
                        &mut state,
                        ConnectionStatus::DataDisabled,
                        REASON_DATA_DISABLED,
                    ));
                    self.notifier.notify(NoticeKind::Warning, REASON_DATA_DISABLED);
                }
                Some(other) => {
                    debug!(status = %other, "unexpected start transition");
                }
                None => {
                    // Already connected (re-announce) or already connecting
                    // (the in-flight attempt covers us).
                    if state.status == ConnectionStatus::Connected {
                        events.push(self.snapshot_event(&state));
                    }
                }
            }
        }
        self.dispatch_all(events).await;
        if reconnect {
            self.request_reconnect();
        }
    }

    async fn disconnect(self: &Arc<Self>, reason: DisconnectReason) {
        let _awake = self.blocker.stay_awake();
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            match reason {
                DisconnectReason::UserRequest => {
                    if next_status(state.status, ConnectionTrigger::UserDisconnect).is_none() {
                        return;
                    }
                    self.keepalive.cancel();
                    self.teardown_client(&mut state).await;
                    events.push(self.commit(
                        &mut state,
                        ConnectionStatus::UserDisconnected,
                        REASON_DISCONNECTED,
                    ));
                    self.notifier.notify(NoticeKind::Info, REASON_DISCONNECTED);
                }
                DisconnectReason::Failure(cause) => {
                    let online = self.probe.is_online().await;
                    self.handle_lost(&mut state, online, &cause, &mut events);
                }
            }
        }
        self.dispatch_all(events).await;
    }

    /// One connection attempt, run on the reconnect worker. Holding the
    /// state lock for the whole attempt serializes it against `disconnect`
    /// and `publish`.
    async fn run_connect_attempt(self: &Arc<Self>) {
        let _awake = self.blocker.stay_awake();
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            if state.status != ConnectionStatus::Connecting {
                debug!(status = %state.status, "dropping stale reconnect request");
                return;
            }

            if state.client.is_none() {
                match self.build_client() {
                    Ok(client) => state.client = Some(client),
                    Err(error) => {
                        warn!(%error, "broker client construction failed");
                        events.push(self.commit(
                            &mut state,
                            ConnectionStatus::UnknownReasonDisconnected,
                            REASON_BAD_PARAMETERS,
                        ));
                        self.notifier.notify(NoticeKind::Warning, REASON_BAD_PARAMETERS);
                        drop(state);
                        self.dispatch_all(events).await;
                        return;
                    }
                }
            }

            let options = self.config.connect_options();
            let Some(client) = state.client.as_mut() else {
                return;
            };
            match client.connect(&options).await {
                Ok(()) => {
                    let reason = match client.subscribe(&self.subscriptions).await {
                        Ok(()) => REASON_CONNECTED,
                        Err(error) => {
                            warn!(%error, "subscription setup failed");
                            self.notifier
                                .notify(NoticeKind::Warning, REASON_UNABLE_TO_SUBSCRIBE);
                            REASON_UNABLE_TO_SUBSCRIBE
                        }
                    };
                    events.push(self.commit(&mut state, ConnectionStatus::Connected, reason));
                    self.keepalive.schedule_next();
                    self.notifier.notify(NoticeKind::Info, REASON_CONNECTED);
                }
                Err(error) => {
                    warn!(%error, "connection attempt failed");
                    self.teardown_client(&mut state).await;
                    events.push(self.commit(
                        &mut state,
                        ConnectionStatus::UnknownReasonDisconnected,
                        REASON_UNABLE_TO_CONNECT,
                    ));
                    // Retry on the keep-alive clock, unbounded by design.
                    self.keepalive.schedule_next();
                    self.notifier.notify(NoticeKind::Warning, REASON_UNABLE_TO_CONNECT);
                }
            }
        }
        self.dispatch_all(events).await;
    }

    async fn publish(self: &Arc<Self>, topic: &Topic, message: &Message) -> BrokerResult<()> {
        let _awake = self.blocker.stay_awake();
        if !self.probe.is_online().await {
            return Err(BrokerError::NotConnected {
                status: *self.status_tx.borrow(),
            });
        }
        let state = self.state.lock().await;
        if state.status != ConnectionStatus::Connected {
            return Err(BrokerError::NotConnected {
                status: state.status,
            });
        }
        let Some(client) = state.client.as_ref() else {
            return Err(BrokerError::NotConnected {
                status: state.status,
            });
        };
        client.publish(topic, message).await?;
        // Outbound traffic proves liveness; push the next ping out.
        self.keepalive.schedule_next();
        Ok(())
    }

    async fn handle_publish_request(self: &Arc<Self>, request: PublishRequest) {
        let topic = match Topic::new(request.topic.clone(), QosLevel::AtLeastOnce) {
            Ok(topic) => topic,
            Err(error) => {
                warn!(%error, topic = %request.topic, "dropping publish request");
                return;
            }
        };
        let message = Message::new(request.payload).with_qos(QosLevel::AtLeastOnce);
        if let Err(error) = self.publish(&topic, &message).await {
            warn!(%error, topic = %request.topic, "dropping publish request");
        }
    }

    /// Keep-alive fire: ping when connected, retry when down for an unknown
    /// reason.
    async fn on_keepalive_fire(self: &Arc<Self>) {
        let _awake = self.blocker.stay_awake();
        let online = self.probe.is_online().await;
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            match state.status {
                ConnectionStatus::Connected => {
                    let ping_result = match state.client.as_ref() {
                        Some(client) => client.ping().await,
                        None => return,
                    };
                    match ping_result {
                        Ok(()) => self.keepalive.schedule_next(),
                        Err(error) => {
                            warn!(%error, "keep-alive ping failed");
                            self.handle_lost(&mut state, online, "ping failed", &mut events);
                        }
                    }
                }
                ConnectionStatus::UnknownReasonDisconnected => {
                    // Retry fires reuse the network-available decision.
                    if next_status(state.status, ConnectionTrigger::NetworkAvailable)
                        == Some(ConnectionStatus::Connecting)
                        && online
                    {
                        events.push(self.commit(
                            &mut state,
                            ConnectionStatus::Connecting,
                            REASON_CONNECTING,
                        ));
                        self.request_reconnect();
                    } else {
                        // Still offline; keep the retry clock running.
                        self.keepalive.schedule_next();
                    }
                }
                _ => debug!(status = %state.status, "ignoring keep-alive fire"),
            }
        }
        self.dispatch_all(events).await;
    }

    async fn on_connection_lost(self: &Arc<Self>, generation: u64, cause: String) {
        let _awake = self.blocker.stay_awake();
        let online = self.probe.is_online().await;
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            if generation != self.generation.load(Ordering::SeqCst) {
                debug!(cause, "ignoring lost callback from dead client");
                return;
            }
            self.handle_lost(&mut state, online, &cause, &mut events);
        }
        self.dispatch_all(events).await;
    }

    async fn on_message_arrived(self: &Arc<Self>, generation: u64, topic: String, message: Message) {
        let _awake = self.blocker.stay_awake();
        {
            let state = self.state.lock().await;
            if generation != self.generation.load(Ordering::SeqCst) {
                debug!(topic, "ignoring message from dead client");
                return;
            }
            if state.status == ConnectionStatus::Connected {
                // Inbound traffic proves liveness too.
                self.keepalive.schedule_next();
            }
        }
        let event = MessageEvent {
            topic,
            payload: message.payload,
        };
        self.dispatcher.dispatch_message(&event).await;
    }

    async fn on_reachability_changed(self: &Arc<Self>, online: bool) {
        let _awake = self.blocker.stay_awake();
        if !online {
            // Actual drops surface through the lost callback or a failed
            // ping; an offline edge alone proves nothing yet.
            return;
        }
        let mut events = Vec::new();
        let mut reconnect = false;
        {
            let mut state = self.state.lock().await;
            if next_status(state.status, ConnectionTrigger::NetworkAvailable)
                == Some(ConnectionStatus::Connecting)
            {
                events.push(self.commit(&mut state, ConnectionStatus::Connecting, REASON_CONNECTING));
                reconnect = true;
            }
        }
        self.dispatch_all(events).await;
        if reconnect {
            self.request_reconnect();
        }
    }

    async fn announce_status(self: &Arc<Self>) {
        let event = {
            let state = self.state.lock().await;
            self.snapshot_event(&state)
        };
        self.dispatcher.dispatch_status(&event).await;
    }

    /// Shared teardown for every involuntary loss. Caller holds the lock.
    fn handle_lost(
        self: &Arc<Self>,
        state: &mut MutableState<F::Client>,
        online: bool,
        cause: &str,
        events: &mut Vec<StatusEvent>,
    ) {
        let trigger = ConnectionTrigger::ConnectionLost { online };
        let Some(next) = next_status(state.status, trigger) else {
            debug!(status = %state.status, cause, "connection loss ignored");
            return;
        };
        info!(cause, online, "connection lost");
        self.bump_generation();
        state.client = None;
        match next {
            ConnectionStatus::WaitingForNetwork => {
                self.keepalive.cancel();
                events.push(self.commit(state, next, REASON_LOST_NO_NETWORK));
                self.notifier.notify(NoticeKind::Warning, REASON_LOST_NO_NETWORK);
            }
            _ => {
                events.push(self.commit(state, next, REASON_LOST_RECONNECTING));
                self.keepalive.schedule_next();
                if next_status(state.status, ConnectionTrigger::NetworkAvailable)
                    == Some(ConnectionStatus::Connecting)
                {
                    events.push(self.commit(state, ConnectionStatus::Connecting, REASON_CONNECTING));
                    self.request_reconnect();
                }
                self.notifier.notify(NoticeKind::Warning, REASON_LOST_RECONNECTING);
            }
        }
    }

    fn build_client(self: &Arc<Self>) -> Result<F::Client, BrokerError> {
        let mut client = self.factory.create(
            &self.config.broker.host,
            self.config.broker.port,
            self.identity.as_str(),
        )?;
        let bridge = CallbackBridge {
            inner: Arc::downgrade(self),
            generation: self.generation.load(Ordering::SeqCst),
        };
        client.set_callback(Arc::new(bridge));
        Ok(client)
    }

    /// Best-effort disconnect of the current handle, then drop it and
    /// invalidate its callbacks.
    async fn teardown_client(&self, state: &mut MutableState<F::Client>) {
        self.bump_generation();
        if let Some(mut client) = state.client.take() {
            if let Err(error) = client.disconnect().await {
                debug!(%error, "disconnect during teardown failed");
            }
        }
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn request_reconnect(&self) {
        // Full channel means an attempt is already queued; that one covers
        // this trigger too.
        let _ = self.reconnect_tx.try_send(());
    }

    fn commit(
        &self,
        state: &mut MutableState<F::Client>,
        status: ConnectionStatus,
        reason: &str,
    ) -> StatusEvent {
        info!(from = %state.status, to = %status, reason, "connection status changed");
        let event = StatusEvent::now(status, reason);
        state.status = status;
        state.reason = event.reason.clone();
        state.changed_at = event.timestamp;
        self.status_tx.send_replace(status);
        event
    }

    fn snapshot_event(&self, state: &MutableState<F::Client>) -> StatusEvent {
        StatusEvent {
            status: state.status,
            reason: state.reason.clone(),
            timestamp: state.changed_at,
        }
    }

    async fn dispatch_all(&self, events: Vec<StatusEvent>) {
        for event in events {
            self.dispatcher.dispatch_status(&event).await;
        }
    }
}

/// Routes broker callbacks back into the manager, tagged with the client
/// generation so events from a discarded client go nowhere.
struct CallbackBridge<F: BrokerClientFactory> {
    inner: Weak<Inner<F>>,
    generation: u64,
}

#[async_trait::async_trait]
impl<F: BrokerClientFactory> BrokerCallback for CallbackBridge<F> {
    async fn message_arrived(&self, topic: String, message: Message) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .on_message_arrived(self.generation, topic, message)
                .await;
        }
    }

    async fn connection_lost(&self, cause: String) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_connection_lost(self.generation, cause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use crate::testing::mocks::LoopbackFactory;
    use reachability::StaticReachability;

    fn test_config() -> ServiceConfig {
        toml::from_str(
            r#"
[broker]
host = "broker.test"
client_id = "unit-test-client"

[[subscriptions]]
topic = "inbound/#"
qos = 1
"#,
        )
        .unwrap()
    }

    fn manager(config: ServiceConfig) -> Result<ConnectionManager<LoopbackFactory>, ConfigError> {
        ConnectionManager::new(
            config,
            LoopbackFactory::new(),
            Arc::new(StaticReachability),
            Arc::new(LogNotifier),
            Arc::new(Dispatcher::new()),
        )
    }

    #[tokio::test]
    async fn starts_in_initial_status() {
        let manager = manager(test_config()).unwrap();
        assert_eq!(manager.status(), ConnectionStatus::Initial);
        assert!(!manager.has_pending_ping());
        assert_eq!(manager.stay_awake_count(), 0);
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let mut config = test_config();
        config.broker.keep_alive_secs = 0;
        assert!(manager(config).is_err());
    }

    #[tokio::test]
    async fn rejects_bad_subscription_qos() {
        let mut config = test_config();
        config.subscriptions[0].qos = 9;
        assert!(manager(config).is_err());
    }
}
