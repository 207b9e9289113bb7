//! Broker-client capability interface and its value types.
//!
//! The wire protocol itself is delegated to an adapter behind
//! [`BrokerClient`]; the connection manager only ever talks to this trait.
//! [`rumqtt::RumqttBrokerClient`] is the production adapter, and
//! `crate::testing::mocks::LoopbackBroker` is the in-memory double used by
//! the scenario tests.

use crate::error::BrokerError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

pub mod rumqtt;

/// Delivery-guarantee tier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged delivery; may duplicate.
    AtLeastOnce,
    /// Assured single delivery.
    ExactlyOnce,
}

impl QosLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QosLevel {
    type Error = BrokerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(BrokerError::InvalidConfiguration(format!(
                "qos must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

/// A subscription target. Immutable once constructed; the name is guaranteed
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    name: String,
    qos: QosLevel,
}

impl Topic {
    pub fn new<S: Into<String>>(name: S, qos: QosLevel) -> Result<Self, BrokerError> {
        let name = name.into();
        if name.is_empty() {
            return Err(BrokerError::InvalidConfiguration(
                "topic name must not be empty".to_string(),
            ));
        }
        Ok(Self { name, qos })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qos(&self) -> QosLevel {
        self.qos
    }
}

/// An immutable message value. `duplicate` is only ever set on inbound
/// messages redelivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: Bytes,
    pub qos: QosLevel,
    pub retained: bool,
    pub duplicate: bool,
}

impl Message {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            qos: QosLevel::AtMostOnce,
            retained: false,
            duplicate: false,
        }
    }

    pub fn with_qos(mut self, qos: QosLevel) -> Self {
        self.qos = qos;
        self
    }

    pub fn retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }
}

/// Options handed to [`BrokerClient::connect`]. Built fresh per connection
/// attempt and never mutated after handoff.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub clean_session: bool,
    pub keep_alive_secs: u16,
    pub username: String,
    pub password: Vec<u8>,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("clean_session", &self.clean_session)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Push-style events delivered by the broker library.
#[async_trait]
pub trait BrokerCallback: Send + Sync + 'static {
    /// An inbound message arrived on a subscribed topic.
    async fn message_arrived(&self, topic: String, message: Message);

    /// The connection to the broker was lost.
    async fn connection_lost(&self, cause: String);
}

/// Capability set over a real broker connection.
///
/// The connection manager exclusively owns the handle; no other component
/// calls these operations directly. `connect`, `disconnect`, `publish` and
/// `ping` are the only operations that may block on network I/O.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), BrokerError>;

    async fn disconnect(&mut self) -> Result<(), BrokerError>;

    async fn publish(&self, topic: &Topic, message: &Message) -> Result<(), BrokerError>;

    async fn subscribe(&self, topics: &[Topic]) -> Result<(), BrokerError>;

    async fn ping(&self) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;

    fn set_callback(&mut self, handler: Arc<dyn BrokerCallback>);
}

/// Builds broker clients for the connection manager, which constructs a
/// handle lazily on `start()` and rebuilds one after trashing a broken
/// connection.
pub trait BrokerClientFactory: Send + Sync + 'static {
    type Client: BrokerClient;

    fn create(
        &self,
        host: &str,
        port: u16,
        client_id: &str,
    ) -> Result<Self::Client, BrokerError>;
}
