//! Long-lived publish/subscribe connection keeper.
//!
//! Keeps one broker connection alive on behalf of a device that is
//! intermittently reachable: a state machine tracks why the connection is
//! down, a keep-alive scheduler pings on a cancel-and-replace clock,
//! reachability edges trigger reconnects, and status changes plus inbound
//! messages fan out to registered observers.
//!
//! The broker protocol sits behind the [`broker::BrokerClient`] seam;
//! [`broker::rumqtt`] is the production adapter and
//! [`testing::mocks`] drives everything in-memory for tests.

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod notify;
pub mod observability;
pub mod testing;

pub use broker::{
    BrokerCallback, BrokerClient, BrokerClientFactory, ConnectOptions, Message, QosLevel, Topic,
};
pub use config::{ClientIdentity, ConfigError, ServiceConfig};
pub use dispatch::{Dispatcher, MessageEvent, Observer, PublishRequest, StatusEvent};
pub use error::{BrokerError, BrokerResult};
pub use manager::{ConnectionManager, ConnectionStatus, DisconnectReason};
pub use notify::{LogNotifier, NoticeKind, UserNotifier};
