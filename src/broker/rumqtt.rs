//! Production broker client over rumqttc (protocol v3.1.1).
//!
//! Owns the `AsyncClient` plus a background task driving the event loop.
//! Connect is only reported successful once the broker's acknowledgement
//! arrives; event-loop errors after that surface through the registered
//! callback, except during an orderly shutdown where the lost callback is
//! suppressed.

use crate::broker::{
    BrokerCallback, BrokerClient, BrokerClientFactory, ConnectOptions, Message, QosLevel, Topic,
};
use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS, SubscribeFilter,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 10;

/// Factory for [`RumqttBrokerClient`] handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttClientFactory;

impl BrokerClientFactory for RumqttClientFactory {
    type Client = RumqttBrokerClient;

    fn create(&self, host: &str, port: u16, client_id: &str) -> BrokerResult<Self::Client> {
        if client_id.is_empty() {
            return Err(BrokerError::InvalidConfiguration(
                "client id must not be empty".to_string(),
            ));
        }
        Ok(RumqttBrokerClient {
            host: host.to_string(),
            port,
            client_id: client_id.to_string(),
            callback: None,
            connected: Arc::new(AtomicBool::new(false)),
            active: None,
        })
    }
}

struct Active {
    client: AsyncClient,
    shutdown_tx: watch::Sender<bool>,
    event_task: JoinHandle<()>,
}

/// One broker session. Reconnecting means calling [`BrokerClient::connect`]
/// again; rumqttc's own retry loop is not used, the connection manager owns
/// that policy.
pub struct RumqttBrokerClient {
    host: String,
    port: u16,
    client_id: String,
    callback: Option<Arc<dyn BrokerCallback>>,
    connected: Arc<AtomicBool>,
    active: Option<Active>,
}

fn to_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn from_qos(qos: QoS) -> QosLevel {
    match qos {
        QoS::AtMostOnce => QosLevel::AtMostOnce,
        QoS::AtLeastOnce => QosLevel::AtLeastOnce,
        QoS::ExactlyOnce => QosLevel::ExactlyOnce,
    }
}

impl RumqttBrokerClient {
    /// Signal the event task to stop and drop the session, without waiting
    /// for the task to observe the signal.
    fn shutdown_active(&mut self) -> Option<AsyncClient> {
        self.connected.store(false, Ordering::SeqCst);
        let active = self.active.take()?;
        let _ = active.shutdown_tx.send(true);
        active.event_task.abort();
        Some(active.client)
    }
}

#[async_trait]
impl BrokerClient for RumqttBrokerClient {
    async fn connect(&mut self, options: &ConnectOptions) -> BrokerResult<()> {
        // A fresh attempt always starts from a clean session handle.
        self.shutdown_active();

        let mut mqtt_options = MqttOptions::new(&self.client_id, &self.host, self.port);
        mqtt_options.set_keep_alive(Duration::from_secs(u64::from(options.keep_alive_secs)));
        mqtt_options.set_clean_session(options.clean_session);
        mqtt_options.set_credentials(
            options.username.clone(),
            String::from_utf8_lossy(&options.password).into_owned(),
        );

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (connack_tx, connack_rx) = oneshot::channel::<BrokerResult<()>>();

        let callback = self.callback.clone();
        let connected = Arc::clone(&self.connected);
        let event_task = tokio::spawn(async move {
            let mut connack_tx = Some(connack_tx);
            loop {
                let event = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    event = event_loop.poll() => event,
                };
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        let result = if ack.code == ConnectReturnCode::Success {
                            connected.store(true, Ordering::SeqCst);
                            Ok(())
                        } else {
                            Err(BrokerError::connect_failure(format!(
                                "broker refused connection: {:?}",
                                ack.code
                            )))
                        };
                        if let Some(tx) = connack_tx.take() {
                            let _ = tx.send(result);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if let Some(handler) = &callback {
                            let message = Message {
                                payload: publish.payload.clone(),
                                qos: from_qos(publish.qos),
                                retained: publish.retain,
                                duplicate: publish.dup,
                            };
                            handler.message_arrived(publish.topic.clone(), message).await;
                        }
                    }
                    Ok(_) => {}
                    Err(error) => {
                        connected.store(false, Ordering::SeqCst);
                        if let Some(tx) = connack_tx.take() {
                            let _ = tx.send(Err(BrokerError::connect_failure(error.to_string())));
                            break;
                        }
                        if *shutdown_rx.borrow() {
                            debug!(%error, "event loop closed during shutdown");
                        } else if let Some(handler) = &callback {
                            handler.connection_lost(error.to_string()).await;
                        }
                        break;
                    }
                }
            }
        });

        self.active = Some(Active {
            client,
            shutdown_tx,
            event_task,
        });

        match tokio::time::timeout(CONNECT_TIMEOUT, connack_rx).await {
            Ok(Ok(result)) => {
                if result.is_err() {
                    self.shutdown_active();
                }
                result
            }
            Ok(Err(_)) => {
                self.shutdown_active();
                Err(BrokerError::connect_failure("event loop exited before acknowledgement"))
            }
            Err(_) => {
                self.shutdown_active();
                Err(BrokerError::connect_failure(
                    "timed out waiting for broker acknowledgement",
                ))
            }
        }
    }

    async fn disconnect(&mut self) -> BrokerResult<()> {
        let Some(client) = self.shutdown_active() else {
            return Ok(());
        };
        if let Err(error) = client.disconnect().await {
            warn!(%error, "broker disconnect failed");
            return Err(BrokerError::DisconnectFailure(Box::new(error)));
        }
        Ok(())
    }

    async fn publish(&self, topic: &Topic, message: &Message) -> BrokerResult<()> {
        let Some(active) = self.active.as_ref() else {
            return Err(BrokerError::publish_failure("no active session"));
        };
        active
            .client
            .publish(
                topic.name(),
                to_qos(message.qos),
                message.retained,
                message.payload.to_vec(),
            )
            .await
            .map_err(|error| BrokerError::PublishFailure(Box::new(error)))
    }

    async fn subscribe(&self, topics: &[Topic]) -> BrokerResult<()> {
        let Some(active) = self.active.as_ref() else {
            return Err(BrokerError::subscribe_failure("no active session"));
        };
        let filters: Vec<SubscribeFilter> = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.name().to_string(), to_qos(topic.qos())))
            .collect();
        active
            .client
            .subscribe_many(filters)
            .await
            .map_err(|error| BrokerError::SubscribeFailure(Box::new(error)))
    }

    /// Session liveness check. rumqttc generates wire pings internally at
    /// the configured keep-alive; a dead event loop is what this reports.
    async fn ping(&self) -> BrokerResult<()> {
        let alive = self
            .active
            .as_ref()
            .map(|active| !active.event_task.is_finished())
            .unwrap_or(false);
        if !alive || !self.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::ping_failure("session closed"));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_callback(&mut self, handler: Arc<dyn BrokerCallback>) {
        self.callback = Some(handler);
    }
}

impl Drop for RumqttBrokerClient {
    fn drop(&mut self) {
        self.shutdown_active();
    }
}
