//! Error taxonomy for broker-facing operations.
//!
//! Every failure coming out of a [`crate::broker::BrokerClient`] is caught at
//! the connection-manager boundary and translated into a status transition
//! plus a broadcast reason string; these types never escape `start`/`stop`/
//! `publish` as unhandled faults.

use crate::manager::ConnectionStatus;
use thiserror::Error;

/// Failures surfaced by broker clients and the connection manager.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connect failed")]
    ConnectFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("disconnect failed")]
    DisconnectFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("publish failed")]
    PublishFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("subscribe failed")]
    SubscribeFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("ping failed")]
    PingFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("not connected - current status: {status}")]
    NotConnected { status: ConnectionStatus },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl BrokerError {
    /// Create a connect failure from a plain message.
    pub fn connect_failure<S: Into<String>>(message: S) -> Self {
        Self::ConnectFailure(message.into().into())
    }

    /// Create a disconnect failure from a plain message.
    pub fn disconnect_failure<S: Into<String>>(message: S) -> Self {
        Self::DisconnectFailure(message.into().into())
    }

    /// Create a publish failure from a plain message.
    pub fn publish_failure<S: Into<String>>(message: S) -> Self {
        Self::PublishFailure(message.into().into())
    }

    /// Create a subscribe failure from a plain message.
    pub fn subscribe_failure<S: Into<String>>(message: S) -> Self {
        Self::SubscribeFailure(message.into().into())
    }

    /// Create a ping failure from a plain message.
    pub fn ping_failure<S: Into<String>>(message: S) -> Self {
        Self::PingFailure(message.into().into())
    }
}

/// Result alias for broker-facing operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_produce_matching_variants() {
        assert!(matches!(
            BrokerError::connect_failure("refused"),
            BrokerError::ConnectFailure(_)
        ));
        assert!(matches!(
            BrokerError::publish_failure("boom"),
            BrokerError::PublishFailure(_)
        ));
        assert!(matches!(
            BrokerError::ping_failure("dead"),
            BrokerError::PingFailure(_)
        ));
    }

    #[test]
    fn not_connected_mentions_status() {
        let err = BrokerError::NotConnected {
            status: ConnectionStatus::WaitingForNetwork,
        };
        assert!(err.to_string().contains("waiting_for_network"));
    }

    #[test]
    fn display_is_non_empty_for_all_variants() {
        let errors = vec![
            BrokerError::connect_failure("a"),
            BrokerError::disconnect_failure("b"),
            BrokerError::publish_failure("c"),
            BrokerError::subscribe_failure("d"),
            BrokerError::ping_failure("e"),
            BrokerError::NotConnected {
                status: ConnectionStatus::Initial,
            },
            BrokerError::InvalidConfiguration("bad".into()),
        ];
        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
