//! Service configuration, loaded once at manager construction.
//!
//! Defaults mirror a plain broker setup: port 1883, guest credentials,
//! persistent sessions and a twenty-minute keep-alive.

use crate::broker::{ConnectOptions, QosLevel, Topic};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Longest usable client identifier; brokers commonly reject anything above
/// this once the protocol's leading byte is accounted for.
pub const MAX_CLIENT_ID_LENGTH: usize = 22;

/// Top-level configuration for the connection keeper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub broker: BrokerSection,
    /// Fixed subscription set; established after every successful connect.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionEntry>,
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker host name or address.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_guest")]
    pub username: String,
    #[serde(default = "default_guest")]
    pub password: String,
    /// Whether the broker discards prior session state on connect.
    #[serde(default)]
    pub clean_session: bool,
    /// Maximum silence the broker tolerates before it drops the client.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    /// Stable identifier source; falls back to the HOSTNAME environment
    /// variable when absent.
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionEntry {
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
}

fn default_port() -> u16 {
    1883
}

fn default_guest() -> String {
    "guest".to_string()
}

fn default_keep_alive() -> u16 {
    1200
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ServiceConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker host must not be empty".to_string(),
            ));
        }
        if self.broker.keep_alive_secs == 0 || self.broker.keep_alive_secs > i16::MAX as u16 {
            return Err(ConfigError::InvalidConfig(format!(
                "keep_alive_secs must be in 1..={}, got {}",
                i16::MAX,
                self.broker.keep_alive_secs
            )));
        }
        for entry in &self.subscriptions {
            if entry.topic.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "subscription topic must not be empty".to_string(),
                ));
            }
            if entry.qos > 2 {
                return Err(ConfigError::InvalidConfig(format!(
                    "subscription qos must be 0, 1 or 2, got {}",
                    entry.qos
                )));
            }
        }
        Ok(())
    }

    /// Build the configured subscription set as validated topics.
    pub fn subscription_topics(&self) -> Result<Vec<Topic>, ConfigError> {
        self.subscriptions
            .iter()
            .map(|entry| {
                let qos = QosLevel::try_from(entry.qos)
                    .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
                Topic::new(entry.topic.clone(), qos)
                    .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
            })
            .collect()
    }

    /// Build fresh connect options for one connection attempt.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            clean_session: self.broker.clean_session,
            keep_alive_secs: self.broker.keep_alive_secs,
            username: self.broker.username.clone(),
            password: self.broker.password.clone().into_bytes(),
        }
    }

    /// Derive the client identity from the configured source, falling back
    /// to the HOSTNAME environment variable.
    pub fn client_identity(&self) -> Result<ClientIdentity, ConfigError> {
        match &self.broker.client_id {
            Some(source) => ClientIdentity::derive(source),
            None => {
                let hostname = std::env::var("HOSTNAME").map_err(|_| {
                    ConfigError::InvalidConfig(
                        "no client_id configured and HOSTNAME is unset".to_string(),
                    )
                })?;
                ClientIdentity::derive(&hostname)
            }
        }
    }
}

/// Client identifier, unique per broker, derived once from a stable source
/// and truncated to the protocol's maximum usable length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn derive(source: &str) -> Result<Self, ConfigError> {
        if source.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "client id source must not be empty".to_string(),
            ));
        }
        // Bound is in characters; byte truncation could split a multi-byte
        // character and panic.
        let id: String = source.chars().take(MAX_CLIENT_ID_LENGTH).collect();
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_toml() -> &'static str {
        r#"
[broker]
host = "broker.test"

[[subscriptions]]
topic = "t1"
qos = 0
"#
    }

    #[test]
    fn defaults_applied() {
        let config: ServiceConfig = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.username, "guest");
        assert_eq!(config.broker.password, "guest");
        assert!(!config.broker.clean_session);
        assert_eq!(config.broker.keep_alive_secs, 1200);
        assert_eq!(config.subscriptions.len(), 1);
    }

    #[test]
    fn load_from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(minimal_toml().as_bytes()).unwrap();
        let config = ServiceConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.broker.host, "broker.test");
    }

    #[test]
    fn zero_keep_alive_rejected() {
        let mut config: ServiceConfig = toml::from_str(minimal_toml()).unwrap();
        config.broker.keep_alive_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn keep_alive_above_int16_rejected() {
        let mut config: ServiceConfig = toml::from_str(minimal_toml()).unwrap();
        config.broker.keep_alive_secs = 40_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_subscription_topic_rejected() {
        let mut config: ServiceConfig = toml::from_str(minimal_toml()).unwrap();
        config.subscriptions[0].topic.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_qos_rejected() {
        let mut config: ServiceConfig = toml::from_str(minimal_toml()).unwrap();
        config.subscriptions[0].qos = 3;
        assert!(config.validate().is_err());
        assert!(config.subscription_topics().is_err());
    }

    #[test]
    fn connect_options_built_from_config() {
        let config: ServiceConfig = toml::from_str(minimal_toml()).unwrap();
        let options = config.connect_options();
        assert!(!options.clean_session);
        assert_eq!(options.keep_alive_secs, 1200);
        assert_eq!(options.username, "guest");
        assert_eq!(options.password, b"guest".to_vec());
    }

    #[test]
    fn identity_truncated_to_max_length() {
        let identity = ClientIdentity::derive("0123456789abcdef0123456789").unwrap();
        assert_eq!(identity.as_str().len(), MAX_CLIENT_ID_LENGTH);
        assert_eq!(identity.as_str(), "0123456789abcdef012345");
    }

    #[test]
    fn identity_truncates_multibyte_sources_by_character() {
        // 21 ASCII characters followed by a two-byte character: position 22
        // is not a byte boundary.
        let source = "aaaaaaaaaaaaaaaaaaaaa\u{e9}xyz";
        let identity = ClientIdentity::derive(source).unwrap();
        assert_eq!(identity.as_str().chars().count(), MAX_CLIENT_ID_LENGTH);
        assert_eq!(identity.as_str(), "aaaaaaaaaaaaaaaaaaaaa\u{e9}");

        let all_multibyte = "\u{e9}".repeat(30);
        let identity = ClientIdentity::derive(&all_multibyte).unwrap();
        assert_eq!(identity.as_str().chars().count(), MAX_CLIENT_ID_LENGTH);
    }

    #[test]
    fn identity_rejects_empty_source() {
        assert!(ClientIdentity::derive("").is_err());
    }

    #[test]
    fn short_identity_kept_verbatim() {
        let identity = ClientIdentity::derive("device-7").unwrap();
        assert_eq!(identity.as_str(), "device-7");
    }
}
