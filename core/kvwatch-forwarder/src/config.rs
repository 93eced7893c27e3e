//! Forwarder configuration.
//!
//! Defaults reproduce the stock deployment: a local broker sidecar and
//! credentials stored in the service-discovery key/value store.

use crate::error::{ForwardError, ForwardResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Exchange every change is published to.
pub const DEFAULT_EXCHANGE: &str = "KV_CHANGED_EXCHANGE";

/// Broker endpoint and exchange settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// AMQP virtual host.
    pub vhost: String,
    /// Name of the fanout exchange.
    pub exchange: String,
    /// Upper bound on establishing the connection and channel (in seconds).
    pub connect_timeout_secs: u64,
    /// Upper bound on each declare, publish and close call (in seconds).
    pub operation_timeout_secs: u64,
}

impl BrokerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.78.0.2".to_string(),
            port: 20006,
            vhost: "/".to_string(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            connect_timeout_secs: 10,
            operation_timeout_secs: 10,
        }
    }
}

/// Where and how broker credentials are looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretConfig {
    /// Lookup tool, invoked as `<command> kv get -token-file=<token_file> <key>`.
    pub command: String,
    pub token_file: PathBuf,
    /// First segment of the credential key paths.
    pub key_prefix: String,
    /// Optional environment segment between prefix and credential name.
    pub environment: Option<String>,
    /// Upper bound on a single lookup (in seconds).
    pub timeout_secs: u64,
}

impl SecretConfig {
    /// Key path holding the broker username.
    pub fn username_key(&self) -> String {
        self.key_path("username")
    }

    /// Key path holding the broker password.
    pub fn password_key(&self) -> String {
        self.key_path("password")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn key_path(&self, name: &str) -> String {
        match self.environment.as_deref().filter(|env| !env.is_empty()) {
            Some(env) => format!("{}/{}/{}", self.key_prefix, env, name),
            None => format!("{}/{}", self.key_prefix, name),
        }
    }
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            command: "consul".to_string(),
            token_file: PathBuf::from("/etc/carbonio/files/service-discover/token"),
            key_prefix: "carbonio-message-broker".to_string(),
            environment: Some("default".to_string()),
            timeout_secs: 10,
        }
    }
}

/// Whether a publish waits for the broker's acknowledgment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishMode {
    /// Enable publisher confirms and block until the broker acks.
    #[default]
    Confirmed,
    /// Publish without waiting for an acknowledgment.
    FireAndForget,
}

impl PublishMode {
    pub fn waits_for_confirm(self) -> bool {
        matches!(self, PublishMode::Confirmed)
    }
}

/// Complete forwarder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    pub broker: BrokerConfig,
    pub secrets: SecretConfig,
    pub publish_mode: PublishMode,
    /// Upper bound on waiting for a publish confirmation (in seconds).
    pub confirm_timeout_secs: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            secrets: SecretConfig::default(),
            publish_mode: PublishMode::default(),
            confirm_timeout_secs: 10,
        }
    }
}

impl ForwarderConfig {
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    /// Rejects values that would make the run fail in a confusing way later.
    pub fn validate(&self) -> ForwardResult<()> {
        let checks = [
            (self.broker.host.trim().is_empty(), "broker host is empty"),
            (self.broker.port == 0, "broker port must be non-zero"),
            (self.broker.exchange.trim().is_empty(), "exchange name is empty"),
            (
                self.broker.connect_timeout_secs == 0,
                "connect timeout must be non-zero",
            ),
            (
                self.broker.operation_timeout_secs == 0,
                "operation timeout must be non-zero",
            ),
            (self.secrets.command.trim().is_empty(), "lookup command is empty"),
            (self.secrets.key_prefix.trim().is_empty(), "secret key prefix is empty"),
            (self.secrets.timeout_secs == 0, "lookup timeout must be non-zero"),
            (
                self.publish_mode.waits_for_confirm() && self.confirm_timeout_secs == 0,
                "confirm timeout must be non-zero",
            ),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(ForwardError::Config((*reason).to_string())),
            None => Ok(()),
        }
    }
}
