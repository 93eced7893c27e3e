//! Command-line surface of the kvwatch handler.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kvwatch_forwarder::{
    AmqpBroker, BrokerConfig, CommandSecretProvider, ForwardError, ForwardReport, Forwarder,
    ForwarderConfig, PublishMode, SecretConfig, read_input,
};
use std::path::PathBuf;
use tokio::io::AsyncRead;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Exit code for failures that are not a classified forwarding error.
pub const EXIT_UNCLASSIFIED: u8 = 1;

#[derive(Parser, Debug, Clone)]
#[command(name = "kvwatch-handler")]
#[command(about = "Publishes a key/value watch event to the message broker")]
pub struct Args {
    /// Broker host
    #[arg(long, env = "KVWATCH_BROKER_HOST", default_value = "127.78.0.2")]
    pub broker_host: String,

    /// Broker port
    #[arg(long, env = "KVWATCH_BROKER_PORT", default_value = "20006")]
    pub broker_port: u16,

    /// AMQP virtual host
    #[arg(long, env = "KVWATCH_VHOST", default_value = "/")]
    pub vhost: String,

    /// Fanout exchange receiving the change events
    #[arg(long, env = "KVWATCH_EXCHANGE", default_value = "KV_CHANGED_EXCHANGE")]
    pub exchange: String,

    /// Key/value store CLI used to read broker credentials
    #[arg(long, env = "KVWATCH_LOOKUP_COMMAND", default_value = "consul")]
    pub lookup_command: String,

    /// Token file passed to the lookup command
    #[arg(
        long,
        env = "KVWATCH_TOKEN_FILE",
        default_value = "/etc/carbonio/files/service-discover/token"
    )]
    pub token_file: PathBuf,

    /// First segment of the credential key paths
    #[arg(long, env = "KVWATCH_KEY_PREFIX", default_value = "carbonio-message-broker")]
    pub key_prefix: String,

    /// Environment segment of the credential key paths
    #[arg(long, env = "KVWATCH_ENVIRONMENT", default_value = "default")]
    pub environment: String,

    /// Read credentials from <prefix>/username and <prefix>/password
    #[arg(long, env = "KVWATCH_NO_ENVIRONMENT")]
    pub no_environment: bool,

    /// Whether to wait for the broker to confirm the publish
    #[arg(long, env = "KVWATCH_PUBLISH_MODE", value_enum, default_value = "confirmed")]
    pub publish_mode: PublishModeArg,

    /// Seconds allowed for connecting to the broker
    #[arg(long, env = "KVWATCH_CONNECT_TIMEOUT_SECS", default_value = "10")]
    pub connect_timeout_secs: u64,

    /// Seconds allowed for each declare, publish and close call
    #[arg(long, env = "KVWATCH_OPERATION_TIMEOUT_SECS", default_value = "10")]
    pub operation_timeout_secs: u64,

    /// Seconds allowed for each credential lookup
    #[arg(long, env = "KVWATCH_LOOKUP_TIMEOUT_SECS", default_value = "10")]
    pub lookup_timeout_secs: u64,

    /// Seconds allowed for the publish confirmation
    #[arg(long, env = "KVWATCH_CONFIRM_TIMEOUT_SECS", default_value = "10")]
    pub confirm_timeout_secs: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PublishModeArg {
    Confirmed,
    FireAndForget,
}

impl From<PublishModeArg> for PublishMode {
    fn from(arg: PublishModeArg) -> Self {
        match arg {
            PublishModeArg::Confirmed => PublishMode::Confirmed,
            PublishModeArg::FireAndForget => PublishMode::FireAndForget,
        }
    }
}

impl Args {
    pub fn to_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            broker: BrokerConfig {
                host: self.broker_host.clone(),
                port: self.broker_port,
                vhost: self.vhost.clone(),
                exchange: self.exchange.clone(),
                connect_timeout_secs: self.connect_timeout_secs,
                operation_timeout_secs: self.operation_timeout_secs,
            },
            secrets: SecretConfig {
                command: self.lookup_command.clone(),
                token_file: self.token_file.clone(),
                key_prefix: self.key_prefix.clone(),
                environment: (!self.no_environment).then(|| self.environment.clone()),
                timeout_secs: self.lookup_timeout_secs,
            },
            publish_mode: self.publish_mode.into(),
            confirm_timeout_secs: self.confirm_timeout_secs,
        }
    }
}

/// Installs the stdout subscriber. INFO lines double as progress output.
pub fn init_tracing(verbose: bool) {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();
}

/// Reads the watch payload from `input` and forwards it with the
/// subprocess lookup and the AMQP broker.
pub async fn run<R: AsyncRead + Unpin>(
    config: ForwarderConfig,
    input: R,
) -> Result<ForwardReport> {
    let payload = read_input(input).await.context("reading watch payload")?;

    let secrets = CommandSecretProvider::new(config.secrets.clone());
    let broker = AmqpBroker::new(config.broker.clone(), config.confirm_timeout());
    let forwarder = Forwarder::new(config, secrets, broker);

    forwarder
        .forward(&payload)
        .await
        .context("forwarding key change")
}

/// Process exit code for a failed run.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ForwardError>()
        .map_or(EXIT_UNCLASSIFIED, ForwardError::exit_code)
}

/// Whether a failed run may have reached the broker.
pub fn broker_contacted(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ForwardError>()
        .is_some_and(|e| !e.is_pre_connect())
}
