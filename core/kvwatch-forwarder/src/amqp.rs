//! AMQP 0-9-1 broker implementation using lapin.
//!
//! Every broker round-trip is bounded: connection setup (handshake, channel
//! open, confirm select) by the connect timeout, declare/publish/close by
//! the operation timeout, and the publisher confirmation by the confirm
//! timeout.

use crate::broker::{Broker, BrokerSession, ExchangeKind, ExchangeSpec, OutgoingMessage};
use crate::config::{BrokerConfig, PublishMode};
use crate::error::{ForwardError, ForwardResult};
use crate::secrets::Credentials;
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::FieldTable;
use lapin::uri::{AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::timeout;
use tracing::{debug, warn};

const PERSISTENT_DELIVERY_MODE: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// Connects to an AMQP broker.
#[derive(Debug, Clone)]
pub struct AmqpBroker {
    config: BrokerConfig,
    confirm_timeout: Duration,
}

impl AmqpBroker {
    pub fn new(config: BrokerConfig, confirm_timeout: Duration) -> Self {
        Self {
            config,
            confirm_timeout,
        }
    }

    fn uri(&self, credentials: &Credentials) -> AMQPUri {
        let mut uri = AMQPUri::default();
        uri.authority.host = self.config.host.clone();
        uri.authority.port = self.config.port;
        uri.authority.userinfo = AMQPUserInfo {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        };
        uri.vhost = self.config.vhost.clone();
        uri
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(
        &self,
        credentials: &Credentials,
        mode: PublishMode,
    ) -> ForwardResult<Box<dyn BrokerSession>> {
        debug!(
            "Connecting to amqp://{}:{}{} as {}",
            self.config.host, self.config.port, self.config.vhost, credentials.username
        );

        let limit = self.config.connect_timeout();
        let connect = async {
            Connection::connect_uri(self.uri(credentials), ConnectionProperties::default())
                .await
                .map_err(|e| ForwardError::Connection(e.to_string()))
        };
        let connection = bounded(limit, "connect", connect, ForwardError::Connection).await?;

        let channel = match bounded(
            limit,
            "channel setup",
            open_channel(&connection, mode),
            ForwardError::Connection,
        )
        .await
        {
            Ok(channel) => channel,
            Err(e) => {
                let close = async {
                    connection
                        .close(REPLY_SUCCESS, "channel setup failed")
                        .await
                        .map_err(|e| ForwardError::Channel(e.to_string()))
                };
                let closed = bounded(limit, "close", close, ForwardError::Channel).await;
                if let Err(close_err) = closed {
                    debug!("Closing after failed channel setup: {}", close_err);
                }
                return Err(e);
            }
        };

        Ok(Box::new(AmqpSession {
            connection,
            channel,
            mode,
            operation_timeout: self.config.operation_timeout(),
            confirm_timeout: self.confirm_timeout,
        }))
    }
}

async fn open_channel(connection: &Connection, mode: PublishMode) -> ForwardResult<Channel> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| ForwardError::Connection(format!("cannot open channel: {e}")))?;

    if mode.waits_for_confirm() {
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| ForwardError::Channel(format!("cannot enable confirms: {e}")))?;
    }

    Ok(channel)
}

/// Runs `future` with an upper bound; expiry is reported through `expired`.
async fn bounded<T, F>(
    limit: Duration,
    step: &str,
    future: F,
    expired: fn(String) -> ForwardError,
) -> ForwardResult<T>
where
    F: Future<Output = ForwardResult<T>>,
{
    match timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(expired(format!("{step} timed out after {}s", limit.as_secs()))),
    }
}

/// An open AMQP connection and its single channel.
pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
    mode: PublishMode,
    operation_timeout: Duration,
    confirm_timeout: Duration,
}

#[async_trait]
impl BrokerSession for AmqpSession {
    async fn declare_exchange(&mut self, spec: &ExchangeSpec) -> ForwardResult<()> {
        let kind = match spec.kind {
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        };
        let options = ExchangeDeclareOptions {
            durable: spec.durable,
            ..Default::default()
        };

        let declare = async {
            self.channel
                .exchange_declare(&spec.name, kind, options, FieldTable::default())
                .await
                .map_err(|e| declare_error(&spec.name, e))
        };
        let limit = self.operation_timeout;
        bounded(limit, "exchange declare", declare, ForwardError::Channel).await
    }

    async fn publish(&mut self, message: &OutgoingMessage) -> ForwardResult<bool> {
        let send = async {
            self.channel
                .basic_publish(
                    &message.exchange,
                    &message.routing_key,
                    BasicPublishOptions::default(),
                    &message.body,
                    message_properties(message, unix_now()),
                )
                .await
                .map_err(|e| ForwardError::Channel(e.to_string()))
        };
        let limit = self.operation_timeout;
        let confirm = bounded(limit, "publish", send, ForwardError::Channel).await?;

        if !self.mode.waits_for_confirm() {
            return Ok(false);
        }

        let wait = async {
            confirm
                .await
                .map_err(|e| ForwardError::PublishNotConfirmed(e.to_string()))
        };
        let confirmation = bounded(
            self.confirm_timeout,
            "confirmation",
            wait,
            ForwardError::PublishNotConfirmed,
        )
        .await?;

        if confirmation.is_nack() {
            return Err(ForwardError::PublishNotConfirmed(
                "broker nacked the message".to_string(),
            ));
        }
        Ok(true)
    }

    async fn close(self: Box<Self>) -> ForwardResult<()> {
        let limit = self.operation_timeout;
        let channel_close = async {
            self.channel
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|e| ForwardError::Channel(e.to_string()))
        };
        let closed = bounded(limit, "channel close", channel_close, ForwardError::Channel).await;
        if let Err(e) = closed {
            warn!("Channel close failed: {}", e);
        }

        let connection_close = async {
            self.connection
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|e| ForwardError::Channel(format!("close failed: {e}")))
        };
        bounded(limit, "connection close", connection_close, ForwardError::Channel).await
    }
}

fn message_properties(message: &OutgoingMessage, timestamp: u64) -> BasicProperties {
    let properties = BasicProperties::default()
        .with_content_type(message.content_type.clone().into())
        .with_message_id(message.message_id.to_string().into())
        .with_timestamp(timestamp);
    if message.persistent {
        properties.with_delivery_mode(PERSISTENT_DELIVERY_MODE)
    } else {
        properties
    }
}

fn declare_error(exchange: &str, err: lapin::Error) -> ForwardError {
    if is_precondition_failed(&err) {
        ForwardError::ExchangeConflict {
            exchange: exchange.to_string(),
            reason: err.to_string(),
        }
    } else {
        ForwardError::Channel(err.to_string())
    }
}

fn is_precondition_failed(err: &lapin::Error) -> bool {
    match err {
        lapin::Error::ProtocolError(amqp) => matches!(
            amqp.kind(),
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
        ),
        _ => false,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
