//! The forwarding pipeline.

use crate::broker::{Broker, BrokerSession, ExchangeSpec, OutgoingMessage};
use crate::config::ForwarderConfig;
use crate::error::{ForwardError, ForwardResult};
use crate::secrets::{SecretProvider, fetch_credentials};
use kvwatch_types::ChangeEvent;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardReport {
    pub key: String,
    pub value: String,
    pub exchange: String,
    pub message_id: Uuid,
    /// True when the broker acknowledged the publish.
    pub confirmed: bool,
}

/// Reads the whole watch payload.
pub async fn read_input<R: AsyncRead + Unpin>(mut reader: R) -> ForwardResult<Vec<u8>> {
    let mut input = Vec::new();
    reader
        .read_to_end(&mut input)
        .await
        .map_err(|e| ForwardError::Input(format!("cannot read input: {e}")))?;
    Ok(input)
}

/// Forwards one key change to the broker.
pub struct Forwarder<S, B> {
    config: ForwarderConfig,
    secrets: S,
    broker: B,
}

impl<S: SecretProvider, B: Broker> Forwarder<S, B> {
    pub fn new(config: ForwarderConfig, secrets: S, broker: B) -> Self {
        Self {
            config,
            secrets,
            broker,
        }
    }

    /// Runs the whole pipeline for one watch payload.
    ///
    /// Input is parsed and decoded before any secret is looked up, and both
    /// secrets are resolved before the broker is contacted.
    pub async fn forward(&self, input: &[u8]) -> ForwardResult<ForwardReport> {
        self.config.validate()?;

        let event = ChangeEvent::from_watch_json(input)?;
        info!("Key {} has been changed into {}.", event.key, event.value);
        let body = event.to_message_body()?;

        let credentials = fetch_credentials(&self.secrets, &self.config.secrets).await?;
        debug!("Retrieved broker credentials for {}", credentials.username);

        let mut session = self
            .broker
            .connect(&credentials, self.config.publish_mode)
            .await?;

        let outcome = self.publish(session.as_mut(), body).await;
        // The message is already out once publish returns; a failed close
        // must not turn the run into a failure.
        if let Err(e) = session.close().await {
            warn!("Closing broker connection failed: {}", e);
        }

        let (message, confirmed) = outcome?;
        Ok(ForwardReport {
            key: event.key,
            value: event.value,
            exchange: message.exchange,
            message_id: message.message_id,
            confirmed,
        })
    }

    async fn publish(
        &self,
        session: &mut dyn BrokerSession,
        body: Vec<u8>,
    ) -> ForwardResult<(OutgoingMessage, bool)> {
        let exchange = &self.config.broker.exchange;
        session
            .declare_exchange(&ExchangeSpec::durable_fanout(exchange.as_str()))
            .await?;
        info!("Declared '{}'", exchange);

        let message = OutgoingMessage::persistent_json(exchange.as_str(), body);
        let confirmed = session.publish(&message).await?;
        if confirmed {
            info!("Message published and confirmed");
        } else {
            info!("Message published");
        }

        Ok((message, confirmed))
    }
}
