//! Message broker abstraction.
//!
//! The forwarder only needs a tiny slice of a broker client: connect,
//! declare one exchange, publish one message, close. [`Broker`] and
//! [`BrokerSession`] capture that slice so the pipeline can run against
//! [`mock::MockBroker`] as well as the AMQP implementation.

use crate::config::PublishMode;
use crate::error::ForwardResult;
use crate::secrets::Credentials;
use async_trait::async_trait;
use uuid::Uuid;

/// Routing behaviour of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Copies every message to all bound queues, ignoring the routing key.
    Fanout,
}

/// Parameters an exchange is declared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    /// Survives broker restarts.
    pub durable: bool,
}

impl ExchangeSpec {
    /// A durable fanout exchange.
    pub fn durable_fanout(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Fanout,
            durable: true,
        }
    }
}

/// A message ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    /// Persistent delivery (AMQP delivery mode 2).
    pub persistent: bool,
    pub content_type: String,
    pub message_id: Uuid,
}

impl OutgoingMessage {
    /// A persistent JSON message with an empty routing key.
    pub fn persistent_json(exchange: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: String::new(),
            body,
            persistent: true,
            content_type: "application/json".to_string(),
            message_id: Uuid::now_v7(),
        }
    }
}

/// Opens sessions to a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Connects with the given credentials.
    ///
    /// In [`PublishMode::Confirmed`] the session enables publisher
    /// confirms before returning.
    async fn connect(
        &self,
        credentials: &Credentials,
        mode: PublishMode,
    ) -> ForwardResult<Box<dyn BrokerSession>>;
}

/// One open broker connection with a single channel.
#[async_trait]
pub trait BrokerSession: Send {
    /// Declares an exchange. Repeating a declaration with identical
    /// parameters is a no-op; differing parameters fail with
    /// `ExchangeConflict`.
    async fn declare_exchange(&mut self, spec: &ExchangeSpec) -> ForwardResult<()>;

    /// Publishes a message. Returns `true` when the broker acknowledged it,
    /// `false` when the session does not wait for confirmations.
    async fn publish(&mut self, message: &OutgoingMessage) -> ForwardResult<bool>;

    /// Closes the connection.
    async fn close(self: Box<Self>) -> ForwardResult<()>;
}

/// An in-memory broker for testing.
pub mod mock {
    use super::*;
    use crate::error::ForwardError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct MockState {
        connect_attempts: usize,
        accepted: Option<Credentials>,
        exchanges: HashMap<String, ExchangeSpec>,
        declarations: usize,
        published: Vec<OutgoingMessage>,
        nack_publishes: bool,
        open_sessions: usize,
        closed_sessions: usize,
    }

    /// A broker that records everything it is asked to do.
    /// Cloning shares the recorded state.
    #[derive(Debug, Clone, Default)]
    pub struct MockBroker {
        state: Arc<Mutex<MockState>>,
    }

    impl MockBroker {
        /// A broker that accepts any credentials.
        pub fn new() -> Self {
            Self::default()
        }

        /// Only `credentials` are accepted; anything else is rejected at connect.
        pub fn with_credentials(self, credentials: Credentials) -> Self {
            self.state.lock().unwrap().accepted = Some(credentials);
            self
        }

        /// Pretends an exchange already exists with the given parameters.
        pub fn with_existing_exchange(self, spec: ExchangeSpec) -> Self {
            self.state
                .lock()
                .unwrap()
                .exchanges
                .insert(spec.name.clone(), spec);
            self
        }

        /// Makes the broker nack every publish. Only confirmed sessions see it.
        pub fn nacking(self) -> Self {
            self.state.lock().unwrap().nack_publishes = true;
            self
        }

        pub fn connect_attempts(&self) -> usize {
            self.state.lock().unwrap().connect_attempts
        }

        pub fn exchange(&self, name: &str) -> Option<ExchangeSpec> {
            self.state.lock().unwrap().exchanges.get(name).cloned()
        }

        /// Number of declare calls that succeeded.
        pub fn declarations(&self) -> usize {
            self.state.lock().unwrap().declarations
        }

        /// Messages the broker accepted for routing (nacked ones excluded).
        pub fn published(&self) -> Vec<OutgoingMessage> {
            self.state.lock().unwrap().published.clone()
        }

        /// Sessions opened and not yet closed.
        pub fn open_sessions(&self) -> usize {
            self.state.lock().unwrap().open_sessions
        }

        pub fn closed_sessions(&self) -> usize {
            self.state.lock().unwrap().closed_sessions
        }
    }

    #[async_trait]
    impl Broker for MockBroker {
        async fn connect(
            &self,
            credentials: &Credentials,
            mode: PublishMode,
        ) -> ForwardResult<Box<dyn BrokerSession>> {
            let mut state = self.state.lock().unwrap();
            state.connect_attempts += 1;
            if let Some(accepted) = &state.accepted {
                if accepted != credentials {
                    return Err(ForwardError::Connection(format!(
                        "ACCESS_REFUSED - login was refused for user {}",
                        credentials.username
                    )));
                }
            }
            state.open_sessions += 1;

            Ok(Box::new(MockSession {
                state: Arc::clone(&self.state),
                confirms: mode.waits_for_confirm(),
            }))
        }
    }

    struct MockSession {
        state: Arc<Mutex<MockState>>,
        confirms: bool,
    }

    #[async_trait]
    impl BrokerSession for MockSession {
        async fn declare_exchange(&mut self, spec: &ExchangeSpec) -> ForwardResult<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(existing) = state.exchanges.get(&spec.name) {
                if existing != spec {
                    return Err(ForwardError::ExchangeConflict {
                        exchange: spec.name.clone(),
                        reason: format!("declared as {existing:?}"),
                    });
                }
            }
            state.exchanges.insert(spec.name.clone(), spec.clone());
            state.declarations += 1;
            Ok(())
        }

        async fn publish(&mut self, message: &OutgoingMessage) -> ForwardResult<bool> {
            let mut state = self.state.lock().unwrap();
            if !state.exchanges.contains_key(&message.exchange) {
                return Err(ForwardError::Channel(format!(
                    "NOT_FOUND - no exchange '{}'",
                    message.exchange
                )));
            }
            if state.nack_publishes {
                if self.confirms {
                    return Err(ForwardError::PublishNotConfirmed(
                        "broker nacked the message".to_string(),
                    ));
                }
                return Ok(false);
            }
            state.published.push(message.clone());
            Ok(self.confirms)
        }

        async fn close(self: Box<Self>) -> ForwardResult<()> {
            let mut state = self.state.lock().unwrap();
            state.open_sessions -= 1;
            state.closed_sessions += 1;
            Ok(())
        }
    }
}
