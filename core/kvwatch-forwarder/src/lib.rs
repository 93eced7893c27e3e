//! Change forwarder for key/value watch events.
//!
//! Invoked once per key change, the forwarder runs a strictly linear
//! pipeline:
//!
//! 1. **Input**: read the watch payload from stdin
//! 2. **Decode**: base64-decode the changed value
//! 3. **Secrets**: look up the broker username and password
//! 4. **Connect**: open one broker connection
//! 5. **Declare**: declare the durable fanout exchange (idempotent)
//! 6. **Publish**: publish one persistent message, optionally confirmed
//! 7. **Close**: close the connection
//!
//! Every failure is terminal. Nothing is retried; the watch mechanism
//! decides whether to fire again.
//!
//! Secret lookup and the broker sit behind the [`SecretProvider`] and
//! [`Broker`] traits so the pipeline can run against in-memory fakes.
//!
//! # Example
//!
//! ```
//! use kvwatch_forwarder::broker::mock::MockBroker;
//! use kvwatch_forwarder::secrets::mock::StaticSecretProvider;
//! use kvwatch_forwarder::{Forwarder, ForwarderConfig};
//!
//! # tokio_test_block_on(async {
//! let config = ForwarderConfig::default();
//! let secrets = StaticSecretProvider::for_config(&config.secrets, "guest", "guest");
//! let broker = MockBroker::new();
//! let forwarder = Forwarder::new(config, secrets, broker.clone());
//!
//! let report = forwarder.forward(br#"{"Key":"foo","Value":"YmFy"}"#).await.unwrap();
//! assert_eq!(report.value, "bar");
//! assert_eq!(broker.published().len(), 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod amqp;
pub mod broker;
pub mod config;
mod error;
mod forwarder;
pub mod secrets;

pub use amqp::AmqpBroker;
pub use broker::{Broker, BrokerSession, ExchangeKind, ExchangeSpec, OutgoingMessage};
pub use config::{BrokerConfig, ForwarderConfig, PublishMode, SecretConfig};
pub use error::{ForwardError, ForwardResult};
pub use forwarder::{ForwardReport, Forwarder, read_input};
pub use secrets::{CommandSecretProvider, Credentials, SecretProvider, fetch_credentials};
