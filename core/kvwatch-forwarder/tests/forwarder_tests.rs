use kvwatch_forwarder::broker::mock::MockBroker;
use kvwatch_forwarder::secrets::mock::StaticSecretProvider;
use kvwatch_forwarder::{
    Credentials, ExchangeKind, ExchangeSpec, ForwardError, Forwarder, ForwarderConfig,
    PublishMode, read_input,
};
use kvwatch_types::ChangeMessage;
use pretty_assertions::assert_eq;

const FOO_BAR: &[u8] = br#"{"Key":"foo","Value":"YmFy"}"#;

fn config(mode: PublishMode) -> ForwarderConfig {
    ForwarderConfig {
        publish_mode: mode,
        ..Default::default()
    }
}

fn secrets(config: &ForwarderConfig) -> StaticSecretProvider {
    StaticSecretProvider::for_config(&config.secrets, "files", "s3cr3t")
}

fn forwarder(
    config: ForwarderConfig,
    broker: &MockBroker,
) -> Forwarder<StaticSecretProvider, MockBroker> {
    let secrets = secrets(&config);
    Forwarder::new(config, secrets, broker.clone())
}

// ── Happy path ──────────────────────────────────────────────────

#[tokio::test]
async fn forwards_change_as_json_body() {
    let broker = MockBroker::new();
    let report = forwarder(config(PublishMode::Confirmed), &broker)
        .forward(FOO_BAR)
        .await
        .unwrap();

    assert_eq!(report.key, "foo");
    assert_eq!(report.value, "bar");
    assert_eq!(report.exchange, "KV_CHANGED_EXCHANGE");
    assert!(report.confirmed);

    let published = broker.published();
    assert_eq!(published.len(), 1);
    let message = &published[0];
    assert_eq!(message.exchange, "KV_CHANGED_EXCHANGE");
    assert_eq!(message.routing_key, "");
    assert!(message.persistent);
    assert_eq!(message.content_type, "application/json");
    assert_eq!(message.message_id, report.message_id);
    assert_eq!(
        String::from_utf8(message.body.clone()).unwrap(),
        r#"{"key":"foo","value":"bar"}"#
    );
}

#[tokio::test]
async fn declares_durable_fanout_exchange() {
    let broker = MockBroker::new();
    forwarder(config(PublishMode::Confirmed), &broker)
        .forward(FOO_BAR)
        .await
        .unwrap();

    let exchange = broker.exchange("KV_CHANGED_EXCHANGE").unwrap();
    assert_eq!(exchange.kind, ExchangeKind::Fanout);
    assert!(exchange.durable);
}

#[tokio::test]
async fn closes_connection_after_publish() {
    let broker = MockBroker::new();
    forwarder(config(PublishMode::FireAndForget), &broker)
        .forward(FOO_BAR)
        .await
        .unwrap();

    assert_eq!(broker.connect_attempts(), 1);
    assert_eq!(broker.open_sessions(), 0);
    assert_eq!(broker.closed_sessions(), 1);
}

#[tokio::test]
async fn looks_up_username_then_password() {
    let config = config(PublishMode::Confirmed);
    let secrets = secrets(&config);
    let broker = MockBroker::new().with_credentials(Credentials::new("files", "s3cr3t"));
    Forwarder::new(config, secrets.clone(), broker.clone())
        .forward(FOO_BAR)
        .await
        .unwrap();

    assert_eq!(
        secrets.lookups(),
        vec![
            "carbonio-message-broker/default/username".to_string(),
            "carbonio-message-broker/default/password".to_string(),
        ]
    );
}

#[tokio::test]
async fn uses_configured_exchange_name() {
    let mut config = config(PublishMode::Confirmed);
    config.broker.exchange = "OTHER_EXCHANGE".into();
    let broker = MockBroker::new();
    let report = forwarder(config, &broker).forward(FOO_BAR).await.unwrap();

    assert_eq!(report.exchange, "OTHER_EXCHANGE");
    assert!(broker.exchange("OTHER_EXCHANGE").is_some());
    assert!(broker.exchange("KV_CHANGED_EXCHANGE").is_none());
}

#[tokio::test]
async fn repeated_runs_reuse_exchange() {
    let broker = MockBroker::new();
    let forwarder = forwarder(config(PublishMode::Confirmed), &broker);
    forwarder.forward(FOO_BAR).await.unwrap();
    forwarder
        .forward(br#"{"Key":"foo","Value":"YmF6"}"#)
        .await
        .unwrap();

    assert_eq!(broker.declarations(), 2);
    let values: Vec<String> = broker
        .published()
        .iter()
        .map(|m| ChangeMessage::from_body(&m.body).unwrap().value)
        .collect();
    assert_eq!(values, vec!["bar".to_string(), "baz".to_string()]);
}

// ── Failures before the broker ──────────────────────────────────

#[tokio::test]
async fn malformed_json_never_connects() {
    let broker = MockBroker::new();
    let err = forwarder(config(PublishMode::Confirmed), &broker)
        .forward(b"{not json")
        .await
        .unwrap_err();

    assert!(matches!(err, ForwardError::Input(_)));
    assert_ne!(err.exit_code(), 0);
    assert_eq!(broker.connect_attempts(), 0);
}

#[tokio::test]
async fn empty_input_never_connects() {
    let broker = MockBroker::new();
    let err = forwarder(config(PublishMode::Confirmed), &broker)
        .forward(b"")
        .await
        .unwrap_err();

    assert!(matches!(err, ForwardError::Input(_)));
    assert_eq!(broker.connect_attempts(), 0);
}

#[tokio::test]
async fn invalid_base64_publishes_nothing() {
    let config = config(PublishMode::Confirmed);
    let secrets = secrets(&config);
    let broker = MockBroker::new();
    let err = Forwarder::new(config, secrets.clone(), broker.clone())
        .forward(br#"{"Key":"foo","Value":"not-base64!"}"#)
        .await
        .unwrap_err();

    assert!(matches!(err, ForwardError::Decode(_)));
    assert_ne!(err.exit_code(), 0);
    assert!(secrets.lookups().is_empty());
    assert_eq!(broker.connect_attempts(), 0);
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn missing_password_never_connects() {
    let config = config(PublishMode::Confirmed);
    let secrets =
        StaticSecretProvider::new().with_secret(&config.secrets.username_key(), "files");
    let broker = MockBroker::new();
    let err = Forwarder::new(config, secrets, broker.clone())
        .forward(FOO_BAR)
        .await
        .unwrap_err();

    match err {
        ForwardError::SecretLookup { key, .. } => {
            assert_eq!(key, "carbonio-message-broker/default/password")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(broker.connect_attempts(), 0);
}

#[tokio::test]
async fn missing_username_stops_before_password() {
    let config = config(PublishMode::Confirmed);
    let secrets =
        StaticSecretProvider::new().with_secret(&config.secrets.password_key(), "s3cr3t");
    let broker = MockBroker::new();
    let err = Forwarder::new(config, secrets.clone(), broker.clone())
        .forward(FOO_BAR)
        .await
        .unwrap_err();

    assert!(matches!(err, ForwardError::SecretLookup { .. }));
    assert_eq!(secrets.lookups().len(), 1);
    assert_eq!(broker.connect_attempts(), 0);
}

#[tokio::test]
async fn invalid_config_fails_first() {
    let mut config = config(PublishMode::Confirmed);
    config.broker.exchange = String::new();
    let broker = MockBroker::new();
    let err = forwarder(config, &broker).forward(FOO_BAR).await.unwrap_err();

    assert!(matches!(err, ForwardError::Config(_)));
    assert_eq!(broker.connect_attempts(), 0);
}

// ── Broker failures ─────────────────────────────────────────────

#[tokio::test]
async fn rejected_credentials_fail_connection() {
    let broker = MockBroker::new().with_credentials(Credentials::new("files", "other"));
    let err = forwarder(config(PublishMode::Confirmed), &broker)
        .forward(FOO_BAR)
        .await
        .unwrap_err();

    assert!(matches!(err, ForwardError::Connection(_)));
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn conflicting_exchange_fails_and_closes() {
    let broker = MockBroker::new().with_existing_exchange(ExchangeSpec {
        name: "KV_CHANGED_EXCHANGE".into(),
        kind: ExchangeKind::Fanout,
        durable: false,
    });
    let err = forwarder(config(PublishMode::Confirmed), &broker)
        .forward(FOO_BAR)
        .await
        .unwrap_err();

    assert!(matches!(err, ForwardError::ExchangeConflict { .. }));
    assert!(broker.published().is_empty());
    assert_eq!(broker.open_sessions(), 0);
}

#[tokio::test]
async fn existing_identical_exchange_is_fine() {
    let broker = MockBroker::new()
        .with_existing_exchange(ExchangeSpec::durable_fanout("KV_CHANGED_EXCHANGE"));
    forwarder(config(PublishMode::Confirmed), &broker)
        .forward(FOO_BAR)
        .await
        .unwrap();

    assert_eq!(broker.published().len(), 1);
}

#[tokio::test]
async fn nack_fails_confirmed_publish() {
    let broker = MockBroker::new().nacking();
    let err = forwarder(config(PublishMode::Confirmed), &broker)
        .forward(FOO_BAR)
        .await
        .unwrap_err();

    assert!(matches!(err, ForwardError::PublishNotConfirmed(_)));
    assert_eq!(broker.closed_sessions(), 1);
}

#[tokio::test]
async fn nack_is_invisible_to_fire_and_forget() {
    let broker = MockBroker::new().nacking();
    let report = forwarder(config(PublishMode::FireAndForget), &broker)
        .forward(FOO_BAR)
        .await
        .unwrap();

    assert!(!report.confirmed);
}

// ── Input reading ───────────────────────────────────────────────

#[tokio::test]
async fn read_input_reads_to_end() {
    let input = read_input(&FOO_BAR[..]).await.unwrap();
    assert_eq!(input, FOO_BAR);
}

#[tokio::test]
async fn read_input_accepts_empty_stream() {
    let input = read_input(tokio::io::empty()).await.unwrap();
    assert!(input.is_empty());
}
