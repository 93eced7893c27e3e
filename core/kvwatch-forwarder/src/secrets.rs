//! Broker credential lookup.
//!
//! Credentials live in the key/value store and are read through its
//! command-line tool. The [`SecretProvider`] trait keeps the pipeline
//! independent from the subprocess so tests can use an in-memory store.

use crate::config::SecretConfig;
use crate::error::{ForwardError, ForwardResult};
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Resolves a key path to its secret value.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Returns the secret stored at `key`, with surrounding whitespace removed.
    async fn lookup(&self, key: &str) -> ForwardResult<String>;
}

/// Broker login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Looks up the broker username, then the password.
pub async fn fetch_credentials<P: SecretProvider + ?Sized>(
    provider: &P,
    config: &SecretConfig,
) -> ForwardResult<Credentials> {
    let username = provider.lookup(&config.username_key()).await?;
    let password = provider.lookup(&config.password_key()).await?;
    Ok(Credentials { username, password })
}

/// Runs `<command> kv get -token-file=<path> <key>` and reads the secret
/// from its stdout.
#[derive(Debug, Clone)]
pub struct CommandSecretProvider {
    config: SecretConfig,
}

impl CommandSecretProvider {
    pub fn new(config: SecretConfig) -> Self {
        Self { config }
    }

    fn command(&self, key: &str) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.arg("kv")
            .arg("get")
            .arg(format!("-token-file={}", self.config.token_file.display()))
            .arg(key)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SecretProvider for CommandSecretProvider {
    async fn lookup(&self, key: &str) -> ForwardResult<String> {
        let fail = |reason: String| ForwardError::SecretLookup {
            key: key.to_string(),
            reason,
        };

        debug!("Looking up {} via {}", key, self.config.command);
        let output = match timeout(self.config.timeout(), self.command(key).output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(fail(format!("cannot run {}: {e}", self.config.command))),
            Err(_) => {
                return Err(fail(format!(
                    "timed out after {}s",
                    self.config.timeout().as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(fail(format!("{} ({})", output.status, stderr.trim())));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| fail("output is not UTF-8".to_string()))?;
        let secret = stdout.trim();
        if secret.is_empty() {
            return Err(fail("empty output".to_string()));
        }

        Ok(secret.to_string())
    }
}

/// In-memory secret store for testing.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// A secret provider backed by a map. Cloning shares the lookup log.
    #[derive(Debug, Clone, Default)]
    pub struct StaticSecretProvider {
        secrets: HashMap<String, String>,
        lookups: Arc<Mutex<Vec<String>>>,
    }

    impl StaticSecretProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// A provider holding the username and password at the key paths
        /// `config` resolves to.
        pub fn for_config(config: &SecretConfig, username: &str, password: &str) -> Self {
            Self::new()
                .with_secret(&config.username_key(), username)
                .with_secret(&config.password_key(), password)
        }

        pub fn with_secret(mut self, key: &str, value: &str) -> Self {
            self.secrets.insert(key.to_string(), value.to_string());
            self
        }

        /// Keys requested so far, in order.
        pub fn lookups(&self) -> Vec<String> {
            self.lookups.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SecretProvider for StaticSecretProvider {
        async fn lookup(&self, key: &str) -> ForwardResult<String> {
            self.lookups.lock().unwrap().push(key.to_string());
            match self.secrets.get(key).map(|v| v.trim()) {
                Some(value) if !value.is_empty() => Ok(value.to_string()),
                Some(_) => Err(ForwardError::SecretLookup {
                    key: key.to_string(),
                    reason: "empty output".to_string(),
                }),
                None => Err(ForwardError::SecretLookup {
                    key: key.to_string(),
                    reason: "key not found".to_string(),
                }),
            }
        }
    }
}
