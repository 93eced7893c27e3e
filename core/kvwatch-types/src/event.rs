//! Watch payload and change event types.
//!
//! A key watch hands the handler one JSON object on stdin. Only `Key` and
//! `Value` matter here; the index and flag fields are ignored.

use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// The payload as emitted by the key/value watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawWatchEvent {
    #[serde(rename = "Key")]
    pub key: String,
    /// Base64-encoded value. `null` when the key holds no value.
    #[serde(rename = "Value")]
    pub value: Option<String>,
}

/// A decoded key change, alive for a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: String,
    pub value: String,
}

/// Body of the message published for a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub key: String,
    pub value: String,
}

impl ChangeEvent {
    /// Creates a change event from already decoded parts.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parses and decodes the raw watch payload.
    pub fn from_watch_json(input: &[u8]) -> Result<Self> {
        if input.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::Input("empty input".into()));
        }

        let raw: Option<RawWatchEvent> =
            serde_json::from_slice(input).map_err(|e| Error::Input(e.to_string()))?;
        let raw = raw.ok_or_else(|| Error::Input("watch payload is null".into()))?;

        Self::from_raw(raw)
    }

    /// Decodes an already parsed watch payload.
    pub fn from_raw(raw: RawWatchEvent) -> Result<Self> {
        let encoded = raw
            .value
            .ok_or_else(|| Error::Input(format!("key {} has no value", raw.key)))?;

        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Decode(e.to_string()))?;
        let value = String::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("value is not UTF-8: {e}")))?;

        Ok(Self { key: raw.key, value })
    }

    /// Returns the message published for this change.
    #[must_use]
    pub fn to_message(&self) -> ChangeMessage {
        ChangeMessage {
            key: self.key.clone(),
            value: self.value.clone(),
        }
    }

    /// Serializes the published body: `{"key": .., "value": ..}`.
    pub fn to_message_body(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_message())?)
    }
}

impl ChangeMessage {
    /// Parses a published body back into a message.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}
