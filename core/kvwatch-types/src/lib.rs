//! Core type definitions for kvwatch.
//!
//! This crate defines the transient data model of one watch invocation:
//! - The raw payload emitted by a key/value watch
//! - The decoded change event
//! - The message body published to the broker

mod event;

pub use event::{ChangeEvent, ChangeMessage, RawWatchEvent};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while turning watch input into a change event.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid watch input: {0}")]
    Input(String),

    #[error("invalid value encoding: {0}")]
    Decode(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
