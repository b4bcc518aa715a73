//! Error types for the notification subsystem.

use reqwest::StatusCode;
use thiserror::Error;

use crate::live::ConnectionStatus;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors raised by the notification subsystem.
///
/// Ingestion paths (live channel, push, polling) never surface these to
/// their callers; they are logged and discarded. User-triggered operations
/// on the reconciler return them unchanged.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("{operation} failed with HTTP {status}")]
    FetchFailed {
        operation: &'static str,
        status: StatusCode,
    },

    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("no stored credential")]
    NoCredential,

    #[error("alert presentation failed: {0}")]
    PresentationFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("STOMP error frame: {0}")]
    Stomp(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid connection transition: {from} -> {to}")]
    InvalidStateTransition {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NotifyError {
    pub fn fetch_failed(operation: &'static str, status: StatusCode) -> Self {
        Self::FetchFailed { operation, status }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPayload(msg.into())
    }

    pub fn presentation(msg: impl Into<String>) -> Self {
        Self::PresentationFailed(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether the failure came from the backend answering with a non-success status.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::FetchFailed { .. })
    }
}
