// src/core/errors.rs

//! Defines the primary error type for the whole client.

use std::time::Duration;
use thiserror::Error;

/// The main error enum, representing every failure a node, link or the registry can surface.
///
/// Transport failures are wrapped into one of these variants and returned to the immediate
/// caller; nothing here is ever raised across the event stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LavalinkError {
    /// The node or link is not currently serviceable. Never retried automatically.
    #[error("node '{0}' is unavailable")]
    Unavailable(String),

    /// The remote object does not exist, e.g. no player for the guild.
    #[error("not found: {0}")]
    NotFound(String),

    /// The node answered with a structured error.
    #[error("remote error {status}: {message}")]
    RemoteError { status: u16, message: String },

    /// The round-trip exceeded its configured budget. Does not imply node death.
    #[error("request to node '{node}' timed out after {timeout:?}")]
    Timeout { node: String, timeout: Duration },

    /// The load balancer found no eligible candidate.
    #[error("no available node: {0}")]
    NoAvailableNode(String),

    /// The connection to the node was lost or could not be established.
    #[error("connection error: {0}")]
    Connection(String),

    /// The in-flight request was cancelled because its node was closed.
    #[error("request cancelled")]
    Cancelled,

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("node '{0}' is already registered")]
    DuplicateNode(String),

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LavalinkError {
    /// Whether a caller may reasonably retry the same command later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LavalinkError::Timeout { .. })
    }

    /// Whether the failure means the node can no longer be reached.
    pub fn is_connectivity_loss(&self) -> bool {
        matches!(self, LavalinkError::Connection(_))
    }

    /// Returns the HTTP status carried by a remote error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            LavalinkError::RemoteError { status, .. } => Some(*status),
            LavalinkError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<reqwest::Error> for LavalinkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || is_dropped_connection(&e) {
            LavalinkError::Connection(e.to_string())
        } else {
            LavalinkError::HttpClientError(e.to_string())
        }
    }
}

/// A request or body transfer that failed because the connection went away mid-flight:
/// a reset, an unexpected EOF or an incomplete response.
fn is_dropped_connection(e: &reqwest::Error) -> bool {
    if e.is_timeout() || !(e.is_request() || e.is_body()) {
        return false;
    }
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if err.is::<std::io::Error>() {
            return true;
        }
        let message = err.to_string();
        if message.contains("connection closed") || message.contains("incomplete message") {
            return true;
        }
        source = err.source();
    }
    false
}

impl From<serde_json::Error> for LavalinkError {
    fn from(e: serde_json::Error) -> Self {
        LavalinkError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for LavalinkError {
    fn from(e: url::ParseError) -> Self {
        LavalinkError::InvalidConfig(format!("invalid node uri: {e}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LavalinkError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        LavalinkError::Connection(e.to_string())
    }
}

/// A convenience alias used across the crate.
pub type Result<T, E = LavalinkError> = std::result::Result<T, E>;
