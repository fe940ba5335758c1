// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Error types for xhproxy
//!
//! Hook failures never surface through these types: they are caught at the
//! checkpoint that invoked the hook and logged. What remains are setup
//! faults, transport faults and misuse of a request object.

use thiserror::Error;

use crate::transport::ReadyState;

/// Result type alias for xhproxy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for xhproxy
#[derive(Error, Debug)]
pub enum Error {
    /// Interception could not be installed on an execution context
    #[error("Setup error in context '{context}': {reason}")]
    Setup { context: String, reason: String },

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Transport-level failure (network error, unsupported scheme, ...)
    #[error("Transport error: {reason}")]
    Transport { reason: String, url: Option<String> },

    /// Operation not allowed in the current ready state
    #[error("Invalid state for {operation}: request is {state:?}")]
    InvalidState {
        operation: String,
        state: ReadyState,
    },

    /// Header name or value rejected
    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    /// Malformed data URL body
    #[error("Data URL decode error: {0}")]
    DataUrl(#[from] base64::DecodeError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Request was aborted before it completed
    #[error("Request aborted")]
    Aborted,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a setup error for the named context
    pub fn setup(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Setup {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error with URL
    pub fn transport_with_url(reason: impl Into<String>, url: impl Into<String>) -> Self {
        Error::Transport {
            reason: reason.into(),
            url: Some(url.into()),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: impl Into<String>, state: ReadyState) -> Self {
        Error::InvalidState {
            operation: operation.into(),
            state,
        }
    }

    /// Create an invalid header error
    pub fn invalid_header(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidHeader {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a setup fault
    pub fn is_setup(&self) -> bool {
        matches!(self, Error::Setup { .. })
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Http(e) if e.is_timeout())
    }

    /// Check if this is a network error
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Http(_))
    }

    /// Get URL if available
    pub fn url(&self) -> Option<&str> {
        match self {
            Error::Transport { url: Some(u), .. } => Some(u),
            Error::Http(e) => e.url().map(|u| u.as_str()),
            _ => None,
        }
    }
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    /// Attach the request URL to a transport error
    fn with_url(self, url: &str) -> Result<T>;
}

impl<T, E: Into<Error>> ErrorContext<T> for std::result::Result<T, E> {
    fn with_url(self, url: &str) -> Result<T> {
        self.map_err(|e| match e.into() {
            Error::Transport { reason, .. } => Error::Transport {
                reason,
                url: Some(url.to_string()),
            },
            other => other,
        })
    }
}
