// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Request objects and the transports behind them
//!
//! [`Xhr`] is the capability set of an XMLHttpRequest-like object: open,
//! send, headers, listeners and the readable response surface. Real
//! transports implement it, and so does the interception decorator, which
//! forwards to an injected transport.

mod http;
mod scripted;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{EventKind, EventTarget, Listener, XhrEvent};

pub use http::{HttpXhr, HttpXhrConfig, HttpXhrConstructor};
pub use scripted::{ScriptedXhr, ScriptedXhrConstructor, TransportCall};

/// Stage of a request's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReadyState {
    /// Constructed, `open` not called yet
    #[default]
    Unsent = 0,
    /// `open` called
    Opened = 1,
    /// Response status and headers available
    HeadersReceived = 2,
    /// Response body is being received
    Loading = 3,
    /// Exchange finished (successfully or not)
    Done = 4,
}

impl ReadyState {
    /// Numeric value as exposed by XMLHttpRequest
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Convert from the numeric value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ReadyState::Unsent),
            1 => Some(ReadyState::Opened),
            2 => Some(ReadyState::HeadersReceived),
            3 => Some(ReadyState::Loading),
            4 => Some(ReadyState::Done),
            _ => None,
        }
    }
}

/// Declared type of the response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Empty string type, behaves like text
    #[default]
    #[serde(rename = "")]
    Default,
    Text,
    Json,
    ArrayBuffer,
    Blob,
    Document,
}

impl ResponseType {
    /// Name as used by the `responseType` attribute
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseType::Default => "",
            ResponseType::Text => "text",
            ResponseType::Json => "json",
            ResponseType::ArrayBuffer => "arraybuffer",
            ResponseType::Blob => "blob",
            ResponseType::Document => "document",
        }
    }

    /// Default or text
    pub fn is_textual(self) -> bool {
        matches!(self, ResponseType::Default | ResponseType::Text)
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" => Ok(ResponseType::Default),
            "text" => Ok(ResponseType::Text),
            "json" => Ok(ResponseType::Json),
            "arraybuffer" => Ok(ResponseType::ArrayBuffer),
            "blob" => Ok(ResponseType::Blob),
            "document" => Ok(ResponseType::Document),
            other => Err(Error::other(format!("Unknown response type: {}", other))),
        }
    }
}

/// Value of the `response` attribute
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseValue {
    #[default]
    Null,
    Text(String),
    Json(serde_json::Value),
    Bytes(Bytes),
}

impl ResponseValue {
    /// The value reported before a response is available
    pub fn empty_for(response_type: ResponseType) -> Self {
        if response_type.is_textual() {
            ResponseValue::Text(String::new())
        } else {
            ResponseValue::Null
        }
    }

    /// Decode a complete body according to the declared type
    pub fn decode(body: &Bytes, response_type: ResponseType) -> Self {
        match response_type {
            ResponseType::Default | ResponseType::Text | ResponseType::Document => {
                ResponseValue::Text(String::from_utf8_lossy(body).into_owned())
            }
            ResponseType::Json => serde_json::from_slice(body)
                .map(ResponseValue::Json)
                .unwrap_or(ResponseValue::Null),
            ResponseType::ArrayBuffer | ResponseType::Blob => ResponseValue::Bytes(body.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ResponseValue::Null)
    }

    /// Text payload, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Payload length in bytes
    pub fn byte_len(&self) -> usize {
        match self {
            ResponseValue::Null => 0,
            ResponseValue::Text(s) => s.len(),
            ResponseValue::Json(v) => v.to_string().len(),
            ResponseValue::Bytes(b) => b.len(),
        }
    }
}

impl From<&str> for ResponseValue {
    fn from(s: &str) -> Self {
        ResponseValue::Text(s.to_string())
    }
}

impl From<String> for ResponseValue {
    fn from(s: String) -> Self {
        ResponseValue::Text(s)
    }
}

impl From<serde_json::Value> for ResponseValue {
    fn from(v: serde_json::Value) -> Self {
        ResponseValue::Json(v)
    }
}

impl From<Bytes> for ResponseValue {
    fn from(b: Bytes) -> Self {
        ResponseValue::Bytes(b)
    }
}

/// XMLHttpRequest capability set
///
/// Everything except `send` is synchronous, mirroring the host API. `send`
/// resolves immediately for asynchronous requests and only once the
/// exchange finished for synchronous ones.
#[async_trait]
pub trait Xhr: Send + Sync {
    /// Configure method, URL, mode and credentials
    fn open(
        &self,
        method: &str,
        url: &str,
        is_async: bool,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<()>;

    /// Add a request header
    fn set_request_header(&self, name: &str, value: &str) -> Result<()>;

    /// Start the exchange
    async fn send(&self, body: Option<Bytes>) -> Result<()>;

    /// Abort an in-flight exchange
    fn abort(&self);

    fn ready_state(&self) -> ReadyState;

    fn status(&self) -> u16;

    fn status_text(&self) -> String;

    fn response(&self) -> ResponseValue;

    fn response_text(&self) -> String;

    fn response_type(&self) -> ResponseType;

    fn set_response_type(&self, response_type: ResponseType) -> Result<()>;

    fn with_credentials(&self) -> bool;

    fn set_with_credentials(&self, with_credentials: bool) -> Result<()>;

    /// Value of a response header (case-insensitive)
    fn get_response_header(&self, name: &str) -> Option<String>;

    /// All response headers, `name: value` lines separated by CRLF
    fn get_all_response_headers(&self) -> String;

    /// Host event dispatch mechanism for this object
    fn event_target(&self) -> &EventTarget;

    fn add_event_listener(&self, kind: EventKind, listener: Listener) {
        self.event_target().add_listener(kind, listener);
    }

    fn remove_event_listener(&self, kind: EventKind, listener: &Listener) {
        self.event_target().remove_listener(kind, listener);
    }

    /// Set or clear an `on<event>` handler attribute
    fn set_handler(&self, kind: EventKind, handler: Option<Listener>) {
        self.event_target().set_handler(kind, handler);
    }

    /// Current `on<event>` handler attribute
    fn handler(&self, kind: EventKind) -> Option<Listener> {
        self.event_target().handler(kind)
    }

    /// Deliver an event to every matching listener
    fn dispatch_event(&self, event: &XhrEvent) {
        self.event_target().dispatch(event);
    }
}

/// Factory for request objects, the "constructor" of an execution context
pub trait XhrConstructor: Send + Sync {
    /// Create a new request object
    fn construct(&self) -> Arc<dyn Xhr>;

    /// Name used in logs
    fn name(&self) -> &str {
        "XMLHttpRequest"
    }
}

/// Format response headers the way `getAllResponseHeaders` does
pub(crate) fn format_headers<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    headers
        .into_iter()
        .map(|(name, value)| format!("{}: {}\r\n", name.to_ascii_lowercase(), value))
        .collect()
}

/// Canonical reason phrase of a status code, empty when unknown
pub(crate) fn reason_phrase(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}
