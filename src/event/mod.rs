// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Request lifecycle events and listeners

mod target;

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;

pub use target::EventTarget;

/// Event listener callback type
pub type Listener = Arc<dyn Fn(&XhrEvent) + Send + Sync>;

/// Wrap a closure as a [`Listener`]
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&XhrEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identity of a listener, stable for as long as the `Arc` lives
pub(crate) fn listener_key(listener: &Listener) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

/// Named lifecycle event of a request object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    ReadyStateChange,
    LoadStart,
    Progress,
    Abort,
    Error,
    Load,
    Timeout,
    LoadEnd,
}

impl EventKind {
    /// Event name as delivered by the host
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ReadyStateChange => "readystatechange",
            EventKind::LoadStart => "loadstart",
            EventKind::Progress => "progress",
            EventKind::Abort => "abort",
            EventKind::Error => "error",
            EventKind::Load => "load",
            EventKind::Timeout => "timeout",
            EventKind::LoadEnd => "loadend",
        }
    }

    /// Look up an event by its host name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "readystatechange" => Some(EventKind::ReadyStateChange),
            "loadstart" => Some(EventKind::LoadStart),
            "progress" => Some(EventKind::Progress),
            "abort" => Some(EventKind::Abort),
            "error" => Some(EventKind::Error),
            "load" => Some(EventKind::Load),
            "timeout" => Some(EventKind::Timeout),
            "loadend" => Some(EventKind::LoadEnd),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event delivered to listeners of a request object
#[derive(Debug, Clone, Serialize)]
pub struct XhrEvent {
    /// Event name
    pub kind: EventKind,
    /// Whether the host (rather than script) fired the event
    pub is_trusted: bool,
    /// Progress events: whether `total` is known
    pub length_computable: bool,
    /// Progress events: bytes received so far
    pub loaded: u64,
    /// Progress events: expected total bytes
    pub total: u64,
    /// When the event was created
    pub timestamp: SystemTime,
    /// Fabricated by the interceptor but presented as trusted
    #[serde(skip)]
    pretend_trusted: bool,
}

impl XhrEvent {
    /// A trusted event fired by a transport
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            is_trusted: true,
            length_computable: false,
            loaded: 0,
            total: 0,
            timestamp: SystemTime::now(),
            pretend_trusted: false,
        }
    }

    /// An event dispatched by script
    pub fn untrusted(kind: EventKind) -> Self {
        Self {
            is_trusted: false,
            ..Self::new(kind)
        }
    }

    /// A trusted progress-style event
    pub fn progress(kind: EventKind, loaded: u64, total: Option<u64>) -> Self {
        Self {
            length_computable: total.is_some(),
            loaded,
            total: total.unwrap_or(0),
            ..Self::new(kind)
        }
    }

    /// An event fabricated during synthetic replay
    pub(crate) fn synthetic(kind: EventKind) -> Self {
        Self {
            is_trusted: false,
            pretend_trusted: true,
            ..Self::new(kind)
        }
    }

    /// A fabricated progress event
    pub(crate) fn synthetic_progress(loaded: u64, total: u64) -> Self {
        Self {
            length_computable: true,
            loaded,
            total,
            ..Self::synthetic(EventKind::Progress)
        }
    }

    /// Whether this event was fabricated by the interceptor
    pub fn is_synthetic(&self) -> bool {
        self.pretend_trusted
    }

    /// The event as a consumer observes it
    ///
    /// Fabricated events are indistinguishable from host-fired ones.
    pub(crate) fn presented(&self) -> XhrEvent {
        if self.pretend_trusted {
            XhrEvent {
                is_trusted: true,
                ..self.clone()
            }
        } else {
            self.clone()
        }
    }
}
