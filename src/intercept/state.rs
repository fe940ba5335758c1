// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Per-instance shadow state
//!
//! Everything the interceptor knows about a request lives here rather than
//! on the transport: the logical configuration hooks see and edit, the
//! done/replay marker, the cached snapshot and the payload overrides.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};

use crate::config::NETWORK_BLOCK_URL;
use crate::hook::{HookId, HookInstance};
use crate::transport::{ReadyState, ResponseType, ResponseValue};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of an intercepted request object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub(crate) fn next() -> Self {
        Self(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xhr_{}", self.0)
    }
}

/// A complete response supplied by a hook instead of a network exchange
#[derive(Debug, Clone, PartialEq)]
pub struct FabricatedResponse {
    pub status: u16,
    /// Falls back to the configured replay status text, then the reason phrase
    pub status_text: Option<String>,
    pub response_type: ResponseType,
    pub response: ResponseValue,
    pub response_text: String,
    pub headers: Vec<(String, String)>,
}

impl Default for FabricatedResponse {
    fn default() -> Self {
        Self {
            status: 200,
            status_text: None,
            response_type: ResponseType::Default,
            response: ResponseValue::Text(String::new()),
            response_text: String::new(),
            headers: Vec::new(),
        }
    }
}

impl FabricatedResponse {
    /// A text response
    pub fn text(body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            response_type: ResponseType::Text,
            response: ResponseValue::Text(body.clone()),
            response_text: body,
            ..Default::default()
        }
        .header("content-type", "text/plain")
    }

    /// A JSON response, `response` holds the parsed value
    pub fn json(value: serde_json::Value) -> Self {
        Self {
            response_type: ResponseType::Json,
            response_text: value.to_string(),
            response: ResponseValue::Json(value),
            ..Default::default()
        }
        .header("content-type", "application/json")
    }

    /// A binary response
    pub fn bytes(body: impl Into<Bytes>) -> Self {
        Self {
            response_type: ResponseType::ArrayBuffer,
            response: ResponseValue::Bytes(body.into()),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = Some(status_text.into());
        self
    }

    /// Add a response header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Payload size reported by the synthetic progress event
    pub fn body_len(&self) -> u64 {
        if self.response_text.is_empty() {
            self.response.byte_len() as u64
        } else {
            self.response_text.len() as u64
        }
    }
}

/// Logical configuration of one request, as seen and edited by hooks
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Request headers by lower-cased name
    pub headers: HashMap<String, String>,
    pub method: String,
    pub url: String,
    pub is_async: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Body captured at send time
    pub body: Option<Bytes>,
    /// Last ready state delivered to listeners
    pub ready_state: ReadyState,
    /// Last status delivered to listeners
    pub status: u16,
    /// Skip the transport's `open`
    pub prevent_open: bool,
    /// Skip the dispatch entirely
    pub prevent_send: bool,
    /// Replay this instead of contacting the transport
    pub response: Option<FabricatedResponse>,
    pub(crate) with_credentials: bool,
    pub(crate) disposed: bool,
    pub(crate) network_block_url: String,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            headers: HashMap::new(),
            method: String::new(),
            url: String::new(),
            is_async: true,
            user: None,
            password: None,
            body: None,
            ready_state: ReadyState::Unsent,
            status: 0,
            prevent_open: false,
            prevent_send: false,
            response: None,
            with_credentials: false,
            disposed: false,
            network_block_url: NETWORK_BLOCK_URL.to_string(),
        }
    }
}

impl RequestConfig {
    pub(crate) fn new(network_block_url: &str) -> Self {
        Self {
            network_block_url: network_block_url.to_string(),
            ..Default::default()
        }
    }

    /// Placeholder handed out once the instance's state is gone
    pub(crate) fn detached() -> Self {
        Self {
            disposed: true,
            ..Default::default()
        }
    }

    /// Credentials flag of the request object (read-only)
    pub fn with_credentials(&self) -> bool {
        self.with_credentials
    }

    /// Whether the owning instance was already disposed
    pub fn disposed(&self) -> bool {
        self.disposed
    }

    /// Redirect the request to an inert data URI
    pub fn network_blocking(&mut self) {
        self.url = self.network_block_url.clone();
    }

    /// Record a header under its lower-cased name
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Start a new open/send cycle
    pub(crate) fn reset_cycle(&mut self) {
        self.headers.clear();
        self.body = None;
        self.prevent_open = false;
        self.prevent_send = false;
        self.response = None;
    }
}

/// Request configuration shared between the interceptor and hooks
///
/// The guard returned by [`SharedConfig::lock`] is not `Send`, so it cannot
/// be held across an `.await`.
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<Mutex<RequestConfig>>);

impl SharedConfig {
    pub fn new(config: RequestConfig) -> Self {
        Self(Arc::new(Mutex::new(config)))
    }

    pub fn lock(&self) -> MutexGuard<'_, RequestConfig> {
        self.0.lock()
    }

    /// Copy of the current configuration
    pub fn snapshot(&self) -> RequestConfig {
        self.0.lock().clone()
    }

    /// Mutate the configuration in place
    pub fn update<R>(&self, f: impl FnOnce(&mut RequestConfig) -> R) -> R {
        f(&mut self.0.lock())
    }
}

/// Done/replay marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoneMarker {
    /// No ready-state observer registered yet
    #[default]
    Unobserved,
    /// Observed, terminal state not reached
    Observing,
    /// Terminal state reached, response hooks running
    Sweeping,
    /// Response hooks finished
    Completed,
    /// Synthetic replay in progress or finished
    Replaying,
}

impl DoneMarker {
    /// Accessors serve the cached snapshot instead of the transport
    pub fn is_frozen(self) -> bool {
        matches!(
            self,
            DoneMarker::Sweeping | DoneMarker::Completed | DoneMarker::Replaying
        )
    }
}

/// Values that shadow the transport's own
#[derive(Debug, Clone, Default)]
pub(crate) struct Overrides {
    pub response_type: Option<ResponseType>,
    pub response: Option<ResponseValue>,
    pub response_text: Option<String>,
    pub status_text: Option<String>,
    pub headers: Option<Vec<(String, String)>>,
}

impl Overrides {
    /// Drop cached payloads, keeping the declared response type
    fn clear_payload(&mut self) {
        self.response = None;
        self.response_text = None;
        self.status_text = None;
        self.headers = None;
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Lifecycle {
    pub marker: DoneMarker,
    pub last_ready_state: ReadyState,
    pub last_status: u16,
    pub overrides: Overrides,
    pub abort_requested: bool,
    /// State of the event whose serialized listener is running
    pub delivering: Option<(ReadyState, u16)>,
}

impl Lifecycle {
    /// Called from `open`: a new cycle keeps observing but forgets the last one
    pub fn reset_for_open(&mut self) {
        if self.marker != DoneMarker::Unobserved {
            self.marker = DoneMarker::Observing;
        }
        self.last_ready_state = ReadyState::Unsent;
        self.last_status = 0;
        self.abort_requested = false;
        self.overrides.clear_payload();
    }

    /// Snapshot served while frozen
    pub fn frozen_snapshot(&self) -> Option<(ReadyState, u16)> {
        self.marker
            .is_frozen()
            .then_some((self.last_ready_state, self.last_status))
    }

    /// State accessors report instead of the transport's live one
    pub fn reported_state(&self) -> Option<(ReadyState, u16)> {
        self.frozen_snapshot().or(self.delivering)
    }

    pub fn set_snapshot(&mut self, ready_state: ReadyState, status: u16) {
        self.last_ready_state = ready_state;
        self.last_status = status;
    }

    /// Replay delivered a terminal state carrying a status
    pub fn replayed_done(&self) -> bool {
        self.marker == DoneMarker::Replaying
            && self.last_ready_state == ReadyState::Done
            && self.last_status != 0
    }
}

/// Shadow record of one intercepted instance
#[derive(Debug)]
pub(crate) struct ShadowState {
    pub config: SharedConfig,
    pub lifecycle: Mutex<Lifecycle>,
    hook_instances: Mutex<HashMap<HookId, HookInstance>>,
}

impl ShadowState {
    pub fn new(network_block_url: &str) -> Self {
        Self::from_config(RequestConfig::new(network_block_url))
    }

    /// Degraded record for an instance whose state was already discarded
    pub fn disposed() -> Self {
        Self::from_config(RequestConfig::detached())
    }

    fn from_config(config: RequestConfig) -> Self {
        Self {
            config: SharedConfig::new(config),
            lifecycle: Mutex::new(Lifecycle::default()),
            hook_instances: Mutex::new(HashMap::new()),
        }
    }

    /// Scratch record of `hook` for this instance, created on first use
    pub fn hook_instance(&self, hook: HookId) -> HookInstance {
        self.hook_instances.lock().entry(hook).or_default().clone()
    }

    pub fn marker(&self) -> DoneMarker {
        self.lifecycle.lock().marker
    }
}

/// Shadow records of every live instance of one interceptor
#[derive(Debug, Default)]
pub(crate) struct ShadowTable {
    records: DashMap<InstanceId, Arc<ShadowState>>,
}

impl ShadowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: InstanceId, state: ShadowState) {
        self.records.insert(id, Arc::new(state));
    }

    pub fn get(&self, id: InstanceId) -> Option<Arc<ShadowState>> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    pub fn remove(&self, id: InstanceId) -> bool {
        self.records.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
