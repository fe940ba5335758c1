// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Hook objects observing and mutating intercepted requests
//!
//! A hook is called at three checkpoints of every intercepted request:
//! `on_config` when the request is opened, `on_request` when it is sent
//! and `on_response` once it completed.

mod builtin;
mod registry;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::intercept::{InterceptedXhr, RequestConfig, SharedConfig};

pub use builtin::{HeaderInjector, MockResponder, NetworkBlocker, RecordedRequest, RequestRecorder};
pub use registry::{HookEntry, HookId, HookRegistry};

/// Hook object - observes and rewrites intercepted requests
///
/// Every method has a no-op default, so a hook only implements the
/// checkpoints it cares about. Errors and panics raised by a hook are
/// caught and logged; they never abort sibling hooks or the request.
///
/// # Example
///
/// ```rust,no_run
/// use xhproxy::hook::{HookInstance, XhrHook};
/// use xhproxy::intercept::{FabricatedResponse, InterceptedXhr, SharedConfig};
/// use async_trait::async_trait;
///
/// struct Offline;
///
/// #[async_trait]
/// impl XhrHook for Offline {
///     async fn on_request(
///         &self,
///         _hook: &HookInstance,
///         _xhr: &InterceptedXhr,
///         config: &SharedConfig,
///     ) -> anyhow::Result<()> {
///         config.lock().response = Some(FabricatedResponse::text("offline"));
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait XhrHook: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called synchronously from `open`
    ///
    /// May rewrite method, URL, async flag, user and password, or set
    /// `prevent_open`. `config` is authoritative for the duration of the call.
    fn on_config(
        &self,
        _hook: &HookInstance,
        _xhr: &InterceptedXhr,
        _config: &mut RequestConfig,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called from `send` before the request reaches the transport
    ///
    /// May rewrite the body, set `prevent_send`, or fabricate a response,
    /// in which case the transport is never contacted.
    async fn on_request(
        &self,
        _hook: &HookInstance,
        _xhr: &InterceptedXhr,
        _config: &SharedConfig,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once the real response reached ready state 4
    ///
    /// Runs before any consumer sees the terminal ready-state change, so the
    /// payload can still be rewritten through `InterceptedXhr::set_response`.
    async fn on_response(
        &self,
        _hook: &HookInstance,
        _xhr: &InterceptedXhr,
        _config: &SharedConfig,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whether `on_response` needs to run for requests this hook sees
    fn observes_response(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct HookInstanceData {
    bypass_request: bool,
    scratch: HashMap<String, serde_json::Value>,
}

/// Per-hook, per-request scratch record
///
/// Created on the first checkpoint a hook sees for a request and dropped
/// with the request's shadow state.
#[derive(Debug, Clone, Default)]
pub struct HookInstance {
    inner: Arc<Mutex<HookInstanceData>>,
}

impl HookInstance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the hook opted out of further checkpoints for this request
    pub fn bypass_request(&self) -> bool {
        self.inner.lock().bypass_request
    }

    /// Opt this hook in or out of later checkpoints for this request
    pub fn set_bypass_request(&self, bypass: bool) {
        self.inner.lock().bypass_request = bypass;
    }

    /// Store a value for a later checkpoint
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.lock().scratch.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().scratch.get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().scratch.remove(key)
    }
}
