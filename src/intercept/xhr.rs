// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Intercepted request object
//!
//! [`InterceptedXhr`] implements [`Xhr`] by forwarding to an injected
//! transport. On the way it runs hooks at open/send/completion, routes
//! lifecycle listeners through the per-instance serializer, replays
//! fabricated responses and serves stable snapshots from its accessors.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use tokio::runtime::Handle;

use super::checkpoint;
use super::listeners::{ListenerMap, WrapMode};
use super::replay;
use super::serializer::EventSerializer;
use super::state::{DoneMarker, InstanceId, ShadowState, ShadowTable, SharedConfig};
use crate::config::InterceptorConfig;
use crate::error::{Error, Result};
use crate::event::{listener, listener_key, EventKind, EventTarget, Listener, XhrEvent};
use crate::hook::HookRegistry;
use crate::transport::{format_headers, ReadyState, ResponseType, ResponseValue, Xhr};

pub(crate) struct XhrInner {
    id: InstanceId,
    transport: Arc<dyn Xhr>,
    hooks: Arc<HookRegistry>,
    shadows: Arc<ShadowTable>,
    settings: Arc<InterceptorConfig>,
    serializer: EventSerializer,
    listeners: ListenerMap,
}

impl Drop for XhrInner {
    fn drop(&mut self) {
        if self.shadows.remove(self.id) {
            tracing::trace!(instance = %self.id, "Shadow state released");
        }
    }
}

/// Request object with interception applied
///
/// Cloning yields another handle to the same request. The shadow state is
/// released when the last handle is dropped or on [`InterceptedXhr::dispose`].
#[derive(Clone)]
pub struct InterceptedXhr {
    inner: Arc<XhrInner>,
}

impl InterceptedXhr {
    pub(crate) fn new(
        transport: Arc<dyn Xhr>,
        hooks: Arc<HookRegistry>,
        shadows: Arc<ShadowTable>,
        settings: Arc<InterceptorConfig>,
    ) -> Self {
        let id = InstanceId::next();
        shadows.insert(id, ShadowState::new(&settings.network_block_url));

        Self {
            inner: Arc::new(XhrInner {
                id,
                transport,
                hooks,
                shadows,
                settings,
                serializer: EventSerializer::new(id),
                listeners: ListenerMap::new(),
            }),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.inner.id
    }

    /// The wrapped transport
    pub fn transport(&self) -> &Arc<dyn Xhr> {
        &self.inner.transport
    }

    pub(crate) fn hooks(&self) -> &Arc<HookRegistry> {
        &self.inner.hooks
    }

    pub(crate) fn settings(&self) -> &InterceptorConfig {
        &self.inner.settings
    }

    /// Shadow record, or a detached disposed one
    pub(crate) fn shadow(&self) -> Arc<ShadowState> {
        self.inner
            .shadows
            .get(self.inner.id)
            .unwrap_or_else(|| Arc::new(ShadowState::disposed()))
    }

    /// Request configuration shared with hooks
    pub fn config(&self) -> SharedConfig {
        self.shadow().config.clone()
    }

    pub fn done_marker(&self) -> DoneMarker {
        self.shadow().marker()
    }

    /// Whether the shadow state was already released
    pub fn is_disposed(&self) -> bool {
        self.inner.shadows.get(self.inner.id).is_none()
    }

    /// Release the shadow state now
    ///
    /// The object keeps forwarding to its transport but no longer runs
    /// hooks against a live configuration.
    pub fn dispose(&self) {
        if self.inner.shadows.remove(self.inner.id) {
            tracing::debug!(instance = %self.inner.id, "Instance disposed");
        }
    }

    /// Resolves once every lifecycle callback delivered so far has run
    pub async fn settled(&self) {
        self.inner.serializer.settled().await;
    }

    /// Overwrite the payload returned by `response`
    pub fn set_response(&self, value: impl Into<ResponseValue>) {
        self.shadow().lifecycle.lock().overrides.response = Some(value.into());
    }

    /// Overwrite the payload returned by `response_text`
    pub fn set_response_text(&self, text: impl Into<String>) {
        self.shadow().lifecycle.lock().overrides.response_text = Some(text.into());
    }

    /// Payload parsed as JSON according to the declared response type
    ///
    /// Returns `None` (with a warning) when the payload is not valid JSON.
    pub fn xh_json(&self) -> Option<serde_json::Value> {
        let parsed = match self.response_type() {
            ResponseType::Default | ResponseType::Text => {
                let text = match self.response() {
                    ResponseValue::Text(s) if !s.is_empty() => s,
                    _ => self.response_text(),
                };
                parse_json(&text)
            }
            ResponseType::Json => match self.response() {
                ResponseValue::Text(s) => parse_json(&s),
                ResponseValue::Json(v) if !v.is_null() => return Some(v),
                _ => parse_json(&self.response_text()),
            },
            _ => return None,
        };

        match parsed {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(instance = %self.inner.id, error = %e, "Response is not valid JSON");
                None
            }
        }
    }

    /// Write `value` into response and response text per the declared type
    pub fn set_xh_json(&self, value: serde_json::Value) {
        match self.response_type() {
            ResponseType::Default | ResponseType::Text => self.set_json_text(&value),
            ResponseType::Json => {
                if matches!(self.response(), ResponseValue::Text(_)) {
                    self.set_json_text(&value);
                } else {
                    self.set_response(value);
                    self.set_response_text(String::new());
                }
            }
            other => {
                tracing::debug!(
                    instance = %self.inner.id,
                    response_type = %other,
                    "JSON payload ignored for binary response type"
                );
            }
        }
    }

    fn set_json_text(&self, value: &serde_json::Value) {
        let text = value.to_string();
        self.set_response(text.clone());
        self.set_response_text(text);
    }

    /// Transport reached its terminal state with a real status
    fn live_done(&self) -> bool {
        self.inner.transport.ready_state() == ReadyState::Done && self.inner.transport.status() != 0
    }

    fn reported_state(&self) -> Option<(ReadyState, u16)> {
        self.shadow().lifecycle.lock().reported_state()
    }

    fn is_replaying(&self) -> bool {
        self.shadow().marker() == DoneMarker::Replaying
    }

    /// Hooks, then the transport or the replay engine
    async fn dispatch(&self) -> Result<()> {
        let shadow = self.shadow();
        let wants_response = checkpoint::request_sweep(self, &shadow).await;

        let (prevent_send, fabricated, body) = {
            let config = shadow.config.lock();
            (config.prevent_send, config.response.clone(), config.body.clone())
        };
        if prevent_send {
            tracing::debug!(instance = %self.inner.id, "Send suppressed by hook");
            return Ok(());
        }
        if shadow.lifecycle.lock().abort_requested {
            tracing::debug!(instance = %self.inner.id, "Send suppressed by abort");
            replay::abort(self, &shadow).await;
            return Err(Error::Aborted);
        }

        if wants_response && shadow.marker() == DoneMarker::Unobserved {
            self.add_event_listener(EventKind::ReadyStateChange, listener(|_| {}));
        }

        match fabricated {
            Some(response) => replay::run(self, &shadow, response).await,
            None => self.inner.transport.send(body).await,
        }
    }

    /// Mark the instance as observed by a ready-state listener
    fn observe(&self) {
        let shadow = self.shadow();
        let mut lifecycle = shadow.lifecycle.lock();
        if lifecycle.marker == DoneMarker::Unobserved {
            lifecycle.marker = DoneMarker::Observing;
        }
    }

    fn wrap_listener(&self, kind: EventKind, original: Listener) -> Listener {
        let Some(mode) = WrapMode::for_kind(kind) else {
            return original;
        };
        if mode == WrapMode::ReadyState {
            self.observe();
        }

        self.inner.listeners.wrapper_for(kind, &original, || {
            let weak = Arc::downgrade(&self.inner);
            let target = original.clone();
            listener(move |event| match weak.upgrade() {
                Some(inner) => InterceptedXhr { inner }.deliver(mode, event, &target),
                None => target(event),
            })
        })
    }

    fn deliver(&self, mode: WrapMode, event: &XhrEvent, original: &Listener) {
        if mode == WrapMode::Direct {
            original(event);
            return;
        }

        let ready_state = self.inner.transport.ready_state();
        let status = self.inner.transport.status();
        let this = self.clone();
        let event = event.clone();
        let original = original.clone();
        self.inner.serializer.enqueue(
            async move {
                if mode == WrapMode::ReadyState {
                    this.settle_ready_state(ready_state, status).await;
                }
                let _delivering = Delivering::start(this.shadow(), ready_state, status);
                original(&event);
            }
            .boxed(),
        );
    }

    /// Forget the wrapper of `original` once neither a listener nor the handler uses it
    fn release_wrapper(&self, kind: EventKind, original: &Listener, wrapper: &Listener) {
        let target = self.inner.transport.event_target();
        let in_use = target.contains(kind, wrapper)
            || target
                .handler(kind)
                .map_or(false, |h| listener_key(&h) == listener_key(wrapper));
        if !in_use {
            self.inner.listeners.forget(kind, original);
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_listeners(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Record a delivered ready state, sweeping response hooks on first completion
    async fn settle_ready_state(&self, ready_state: ReadyState, status: u16) {
        let shadow = self.shadow();

        let (frozen, sweep) = {
            let mut lifecycle = shadow.lifecycle.lock();
            let frozen = lifecycle.marker.is_frozen();
            let sweep = ready_state == ReadyState::Done
                && status != 0
                && lifecycle.marker == DoneMarker::Observing;
            if sweep {
                lifecycle.marker = DoneMarker::Sweeping;
            }
            if !frozen {
                lifecycle.set_snapshot(ready_state, status);
            }
            (frozen, sweep)
        };

        if !frozen {
            shadow.config.update(|c| {
                c.ready_state = ready_state;
                c.status = status;
            });
        }

        if sweep {
            checkpoint::response_sweep(self, &shadow).await;

            let mut lifecycle = shadow.lifecycle.lock();
            if lifecycle.marker != DoneMarker::Replaying {
                lifecycle.marker = DoneMarker::Completed;
                lifecycle.set_snapshot(ready_state, status);
            }
        }
    }
}

fn parse_json(text: &str) -> Result<serde_json::Value> {
    Ok(serde_json::from_str(text)?)
}

/// Pins the reported state to the delivered event while its listener runs
struct Delivering(Arc<ShadowState>);

impl Delivering {
    fn start(shadow: Arc<ShadowState>, ready_state: ReadyState, status: u16) -> Self {
        shadow.lifecycle.lock().delivering = Some((ready_state, status));
        Self(shadow)
    }
}

impl Drop for Delivering {
    fn drop(&mut self) {
        self.0.lifecycle.lock().delivering = None;
    }
}

#[async_trait]
impl Xhr for InterceptedXhr {
    fn open(
        &self,
        method: &str,
        url: &str,
        is_async: bool,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        let shadow = self.shadow();
        shadow.lifecycle.lock().reset_for_open();

        let with_credentials = self.inner.transport.with_credentials();
        let mut draft = shadow.config.update(|c| {
            c.reset_cycle();
            c.method = method.to_string();
            c.url = url.to_string();
            c.is_async = is_async;
            c.user = user.map(String::from);
            c.password = password.map(String::from);
            c.with_credentials = with_credentials;
            c.clone()
        });

        checkpoint::config_sweep(self, &shadow, &mut draft);
        shadow.config.update(|c| *c = draft.clone());

        if draft.prevent_open {
            tracing::debug!(instance = %self.inner.id, url = %draft.url, "Open suppressed by hook");
            return Ok(());
        }
        if draft.method != method || draft.url != url {
            tracing::debug!(
                instance = %self.inner.id,
                method = %draft.method,
                url = %draft.url,
                "Open rewritten by hook"
            );
        }

        self.inner.transport.open(
            &draft.method,
            &draft.url,
            draft.is_async,
            draft.user.as_deref(),
            draft.password.as_deref(),
        )
    }

    fn set_request_header(&self, name: &str, value: &str) -> Result<()> {
        self.shadow().config.lock().set_header(name, value);
        self.inner.transport.set_request_header(name, value)
    }

    async fn send(&self, body: Option<Bytes>) -> Result<()> {
        let shadow = self.shadow();
        let with_credentials = self.inner.transport.with_credentials();
        let (prevent_send, is_async) = shadow.config.update(|c| {
            c.body = body;
            c.with_credentials = with_credentials;
            (c.prevent_send, c.is_async)
        });
        shadow.lifecycle.lock().abort_requested = false;

        if prevent_send {
            tracing::debug!(instance = %self.inner.id, "Send suppressed by hook");
            return Ok(());
        }

        if !is_async {
            let dispatched = self.dispatch().await;
            self.settled().await;
            return dispatched;
        }

        match Handle::try_current() {
            Ok(handle) => {
                let this = self.clone();
                handle.spawn(async move {
                    match this.dispatch().await {
                        Ok(()) | Err(Error::Aborted) => {}
                        Err(e) => {
                            tracing::warn!(instance = %this.inner.id, error = %e, "Dispatch failed")
                        }
                    }
                });
                Ok(())
            }
            Err(_) => {
                let dispatched = self.dispatch().await;
                self.settled().await;
                match dispatched {
                    Err(Error::Aborted) => Ok(()),
                    other => other,
                }
            }
        }
    }

    fn abort(&self) {
        self.shadow().lifecycle.lock().abort_requested = true;
        self.inner.transport.abort();
    }

    fn ready_state(&self) -> ReadyState {
        match self.reported_state() {
            Some((ready_state, _)) => ready_state,
            None => self.inner.transport.ready_state(),
        }
    }

    fn status(&self) -> u16 {
        match self.reported_state() {
            Some((_, status)) => status,
            None => self.inner.transport.status(),
        }
    }

    fn status_text(&self) -> String {
        let shadow = self.shadow();
        let lifecycle = shadow.lifecycle.lock();
        if lifecycle.marker == DoneMarker::Replaying {
            return lifecycle.overrides.status_text.clone().unwrap_or_default();
        }
        drop(lifecycle);
        self.inner.transport.status_text()
    }

    fn response(&self) -> ResponseValue {
        let shadow = self.shadow();
        let live_done = self.live_done();

        {
            let lifecycle = shadow.lifecycle.lock();
            let replayed = lifecycle.replayed_done();
            if live_done || replayed || lifecycle.marker.is_frozen() {
                if let Some(cached) = &lifecycle.overrides.response {
                    return cached.clone();
                }
            }
            if replayed {
                return ResponseValue::Null;
            }
        }

        if live_done {
            let live = self.inner.transport.response();
            return shadow
                .lifecycle
                .lock()
                .overrides
                .response
                .get_or_insert(live)
                .clone();
        }
        ResponseValue::empty_for(self.response_type())
    }

    fn response_text(&self) -> String {
        let shadow = self.shadow();
        let live_done = self.live_done();

        {
            let lifecycle = shadow.lifecycle.lock();
            let replayed = lifecycle.replayed_done();
            if live_done || replayed || lifecycle.marker.is_frozen() {
                if let Some(cached) = &lifecycle.overrides.response_text {
                    return cached.clone();
                }
            }
            if replayed {
                return String::new();
            }
        }

        if live_done {
            let live = self.inner.transport.response_text();
            return shadow
                .lifecycle
                .lock()
                .overrides
                .response_text
                .get_or_insert(live)
                .clone();
        }
        String::new()
    }

    fn response_type(&self) -> ResponseType {
        let declared = self.shadow().lifecycle.lock().overrides.response_type;
        declared.unwrap_or_else(|| self.inner.transport.response_type())
    }

    /// Declare the response type; the declared value wins over the transport's
    fn set_response_type(&self, response_type: ResponseType) -> Result<()> {
        self.shadow().lifecycle.lock().overrides.response_type = Some(response_type);
        if let Err(e) = self.inner.transport.set_response_type(response_type) {
            tracing::debug!(
                instance = %self.inner.id,
                error = %e,
                "Transport kept its response type"
            );
        }
        Ok(())
    }

    fn with_credentials(&self) -> bool {
        self.inner.transport.with_credentials()
    }

    fn set_with_credentials(&self, with_credentials: bool) -> Result<()> {
        self.inner.transport.set_with_credentials(with_credentials)?;
        self.shadow().config.lock().with_credentials = with_credentials;
        Ok(())
    }

    fn get_response_header(&self, name: &str) -> Option<String> {
        if self.is_replaying() {
            let shadow = self.shadow();
            let lifecycle = shadow.lifecycle.lock();
            return lifecycle.overrides.headers.as_ref().and_then(|headers| {
                headers
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v.clone())
            });
        }
        self.inner.transport.get_response_header(name)
    }

    fn get_all_response_headers(&self) -> String {
        if self.is_replaying() {
            let shadow = self.shadow();
            let lifecycle = shadow.lifecycle.lock();
            return lifecycle
                .overrides
                .headers
                .as_ref()
                .map(|headers| format_headers(headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))))
                .unwrap_or_default();
        }
        self.inner.transport.get_all_response_headers()
    }

    /// The transport's raw target; listeners added here bypass interception
    fn event_target(&self) -> &EventTarget {
        self.inner.transport.event_target()
    }

    fn add_event_listener(&self, kind: EventKind, listener: Listener) {
        let wrapped = self.wrap_listener(kind, listener);
        self.inner.transport.add_event_listener(kind, wrapped);
    }

    fn remove_event_listener(&self, kind: EventKind, listener: &Listener) {
        match self.inner.listeners.wrapped(kind, listener) {
            Some(wrapper) => {
                self.inner.transport.remove_event_listener(kind, &wrapper);
                self.release_wrapper(kind, listener, &wrapper);
            }
            None => self.inner.transport.remove_event_listener(kind, listener),
        }
    }

    fn set_handler(&self, kind: EventKind, handler: Option<Listener>) {
        let previous = self.handler(kind);
        let wrapped = handler.map(|h| self.wrap_listener(kind, h));
        self.inner.transport.set_handler(kind, wrapped);

        if let Some(previous) = previous {
            if let Some(wrapper) = self.inner.listeners.wrapped(kind, &previous) {
                self.release_wrapper(kind, &previous, &wrapper);
            }
        }
    }

    fn handler(&self, kind: EventKind) -> Option<Listener> {
        self.inner
            .transport
            .handler(kind)
            .map(|h| self.inner.listeners.original_of(&h).unwrap_or(h))
    }
}
