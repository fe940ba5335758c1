// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! In-memory transport driven by the caller
//!
//! Records every call made to it and only progresses when told to, which
//! makes lifecycle ordering observable in tests and lets embedders simulate
//! a network without sockets.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};

use super::{format_headers, reason_phrase, ReadyState, ResponseType, ResponseValue, Xhr, XhrConstructor};
use crate::error::{Error, Result};
use crate::event::{EventKind, EventTarget, XhrEvent};

/// A call observed by a [`ScriptedXhr`]
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Open {
        method: String,
        url: String,
        is_async: bool,
        user: Option<String>,
        password: Option<String>,
    },
    SetRequestHeader {
        name: String,
        value: String,
    },
    Send {
        body: Option<Bytes>,
    },
    Abort,
    SetResponseType(ResponseType),
    SetWithCredentials(bool),
}

/// Response served automatically on `send`
#[derive(Debug, Clone)]
struct CannedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

#[derive(Debug, Default)]
struct ScriptedState {
    ready_state: ReadyState,
    sent: bool,
    status: u16,
    status_text: String,
    response_type: ResponseType,
    with_credentials: bool,
    response_headers: Vec<(String, String)>,
    body: BytesMut,
}

/// Caller-driven request object
pub struct ScriptedXhr {
    events: EventTarget,
    state: RwLock<ScriptedState>,
    calls: Mutex<Vec<TransportCall>>,
    canned: Option<CannedResponse>,
}

impl Default for ScriptedXhr {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedXhr {
    /// Create a transport that waits to be driven
    pub fn new() -> Self {
        Self {
            events: EventTarget::new(),
            state: RwLock::new(ScriptedState::default()),
            calls: Mutex::new(Vec::new()),
            canned: None,
        }
    }

    /// Create a transport that completes every `send` with this response
    pub fn responding(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            canned: Some(CannedResponse {
                status,
                headers: Vec::new(),
                body: body.into(),
            }),
            ..Self::new()
        }
    }

    /// Add a header to the canned response
    pub fn with_response_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(ref mut canned) = self.canned {
            canned.headers.push((name.into(), value.into()));
        }
        self
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Number of `send` calls that reached this transport
    pub fn send_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, TransportCall::Send { .. }))
            .count()
    }

    /// Whether `open` reached this transport
    pub fn was_opened(&self) -> bool {
        self.calls
            .lock()
            .iter()
            .any(|c| matches!(c, TransportCall::Open { .. }))
    }

    /// Deliver status and headers (ready state 2)
    pub fn respond_headers(&self, status: u16, headers: &[(&str, &str)]) {
        {
            let mut state = self.state.write();
            state.status = status;
            state.status_text = reason_phrase(status).to_string();
            state.response_headers = headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect();
            state.ready_state = ReadyState::HeadersReceived;
        }
        self.fire(XhrEvent::new(EventKind::ReadyStateChange));
    }

    /// Deliver a body chunk (ready state 3) followed by a progress event
    pub fn respond_body(&self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        let (entered_loading, loaded) = {
            let mut state = self.state.write();
            let entered = state.ready_state != ReadyState::Loading;
            state.ready_state = ReadyState::Loading;
            state.body.extend_from_slice(&chunk);
            (entered, state.body.len() as u64)
        };
        if entered_loading {
            self.fire(XhrEvent::new(EventKind::ReadyStateChange));
        }
        self.fire(XhrEvent::progress(EventKind::Progress, loaded, None));
    }

    /// Finish the exchange successfully (ready state 4, load, loadend)
    pub fn finish(&self) {
        {
            let mut state = self.state.write();
            state.ready_state = ReadyState::Done;
            state.sent = false;
        }
        self.fire(XhrEvent::new(EventKind::ReadyStateChange));
        self.fire(XhrEvent::new(EventKind::Load));
        self.fire(XhrEvent::new(EventKind::LoadEnd));
    }

    /// Run a whole successful exchange
    pub fn complete(&self, status: u16, body: impl Into<Bytes>) {
        self.respond_headers(status, &[]);
        self.respond_body(body);
        self.finish();
    }

    /// Finish the exchange with a network error
    pub fn fail(&self) {
        {
            let mut state = self.state.write();
            state.ready_state = ReadyState::Done;
            state.status = 0;
            state.status_text.clear();
            state.sent = false;
        }
        self.fire(XhrEvent::new(EventKind::ReadyStateChange));
        self.fire(XhrEvent::new(EventKind::Error));
        self.fire(XhrEvent::new(EventKind::LoadEnd));
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }

    fn fire(&self, event: XhrEvent) {
        self.events.dispatch(&event);
    }

    fn serve_canned(&self, canned: &CannedResponse) {
        let headers: Vec<(&str, &str)> = canned
            .headers
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str()))
            .collect();
        self.respond_headers(canned.status, &headers);
        self.respond_body(canned.body.clone());
        self.finish();
    }
}

#[async_trait]
impl Xhr for ScriptedXhr {
    fn open(
        &self,
        method: &str,
        url: &str,
        is_async: bool,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        self.record(TransportCall::Open {
            method: method.to_string(),
            url: url.to_string(),
            is_async,
            user: user.map(String::from),
            password: password.map(String::from),
        });
        {
            let mut state = self.state.write();
            let response_type = state.response_type;
            let with_credentials = state.with_credentials;
            *state = ScriptedState {
                ready_state: ReadyState::Opened,
                response_type,
                with_credentials,
                ..Default::default()
            };
        }
        self.fire(XhrEvent::new(EventKind::ReadyStateChange));
        Ok(())
    }

    fn set_request_header(&self, name: &str, value: &str) -> Result<()> {
        let state = self.state.read();
        if state.ready_state != ReadyState::Opened || state.sent {
            return Err(Error::invalid_state("setRequestHeader", state.ready_state));
        }
        drop(state);
        self.record(TransportCall::SetRequestHeader {
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn send(&self, body: Option<Bytes>) -> Result<()> {
        {
            let mut state = self.state.write();
            if state.ready_state != ReadyState::Opened || state.sent {
                return Err(Error::invalid_state("send", state.ready_state));
            }
            state.sent = true;
        }
        self.record(TransportCall::Send { body });
        self.fire(XhrEvent::new(EventKind::LoadStart));

        if let Some(canned) = self.canned.clone() {
            self.serve_canned(&canned);
        }
        Ok(())
    }

    fn abort(&self) {
        self.record(TransportCall::Abort);
        let (in_flight, done) = {
            let state = self.state.read();
            (
                (state.ready_state == ReadyState::Opened && state.sent)
                    || matches!(
                        state.ready_state,
                        ReadyState::HeadersReceived | ReadyState::Loading
                    ),
                state.ready_state == ReadyState::Done,
            )
        };
        if in_flight {
            {
                let mut state = self.state.write();
                state.ready_state = ReadyState::Done;
                state.status = 0;
                state.sent = false;
            }
            self.fire(XhrEvent::new(EventKind::ReadyStateChange));
            self.fire(XhrEvent::new(EventKind::Abort));
            self.fire(XhrEvent::new(EventKind::LoadEnd));
        }
        if in_flight || done {
            self.state.write().ready_state = ReadyState::Unsent;
        }
    }

    fn ready_state(&self) -> ReadyState {
        self.state.read().ready_state
    }

    fn status(&self) -> u16 {
        self.state.read().status
    }

    fn status_text(&self) -> String {
        self.state.read().status_text.clone()
    }

    fn response(&self) -> ResponseValue {
        let state = self.state.read();
        match state.ready_state {
            ReadyState::Done => ResponseValue::decode(&state.body.clone().freeze(), state.response_type),
            ReadyState::Loading if state.response_type.is_textual() => {
                ResponseValue::Text(String::from_utf8_lossy(&state.body).into_owned())
            }
            _ => ResponseValue::empty_for(state.response_type),
        }
    }

    fn response_text(&self) -> String {
        let state = self.state.read();
        let readable = matches!(state.ready_state, ReadyState::Loading | ReadyState::Done);
        if readable && state.response_type.is_textual() {
            String::from_utf8_lossy(&state.body).into_owned()
        } else {
            String::new()
        }
    }

    fn response_type(&self) -> ResponseType {
        self.state.read().response_type
    }

    fn set_response_type(&self, response_type: ResponseType) -> Result<()> {
        let mut state = self.state.write();
        if matches!(state.ready_state, ReadyState::Loading | ReadyState::Done) {
            return Err(Error::invalid_state("responseType", state.ready_state));
        }
        state.response_type = response_type;
        drop(state);
        self.record(TransportCall::SetResponseType(response_type));
        Ok(())
    }

    fn with_credentials(&self) -> bool {
        self.state.read().with_credentials
    }

    fn set_with_credentials(&self, with_credentials: bool) -> Result<()> {
        let mut state = self.state.write();
        if state.sent || state.ready_state > ReadyState::Opened {
            return Err(Error::invalid_state("withCredentials", state.ready_state));
        }
        state.with_credentials = with_credentials;
        drop(state);
        self.record(TransportCall::SetWithCredentials(with_credentials));
        Ok(())
    }

    fn get_response_header(&self, name: &str) -> Option<String> {
        self.state
            .read()
            .response_headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    fn get_all_response_headers(&self) -> String {
        let state = self.state.read();
        format_headers(
            state
                .response_headers
                .iter()
                .map(|(n, v)| (n.as_str(), v.as_str())),
        )
    }

    fn event_target(&self) -> &EventTarget {
        &self.events
    }
}

/// Constructor producing [`ScriptedXhr`] objects and remembering them
#[derive(Default)]
pub struct ScriptedXhrConstructor {
    canned: Option<(u16, Bytes)>,
    constructed: Mutex<Vec<Arc<ScriptedXhr>>>,
}

impl ScriptedXhrConstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every constructed object answers `send` with this response
    pub fn responding(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            canned: Some((status, body.into())),
            constructed: Mutex::new(Vec::new()),
        }
    }

    /// All objects constructed so far
    pub fn instances(&self) -> Vec<Arc<ScriptedXhr>> {
        self.constructed.lock().clone()
    }

    /// The most recently constructed object
    pub fn last(&self) -> Option<Arc<ScriptedXhr>> {
        self.constructed.lock().last().cloned()
    }
}

impl XhrConstructor for ScriptedXhrConstructor {
    fn construct(&self) -> Arc<dyn Xhr> {
        let xhr = Arc::new(match &self.canned {
            Some((status, body)) => ScriptedXhr::responding(*status, body.clone()),
            None => ScriptedXhr::new(),
        });
        self.constructed.lock().push(xhr.clone());
        xhr
    }

    fn name(&self) -> &str {
        "ScriptedXhr"
    }
}
