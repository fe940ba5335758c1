// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! HTTP transport backed by reqwest
//!
//! Performs the real network exchange and fires the lifecycle events a
//! browser XMLHttpRequest would. `data:` URLs are answered locally, which
//! is what makes `RequestConfig::network_blocking` inert.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use tokio::task::JoinHandle;
use url::Url;

use super::{format_headers, ReadyState, ResponseType, ResponseValue, Xhr, XhrConstructor};
use crate::error::{Error, ErrorContext, Result};
use crate::event::{EventKind, EventTarget, XhrEvent};

/// Default user agent string
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct HttpXhrConfig {
    /// User agent string
    pub user_agent: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Maximum redirects to follow
    pub max_redirects: usize,
    /// Accept invalid certificates (dangerous!)
    pub accept_invalid_certs: bool,
    /// Proxy URL
    pub proxy: Option<String>,
    /// Base for resolving relative URLs passed to `open`
    pub base_url: Option<Url>,
    /// Headers sent with every request
    pub default_headers: HeaderMap,
}

impl Default for HttpXhrConfig {
    fn default() -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("accept", HeaderValue::from_static("*/*"));
        default_headers.insert(
            "accept-language",
            HeaderValue::from_static("en-US,en;q=0.5"),
        );

        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
            accept_invalid_certs: false,
            proxy: None,
            base_url: None,
            default_headers,
        }
    }
}

impl HttpXhrConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set user agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set proxy
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Resolve relative URLs against `base`
    pub fn base_url(mut self, base: Url) -> Self {
        self.base_url = Some(base);
        self
    }

    /// Accept invalid TLS certificates
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    fn build_client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .user_agent(&self.user_agent)
            .redirect(Policy::limited(self.max_redirects))
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .default_headers(self.default_headers.clone())
            .cookie_store(true);

        if let Some(ref proxy_url) = self.proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy_url)
                    .map_err(|e| Error::other(format!("Invalid proxy URL: {}", e)))?,
            );
        }

        Ok(builder.build()?)
    }
}

/// Constructor for [`HttpXhr`] objects sharing one connection pool
#[derive(Clone)]
pub struct HttpXhrConstructor {
    client: Client,
    config: Arc<HttpXhrConfig>,
}

impl HttpXhrConstructor {
    /// Create a constructor with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(HttpXhrConfig::default())
    }

    /// Create a constructor with custom configuration
    pub fn with_config(config: HttpXhrConfig) -> Result<Self> {
        Ok(Self {
            client: config.build_client()?,
            config: Arc::new(config),
        })
    }

    /// Get transport configuration
    pub fn config(&self) -> &HttpXhrConfig {
        &self.config
    }
}

impl XhrConstructor for HttpXhrConstructor {
    fn construct(&self) -> Arc<dyn Xhr> {
        Arc::new(HttpXhr::with_client(self.client.clone(), self.config.clone()))
    }
}

#[derive(Debug, Default)]
struct HttpState {
    ready_state: ReadyState,
    method: Option<Method>,
    url: Option<Url>,
    is_async: bool,
    user: Option<String>,
    password: Option<String>,
    request_headers: HeaderMap,
    sent: bool,
    with_credentials: bool,
    response_type: ResponseType,
    status: u16,
    status_text: String,
    response_headers: Vec<(String, String)>,
    body: Bytes,
}

/// Response as received from the network or decoded from a data URL
struct Fetched {
    status: u16,
    status_text: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

struct Shared {
    client: Client,
    config: Arc<HttpXhrConfig>,
    events: EventTarget,
    state: RwLock<HttpState>,
    /// Bumped by `open` and `abort`; exchanges from older generations are discarded
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// XMLHttpRequest performing real HTTP I/O
pub struct HttpXhr {
    shared: Arc<Shared>,
}

impl HttpXhr {
    /// Create a request object with its own client
    pub fn new() -> Result<Self> {
        let config = HttpXhrConfig::default();
        Ok(Self::with_client(config.build_client()?, Arc::new(config)))
    }

    /// Create a request object on an existing client
    pub fn with_client(client: Client, config: Arc<HttpXhrConfig>) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                config,
                events: EventTarget::new(),
                state: RwLock::new(HttpState::default()),
                generation: AtomicU64::new(0),
                task: Mutex::new(None),
            }),
        }
    }
}

impl Shared {
    fn fire(&self, event: XhrEvent) {
        self.events.dispatch(&event);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn exchange(self: Arc<Self>, generation: u64, body: Option<Bytes>) {
        let (method, url, headers, user, password) = {
            let state = self.state.read();
            (
                state.method.clone().unwrap_or(Method::GET),
                state.url.clone(),
                state.request_headers.clone(),
                state.user.clone(),
                state.password.clone(),
            )
        };
        let Some(url) = url else {
            self.deliver_error(generation, false);
            return;
        };

        let result = if url.scheme() == "data" {
            decode_data_url(&url)
        } else {
            self.fetch(method, url.clone(), headers, user, password, body)
                .await
                .with_url(url.as_str())
        };

        match result {
            Ok(fetched) => self.deliver(generation, fetched),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "XHR exchange failed");
                self.deliver_error(generation, e.is_timeout());
            }
        }
    }

    async fn fetch(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        user: Option<String>,
        password: Option<String>,
        body: Option<Bytes>,
    ) -> Result<Fetched> {
        let mut builder = self
            .client
            .request(method, url)
            .timeout(self.config.timeout)
            .headers(headers);

        if let Some(user) = user {
            builder = builder.basic_auth(user, password);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = response.bytes().await?;

        Ok(Fetched {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }

    fn deliver(&self, generation: u64, fetched: Fetched) {
        if !self.is_current(generation) {
            return;
        }
        let total = fetched.body.len() as u64;
        {
            let mut state = self.state.write();
            state.status = fetched.status;
            state.status_text = fetched.status_text;
            state.response_headers = fetched.headers;
            state.ready_state = ReadyState::HeadersReceived;
        }
        self.fire(XhrEvent::new(EventKind::ReadyStateChange));

        if !self.is_current(generation) {
            return;
        }
        self.state.write().ready_state = ReadyState::Loading;
        self.fire(XhrEvent::new(EventKind::ReadyStateChange));
        self.fire(XhrEvent::progress(EventKind::Progress, total, Some(total)));

        if !self.is_current(generation) {
            return;
        }
        {
            let mut state = self.state.write();
            state.body = fetched.body;
            state.ready_state = ReadyState::Done;
            state.sent = false;
        }
        self.fire(XhrEvent::new(EventKind::ReadyStateChange));
        self.fire(XhrEvent::new(EventKind::Load));
        self.fire(XhrEvent::new(EventKind::LoadEnd));
    }

    fn deliver_error(&self, generation: u64, timed_out: bool) {
        if !self.is_current(generation) {
            return;
        }
        {
            let mut state = self.state.write();
            state.ready_state = ReadyState::Done;
            state.status = 0;
            state.status_text.clear();
            state.sent = false;
        }
        self.fire(XhrEvent::new(EventKind::ReadyStateChange));
        self.fire(XhrEvent::new(if timed_out {
            EventKind::Timeout
        } else {
            EventKind::Error
        }));
        self.fire(XhrEvent::new(EventKind::LoadEnd));
    }
}

#[async_trait]
impl Xhr for HttpXhr {
    fn open(
        &self,
        method: &str,
        url: &str,
        is_async: bool,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        let method = normalize_method(method)?;
        let url = match self.shared.config.base_url {
            Some(ref base) => base.join(url)?,
            None => Url::parse(url)?,
        };

        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.shared.task.lock().take() {
            task.abort();
        }

        {
            let mut state = self.shared.state.write();
            let response_type = state.response_type;
            let with_credentials = state.with_credentials;
            *state = HttpState {
                ready_state: ReadyState::Opened,
                method: Some(method),
                url: Some(url),
                is_async,
                user: user.map(String::from),
                password: password.map(String::from),
                response_type,
                with_credentials,
                ..Default::default()
            };
        }
        self.shared.fire(XhrEvent::new(EventKind::ReadyStateChange));
        Ok(())
    }

    fn set_request_header(&self, name: &str, value: &str) -> Result<()> {
        let mut state = self.shared.state.write();
        if state.ready_state != ReadyState::Opened || state.sent {
            return Err(Error::invalid_state("setRequestHeader", state.ready_state));
        }
        let header_name = HeaderName::try_from(name)
            .map_err(|e| Error::invalid_header(name, e.to_string()))?;
        let header_value = HeaderValue::try_from(value)
            .map_err(|e| Error::invalid_header(name, e.to_string()))?;
        state.request_headers.append(header_name, header_value);
        Ok(())
    }

    async fn send(&self, body: Option<Bytes>) -> Result<()> {
        let (generation, is_async, body) = {
            let mut state = self.shared.state.write();
            if state.ready_state != ReadyState::Opened || state.sent {
                return Err(Error::invalid_state("send", state.ready_state));
            }
            state.sent = true;
            let body = match state.method {
                Some(Method::GET) | Some(Method::HEAD) => None,
                _ => body,
            };
            (
                self.shared.generation.load(Ordering::SeqCst),
                state.is_async,
                body,
            )
        };

        self.shared.fire(XhrEvent::new(EventKind::LoadStart));

        let shared = self.shared.clone();
        if is_async {
            let handle = tokio::spawn(shared.exchange(generation, body));
            *self.shared.task.lock() = Some(handle);
        } else {
            shared.exchange(generation, body).await;
        }
        Ok(())
    }

    fn abort(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.shared.task.lock().take() {
            task.abort();
        }

        let (in_flight, done) = {
            let state = self.shared.state.read();
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
                let mut state = self.shared.state.write();
                state.ready_state = ReadyState::Done;
                state.status = 0;
                state.sent = false;
            }
            self.shared.fire(XhrEvent::new(EventKind::ReadyStateChange));
            self.shared.fire(XhrEvent::new(EventKind::Abort));
            self.shared.fire(XhrEvent::new(EventKind::LoadEnd));
        }
        if in_flight || done {
            self.shared.state.write().ready_state = ReadyState::Unsent;
        }
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.state.read().ready_state
    }

    fn status(&self) -> u16 {
        self.shared.state.read().status
    }

    fn status_text(&self) -> String {
        self.shared.state.read().status_text.clone()
    }

    fn response(&self) -> ResponseValue {
        let state = self.shared.state.read();
        if state.ready_state == ReadyState::Done {
            ResponseValue::decode(&state.body, state.response_type)
        } else {
            ResponseValue::empty_for(state.response_type)
        }
    }

    fn response_text(&self) -> String {
        let state = self.shared.state.read();
        if state.ready_state == ReadyState::Done && state.response_type.is_textual() {
            String::from_utf8_lossy(&state.body).into_owned()
        } else {
            String::new()
        }
    }

    fn response_type(&self) -> ResponseType {
        self.shared.state.read().response_type
    }

    fn set_response_type(&self, response_type: ResponseType) -> Result<()> {
        let mut state = self.shared.state.write();
        if matches!(state.ready_state, ReadyState::Loading | ReadyState::Done) {
            return Err(Error::invalid_state("responseType", state.ready_state));
        }
        state.response_type = response_type;
        Ok(())
    }

    fn with_credentials(&self) -> bool {
        self.shared.state.read().with_credentials
    }

    fn set_with_credentials(&self, with_credentials: bool) -> Result<()> {
        let mut state = self.shared.state.write();
        if state.sent || state.ready_state > ReadyState::Opened {
            return Err(Error::invalid_state("withCredentials", state.ready_state));
        }
        state.with_credentials = with_credentials;
        Ok(())
    }

    fn get_response_header(&self, name: &str) -> Option<String> {
        self.shared
            .state
            .read()
            .response_headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    fn get_all_response_headers(&self) -> String {
        let state = self.shared.state.read();
        format_headers(
            state
                .response_headers
                .iter()
                .map(|(n, v)| (n.as_str(), v.as_str())),
        )
    }

    fn event_target(&self) -> &EventTarget {
        &self.shared.events
    }
}

/// Uppercase the standard methods, keep extension methods verbatim
fn normalize_method(method: &str) -> Result<Method> {
    const STANDARD: [&str; 6] = ["DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT"];
    let normalized = STANDARD
        .iter()
        .find(|m| m.eq_ignore_ascii_case(method))
        .map(|m| m.to_string())
        .unwrap_or_else(|| method.to_string());
    Method::from_bytes(normalized.as_bytes())
        .map_err(|e| Error::other(format!("Invalid method '{}': {}", method, e)))
}

/// Answer a `data:` URL without touching the network
fn decode_data_url(url: &Url) -> Result<Fetched> {
    let rest = url
        .as_str()
        .strip_prefix("data:")
        .ok_or_else(|| Error::transport_with_url("Not a data URL", url.as_str()))?;
    let (meta, data) = rest
        .split_once(',')
        .ok_or_else(|| Error::transport_with_url("Malformed data URL", url.as_str()))?;

    let (mime, is_base64) = match meta.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (meta, false),
    };
    let mime = if mime.is_empty() {
        "text/plain;charset=US-ASCII"
    } else {
        mime
    };

    let raw = percent_decode(data);
    let body = if is_base64 {
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, raw)?
    } else {
        raw
    };

    Ok(Fetched {
        status: 200,
        status_text: "OK".to_string(),
        headers: vec![("content-type".to_string(), mime.to_string())],
        body: Bytes::from(body),
    })
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}
