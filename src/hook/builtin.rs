// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Ready-made hooks
//!
//! Header injection, request recording, network blocking and canned
//! responses, the checkpoints most callers end up writing by hand.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{HookInstance, XhrHook};
use crate::intercept::{FabricatedResponse, InterceptedXhr, RequestConfig, SharedConfig};
use crate::transport::Xhr;

/// Scratch key holding a request's index in the recorder
const RECORD_INDEX: &str = "recorder.index";

/// Whether `url` is on one of `domains` or a subdomain of it (empty = all)
fn host_matches(url: &str, domains: &[String]) -> bool {
    if domains.is_empty() {
        return true;
    }

    let Some(host) = url::Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
    else {
        return false;
    };

    domains.iter().any(|domain| {
        let domain = domain.trim_start_matches('.').to_ascii_lowercase();
        host == domain
            || host
                .strip_suffix(domain.as_str())
                .map_or(false, |prefix| prefix.ends_with('.'))
    })
}

/// Adds headers to every outgoing request
pub struct HeaderInjector {
    /// Headers to inject, in order
    headers: Vec<(String, String)>,
    /// Domains to inject into (empty = all)
    domains: Vec<String>,
}

impl HeaderInjector {
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
            domains: Vec::new(),
        }
    }

    /// Add a bearer token
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.headers
            .push(("authorization".to_string(), format!("Bearer {}", token.into())));
        self
    }

    /// Add basic auth
    pub fn basic_auth(mut self, username: &str, password: &str) -> Self {
        let encoded = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            format!("{}:{}", username, password),
        );
        self.headers
            .push(("authorization".to_string(), format!("Basic {}", encoded)));
        self
    }

    /// Add custom header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Restrict to specific domains
    pub fn for_domains(mut self, domains: Vec<String>) -> Self {
        self.domains = domains;
        self
    }
}

impl Default for HeaderInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl XhrHook for HeaderInjector {
    fn name(&self) -> &str {
        "header-injector"
    }

    async fn on_request(
        &self,
        _hook: &HookInstance,
        xhr: &InterceptedXhr,
        config: &SharedConfig,
    ) -> anyhow::Result<()> {
        let url = config.lock().url.clone();
        if !host_matches(&url, &self.domains) {
            return Ok(());
        }

        for (name, value) in &self.headers {
            xhr.set_request_header(name, value)?;
        }
        Ok(())
    }

    fn observes_response(&self) -> bool {
        false
    }
}

/// A request seen by a [`RequestRecorder`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    /// Request headers by lower-cased name, sorted
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Filled in once the response completed
    pub status: Option<u16>,
    pub response_text: Option<String>,
}

/// Records every request and its response
pub struct RequestRecorder {
    /// Recorded requests, in send order
    requests: Arc<RwLock<Vec<RecordedRequest>>>,
    /// Only record URLs containing this string
    url_filter: Option<String>,
}

impl RequestRecorder {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(RwLock::new(Vec::new())),
            url_filter: None,
        }
    }

    /// Only record URLs containing `filter`
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.url_filter = Some(filter.into());
        self
    }

    /// Copy of everything recorded so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.read().clone()
    }

    pub fn clear(&self) {
        self.requests.write().clear();
    }
}

impl Default for RequestRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl XhrHook for RequestRecorder {
    fn name(&self) -> &str {
        "request-recorder"
    }

    fn on_config(
        &self,
        hook: &HookInstance,
        _xhr: &InterceptedXhr,
        config: &mut RequestConfig,
    ) -> anyhow::Result<()> {
        let skip = self
            .url_filter
            .as_ref()
            .map_or(false, |filter| !config.url.contains(filter.as_str()));
        hook.set_bypass_request(skip);
        Ok(())
    }

    async fn on_request(
        &self,
        hook: &HookInstance,
        _xhr: &InterceptedXhr,
        config: &SharedConfig,
    ) -> anyhow::Result<()> {
        let record = {
            let config = config.lock();
            let mut headers: Vec<(String, String)> = config
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            headers.sort();
            RecordedRequest {
                method: config.method.clone(),
                url: config.url.clone(),
                headers,
                body: config
                    .body
                    .as_ref()
                    .map(|body| String::from_utf8_lossy(body).into_owned()),
                status: None,
                response_text: None,
            }
        };

        tracing::info!(method = %record.method, url = %record.url, "Request");

        let index = {
            let mut requests = self.requests.write();
            requests.push(record);
            requests.len() - 1
        };
        hook.set(RECORD_INDEX, serde_json::json!(index));
        Ok(())
    }

    async fn on_response(
        &self,
        hook: &HookInstance,
        xhr: &InterceptedXhr,
        _config: &SharedConfig,
    ) -> anyhow::Result<()> {
        let Some(index) = hook.get(RECORD_INDEX).and_then(|v| v.as_u64()) else {
            return Ok(());
        };

        let status = xhr.status();
        let text = xhr.response_text();
        if let Some(record) = self.requests.write().get_mut(index as usize) {
            tracing::info!(url = %record.url, status, "Response");
            record.status = Some(status);
            record.response_text = Some(text);
        }
        Ok(())
    }
}

/// Redirects matching requests to an inert data URI
pub struct NetworkBlocker {
    /// URL substrings to block
    patterns: Vec<String>,
}

impl NetworkBlocker {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Block one more URL substring
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    fn blocks(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| url.contains(p.as_str()))
    }
}

impl XhrHook for NetworkBlocker {
    fn name(&self) -> &str {
        "network-blocker"
    }

    fn on_config(
        &self,
        _hook: &HookInstance,
        xhr: &InterceptedXhr,
        config: &mut RequestConfig,
    ) -> anyhow::Result<()> {
        if self.blocks(&config.url) {
            tracing::debug!(instance = %xhr.id(), url = %config.url, "Request blocked");
            config.network_blocking();
        }
        Ok(())
    }

    fn observes_response(&self) -> bool {
        false
    }
}

/// Answers matching requests with canned responses
pub struct MockResponder {
    /// URL substring and the response served for it, first match wins
    routes: Vec<(String, FabricatedResponse)>,
}

impl MockResponder {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Serve `response` for URLs containing `pattern`
    pub fn route(mut self, pattern: impl Into<String>, response: FabricatedResponse) -> Self {
        self.routes.push((pattern.into(), response));
        self
    }

    fn lookup(&self, url: &str) -> Option<&FabricatedResponse> {
        self.routes
            .iter()
            .find(|(pattern, _)| url.contains(pattern.as_str()))
            .map(|(_, response)| response)
    }
}

impl Default for MockResponder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl XhrHook for MockResponder {
    fn name(&self) -> &str {
        "mock-responder"
    }

    async fn on_request(
        &self,
        _hook: &HookInstance,
        xhr: &InterceptedXhr,
        config: &SharedConfig,
    ) -> anyhow::Result<()> {
        let mut config = config.lock();
        if let Some(response) = self.lookup(&config.url) {
            tracing::debug!(instance = %xhr.id(), url = %config.url, status = response.status, "Mocked");
            config.response = Some(response.clone());
        }
        Ok(())
    }

    fn observes_response(&self) -> bool {
        false
    }
}
