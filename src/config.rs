// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Interceptor configuration

use std::time::Duration;

/// Inert data URI requests are redirected to by `RequestConfig::network_blocking`
pub const NETWORK_BLOCK_URL: &str = "data:text/plain;base64,Cg==";

/// Interceptor configuration
#[derive(Debug, Clone)]
pub struct InterceptorConfig {
    /// Pause between synthetic replay stages (`None` = a single scheduler yield)
    pub replay_step_delay: Option<Duration>,
    /// Status text reported during replay when the fabricated response has none
    pub replay_status_text: Option<String>,
    /// URL substituted by `network_blocking()`
    pub network_block_url: String,
    /// Catch panics raised by hooks instead of letting them unwind
    pub catch_hook_panics: bool,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            replay_step_delay: None,
            replay_status_text: None,
            network_block_url: NETWORK_BLOCK_URL.to_string(),
            catch_hook_panics: true,
        }
    }
}

impl InterceptorConfig {
    /// Create a new interceptor config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pause between replay stages
    pub fn replay_step_delay(mut self, delay: Duration) -> Self {
        self.replay_step_delay = Some(delay);
        self
    }

    /// Set the fallback status text for fabricated responses
    pub fn replay_status_text(mut self, status_text: impl Into<String>) -> Self {
        self.replay_status_text = Some(status_text.into());
        self
    }

    /// Set the URL used for network blocking
    pub fn network_block_url(mut self, url: impl Into<String>) -> Self {
        self.network_block_url = url.into();
        self
    }

    /// Catch or propagate hook panics
    pub fn catch_hook_panics(mut self, catch: bool) -> Self {
        self.catch_hook_panics = catch;
        self
    }

    /// Config mimicking a browser's event-loop pacing during replay
    pub fn for_browser_timing() -> Self {
        Self {
            replay_step_delay: Some(Duration::from_millis(4)),
            ..Default::default()
        }
    }

    /// Config for debugging hooks: panics surface at the call site
    pub fn for_hook_debugging() -> Self {
        Self {
            catch_hook_panics: false,
            ..Default::default()
        }
    }
}
