// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Interception factory

use std::sync::Arc;

use super::state::ShadowTable;
use super::xhr::InterceptedXhr;
use crate::config::InterceptorConfig;
use crate::hook::{HookId, HookRegistry, XhrHook};
use crate::transport::{Xhr, XhrConstructor};

/// Constructor producing intercepted request objects
///
/// Owns the hook registry shared by every instance it creates, and wraps
/// each object built by the original constructor in an [`InterceptedXhr`].
pub struct Interceptor {
    /// Constructor being intercepted
    original: Arc<dyn XhrConstructor>,
    /// Registered hooks
    hooks: Arc<HookRegistry>,
    /// Shadow state of live instances
    shadows: Arc<ShadowTable>,
    /// Settings handed to every instance
    config: Arc<InterceptorConfig>,
}

impl Interceptor {
    /// Create a new interceptor over `original`
    pub fn new(original: Arc<dyn XhrConstructor>) -> Self {
        Self::with_config(original, InterceptorConfig::default())
    }

    /// Create a new interceptor with custom configuration
    pub fn with_config(original: Arc<dyn XhrConstructor>, config: InterceptorConfig) -> Self {
        Self {
            original,
            hooks: Arc::new(HookRegistry::new()),
            shadows: Arc::new(ShadowTable::new()),
            config: Arc::new(config),
        }
    }

    /// Register a hook for every current and future instance
    pub fn register(&self, hook: Arc<dyn XhrHook>) -> HookId {
        self.hooks.register(hook)
    }

    /// Unregister a hook, returns whether it was registered
    pub fn unregister(&self, id: HookId) -> bool {
        self.hooks.unregister(id)
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    /// The intercepted constructor
    pub fn original(&self) -> &Arc<dyn XhrConstructor> {
        &self.original
    }

    /// Build a new intercepted request object
    pub fn create(&self) -> InterceptedXhr {
        self.wrap(self.original.construct())
    }

    /// Intercept an existing request object
    pub fn wrap(&self, transport: Arc<dyn Xhr>) -> InterceptedXhr {
        let xhr = InterceptedXhr::new(
            transport,
            self.hooks.clone(),
            self.shadows.clone(),
            self.config.clone(),
        );
        tracing::trace!(instance = %xhr.id(), "Request object intercepted");
        xhr
    }

    /// Number of instances whose shadow state is alive
    pub fn live_instances(&self) -> usize {
        self.shadows.len()
    }
}

impl XhrConstructor for Interceptor {
    fn construct(&self) -> Arc<dyn Xhr> {
        Arc::new(self.create())
    }

    fn name(&self) -> &str {
        self.original.name()
    }
}
