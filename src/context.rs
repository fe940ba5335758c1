// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Execution contexts and hook registration
//!
//! An [`ExecutionContext`] owns the request constructor code running in it
//! uses. [`hook_in`] swaps that constructor for an [`Interceptor`] and
//! registers a hook on it; [`unhook_in`] puts the original back.

use std::sync::{Arc, Weak};

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::config::InterceptorConfig;
use crate::error::{Error, Result};
use crate::hook::{HookId, HookRegistry, XhrHook};
use crate::intercept::Interceptor;
use crate::transport::{HttpXhrConstructor, Xhr, XhrConstructor};

lazy_static! {
    /// Default context, backed by the HTTP transport
    static ref GLOBAL_CONTEXT: ExecutionContext = match HttpXhrConstructor::new() {
        Ok(constructor) => ExecutionContext::new(Arc::new(constructor)),
        Err(e) => {
            tracing::warn!(error = %e, "HTTP transport unavailable, default context is empty");
            ExecutionContext::empty()
        }
    };
}

struct Slot {
    /// Constructor currently installed
    current: Option<Arc<dyn XhrConstructor>>,
    /// Interceptor created by the first `hook_in`, kept across unhooks
    interceptor: Option<Arc<Interceptor>>,
    config: InterceptorConfig,
}

/// Holder of the request constructor a piece of code uses
pub struct ExecutionContext {
    slot: Mutex<Slot>,
}

fn same_constructor(a: &Arc<dyn XhrConstructor>, b: &Arc<dyn XhrConstructor>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl ExecutionContext {
    /// Context using `constructor`
    pub fn new(constructor: Arc<dyn XhrConstructor>) -> Self {
        Self::with_config(Some(constructor), InterceptorConfig::default())
    }

    /// Context without any request constructor
    pub fn empty() -> Self {
        Self::with_config(None, InterceptorConfig::default())
    }

    /// Context whose interceptor will use `config`
    pub fn with_config(
        constructor: Option<Arc<dyn XhrConstructor>>,
        config: InterceptorConfig,
    ) -> Self {
        Self {
            slot: Mutex::new(Slot {
                current: constructor,
                interceptor: None,
                config,
            }),
        }
    }

    /// The default context used by [`hook`] and [`unhook`]
    pub fn global() -> &'static ExecutionContext {
        &GLOBAL_CONTEXT
    }

    /// Constructor currently installed
    pub fn constructor(&self) -> Option<Arc<dyn XhrConstructor>> {
        self.slot.lock().current.clone()
    }

    /// Replace the installed constructor
    ///
    /// An interceptor from an earlier `hook_in` is forgotten unless
    /// `constructor` is the one it wraps.
    pub fn set_constructor(&self, constructor: Arc<dyn XhrConstructor>) {
        let mut slot = self.slot.lock();
        let keeps_interceptor = slot
            .interceptor
            .as_ref()
            .map_or(false, |i| same_constructor(i.original(), &constructor));
        if !keeps_interceptor {
            slot.interceptor = None;
        }
        slot.current = Some(constructor);
    }

    /// Whether the installed constructor is this context's interceptor
    pub fn is_intercepted(&self) -> bool {
        let slot = self.slot.lock();
        match (&slot.current, &slot.interceptor) {
            (Some(current), Some(interceptor)) => {
                let interceptor: Arc<dyn XhrConstructor> = interceptor.clone();
                same_constructor(current, &interceptor)
            }
            _ => false,
        }
    }

    /// The interceptor owned by this context, installed or not
    pub fn interceptor(&self) -> Option<Arc<Interceptor>> {
        self.slot.lock().interceptor.clone()
    }

    /// Build a request object with the installed constructor
    pub fn create(&self) -> Result<Arc<dyn Xhr>> {
        self.constructor()
            .map(|constructor| constructor.construct())
            .ok_or_else(|| Error::setup("create", "execution context has no request constructor"))
    }

    /// Install interception if needed and return the interceptor
    fn install(&self) -> Result<Arc<Interceptor>> {
        let mut slot = self.slot.lock();
        let current = slot
            .current
            .clone()
            .ok_or_else(|| Error::setup("hook", "execution context has no request constructor"))?;

        if let Some(interceptor) = slot.interceptor.clone() {
            let installed: Arc<dyn XhrConstructor> = interceptor.clone();
            if same_constructor(&current, &installed) {
                return Ok(interceptor);
            }
            if same_constructor(&current, interceptor.original()) {
                tracing::debug!(constructor = current.name(), "Interception reinstalled");
                slot.current = Some(installed);
                return Ok(interceptor);
            }
        }

        let interceptor = Arc::new(Interceptor::with_config(current.clone(), slot.config.clone()));
        tracing::debug!(constructor = current.name(), "Interception installed");
        let installed: Arc<dyn XhrConstructor> = interceptor.clone();
        slot.current = Some(installed);
        slot.interceptor = Some(interceptor.clone());
        Ok(interceptor)
    }

    /// Restore the original constructor, returns whether one was restored
    fn uninstall(&self) -> bool {
        let mut slot = self.slot.lock();
        let restored = match (&slot.current, &slot.interceptor) {
            (Some(current), Some(interceptor)) => {
                let installed: Arc<dyn XhrConstructor> = interceptor.clone();
                same_constructor(current, &installed).then(|| interceptor.original().clone())
            }
            _ => None,
        };

        match restored {
            Some(original) => {
                tracing::debug!(constructor = original.name(), "Interception removed");
                slot.current = Some(original);
                true
            }
            None => false,
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::empty()
    }
}

/// Disposer returned by [`hook`] and [`hook_in`]
#[derive(Debug, Clone)]
pub struct HookHandle {
    registry: Weak<HookRegistry>,
    id: HookId,
}

impl HookHandle {
    pub fn id(&self) -> HookId {
        self.id
    }

    /// Remove the hook, returns whether it was still registered
    pub fn unhook(&self) -> bool {
        self.registry
            .upgrade()
            .map_or(false, |registry| registry.unregister(self.id))
    }
}

/// Register `hook` on the default context
pub fn hook(hook: Arc<dyn XhrHook>) -> Result<HookHandle> {
    hook_in(hook, ExecutionContext::global())
}

/// Register `hook` on `ctx`, intercepting its constructor if needed
///
/// Fails with [`Error::Setup`] when the context has no request constructor.
pub fn hook_in(hook: Arc<dyn XhrHook>, ctx: &ExecutionContext) -> Result<HookHandle> {
    let interceptor = ctx.install()?;
    let id = interceptor.register(hook);
    Ok(HookHandle {
        registry: Arc::downgrade(interceptor.hooks()),
        id,
    })
}

/// Restore the default context's original constructor
pub fn unhook() {
    unhook_in(ExecutionContext::global())
}

/// Restore the original constructor of `ctx`
///
/// Hooks stay registered on the context's interceptor and become active
/// again on the next [`hook_in`].
pub fn unhook_in(ctx: &ExecutionContext) {
    if !ctx.uninstall() {
        tracing::warn!("Execution context is not intercepted, nothing to unhook");
    }
}
