// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Hook invocation at the three lifecycle checkpoints
//!
//! Every sweep iterates a snapshot of the registry and skips hooks that
//! were unregistered since, or that bypass the current request. Hook
//! errors and panics are reported and never stop the sweep.

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::FutureExt;

use super::state::{RequestConfig, ShadowState};
use super::xhr::InterceptedXhr;
use crate::hook::HookEntry;

type Outcome = std::result::Result<anyhow::Result<()>, Box<dyn Any + Send>>;

#[derive(Debug, Clone, Copy)]
enum Phase {
    Config,
    Request,
    Response,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Config => "on_config",
            Phase::Request => "on_request",
            Phase::Response => "on_response",
        }
    }
}

/// Run `on_config` of every hook against `config`
pub(crate) fn config_sweep(xhr: &InterceptedXhr, shadow: &ShadowState, config: &mut RequestConfig) {
    let catch = xhr.settings().catch_hook_panics;

    for entry in xhr.hooks().snapshot() {
        if !xhr.hooks().contains(entry.id) {
            continue;
        }
        let instance = shadow.hook_instance(entry.id);
        if instance.bypass_request() {
            continue;
        }

        let outcome = if catch {
            catch_unwind(AssertUnwindSafe(|| {
                entry.hook.on_config(&instance, xhr, config)
            }))
        } else {
            Ok(entry.hook.on_config(&instance, xhr, config))
        };
        report(xhr, &entry, Phase::Config, outcome);
    }
}

/// Run `on_request` of every hook
///
/// Returns whether a hook that is still interested in this request wants
/// to see its response.
pub(crate) async fn request_sweep(xhr: &InterceptedXhr, shadow: &ShadowState) -> bool {
    let catch = xhr.settings().catch_hook_panics;
    let mut wants_response = false;

    for entry in xhr.hooks().snapshot() {
        if !xhr.hooks().contains(entry.id) {
            continue;
        }
        let instance = shadow.hook_instance(entry.id);
        if instance.bypass_request() {
            continue;
        }

        let outcome = guarded(catch, entry.hook.on_request(&instance, xhr, &shadow.config)).await;
        report(xhr, &entry, Phase::Request, outcome);

        if entry.hook.observes_response() && !instance.bypass_request() {
            wants_response = true;
        }
    }

    wants_response
}

/// Run `on_response` of every hook observing responses
pub(crate) async fn response_sweep(xhr: &InterceptedXhr, shadow: &ShadowState) {
    let catch = xhr.settings().catch_hook_panics;

    for entry in xhr.hooks().snapshot() {
        if !entry.hook.observes_response() || !xhr.hooks().contains(entry.id) {
            continue;
        }
        let instance = shadow.hook_instance(entry.id);
        if instance.bypass_request() {
            continue;
        }

        let outcome = guarded(catch, entry.hook.on_response(&instance, xhr, &shadow.config)).await;
        report(xhr, &entry, Phase::Response, outcome);
    }
}

async fn guarded<F>(catch: bool, call: F) -> Outcome
where
    F: Future<Output = anyhow::Result<()>>,
{
    if catch {
        AssertUnwindSafe(call).catch_unwind().await
    } else {
        Ok(call.await)
    }
}

fn report(xhr: &InterceptedXhr, entry: &HookEntry, phase: Phase, outcome: Outcome) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(
                hook = entry.hook.name(),
                phase = phase.as_str(),
                instance = %xhr.id(),
                error = %e,
                "Hook failed"
            );
        }
        Err(payload) => {
            tracing::warn!(
                hook = entry.hook.name(),
                phase = phase.as_str(),
                instance = %xhr.id(),
                error = panic_message(payload.as_ref()),
                "Hook panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
