// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! # xhproxy - XMLHttpRequest Interception Engine
//!
//! Wraps the request constructor of an execution context so that hooks can
//! inspect, rewrite, block or fully fabricate requests and responses, while
//! consumers keep seeing a well-ordered, browser-faithful event stream.
//!
//! ## Features
//!
//! - Three checkpoints per request: `on_config`, `on_request`, `on_response`
//! - Per-instance FIFO: ready-state handlers never overlap
//! - Stable terminal state: repeated reads after completion never change
//! - Synthetic responses replayed through the full event sequence
//! - Network blocking through an inert data URI
//! - Real HTTP transport on reqwest, scripted transport for tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xhproxy::{hook, FabricatedResponse, MockResponder, Xhr};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handle = hook(Arc::new(
//!         MockResponder::new().route("/health", FabricatedResponse::text("up")),
//!     ))?;
//!
//!     let xhr = xhproxy::ExecutionContext::global().create()?;
//!     xhr.open("GET", "https://example.com/health", true, None, None)?;
//!     xhr.send(None).await?;
//!
//!     handle.unhook();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod hook;
pub mod intercept;
pub mod transport;

// Re-exports for convenience

// Registration
pub use context::{hook, hook_in, unhook, unhook_in, ExecutionContext, HookHandle};

// Configuration
pub use config::{InterceptorConfig, NETWORK_BLOCK_URL};

// Errors
pub use error::{Error, ErrorContext, Result};

// Events
pub use event::{listener, EventKind, EventTarget, Listener, XhrEvent};

// Hooks
pub use hook::{HookId, HookInstance, HookRegistry, XhrHook};
pub use hook::{HeaderInjector, MockResponder, NetworkBlocker, RecordedRequest, RequestRecorder};

// Interception
pub use intercept::{
    DoneMarker, FabricatedResponse, InstanceId, InterceptedXhr, Interceptor, ReplayStage,
    RequestConfig, SharedConfig,
};

// Transports
pub use transport::{HttpXhr, HttpXhrConfig, HttpXhrConstructor};
pub use transport::{ReadyState, ResponseType, ResponseValue, Xhr, XhrConstructor};
pub use transport::{ScriptedXhr, ScriptedXhrConstructor, TransportCall};

/// xhproxy version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
