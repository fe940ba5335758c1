// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Interception engine
//!
//! - [`Interceptor`] - constructor wrapping every object it builds
//! - [`InterceptedXhr`] - decorator running hooks and serving stable state
//! - [`RequestConfig`] / [`SharedConfig`] - per-request record hooks edit
//! - [`FabricatedResponse`] - response replayed without a network exchange

mod checkpoint;
mod interceptor;
mod listeners;
mod replay;
mod serializer;
mod state;
mod xhr;

pub use interceptor::Interceptor;
pub use replay::ReplayStage;
pub use state::{DoneMarker, FabricatedResponse, InstanceId, RequestConfig, SharedConfig};
pub use xhr::InterceptedXhr;

#[cfg(test)]
mod tests;
