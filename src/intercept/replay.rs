// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Synthetic replay of a fabricated response
//!
//! Walks the request through the same event sequence a real exchange
//! produces, pausing between stages so consumers awaiting one event see
//! the next one arrive later, as they would from a network.

use std::time::Duration;

use tokio::runtime::Handle;

use super::state::{DoneMarker, FabricatedResponse, ShadowState};
use super::xhr::InterceptedXhr;
use crate::error::{Error, Result};
use crate::event::{EventKind, XhrEvent};
use crate::transport::{reason_phrase, ReadyState};

/// Stage of a synthetic replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStage {
    Start,
    HeadersReceived,
    Loading,
    Progress,
    Done,
    Load,
    LoadEnd,
}

impl ReplayStage {
    /// Following stage, `None` after `LoadEnd`
    pub fn next(self) -> Option<Self> {
        match self {
            ReplayStage::Start => Some(ReplayStage::HeadersReceived),
            ReplayStage::HeadersReceived => Some(ReplayStage::Loading),
            ReplayStage::Loading => Some(ReplayStage::Progress),
            ReplayStage::Progress => Some(ReplayStage::Done),
            ReplayStage::Done => Some(ReplayStage::Load),
            ReplayStage::Load => Some(ReplayStage::LoadEnd),
            ReplayStage::LoadEnd => None,
        }
    }

    /// Event emitted by this stage
    pub fn event_kind(self) -> EventKind {
        match self {
            ReplayStage::Start => EventKind::LoadStart,
            ReplayStage::HeadersReceived | ReplayStage::Loading | ReplayStage::Done => {
                EventKind::ReadyStateChange
            }
            ReplayStage::Progress => EventKind::Progress,
            ReplayStage::Load => EventKind::Load,
            ReplayStage::LoadEnd => EventKind::LoadEnd,
        }
    }

    /// Snapshot reported from this stage on, `None` keeps the previous one
    pub fn snapshot(self, status: u16) -> Option<(ReadyState, u16)> {
        match self {
            ReplayStage::Start | ReplayStage::Progress => None,
            ReplayStage::HeadersReceived => Some((ReadyState::HeadersReceived, status)),
            ReplayStage::Loading => Some((ReadyState::Loading, status)),
            ReplayStage::Done | ReplayStage::Load | ReplayStage::LoadEnd => {
                Some((ReadyState::Done, status))
            }
        }
    }
}

/// Replay `response` on `xhr` without touching its transport's `send`
pub(crate) async fn run(
    xhr: &InterceptedXhr,
    shadow: &ShadowState,
    response: FabricatedResponse,
) -> Result<()> {
    let delay = xhr.settings().replay_step_delay;
    let status_text = response
        .status_text
        .clone()
        .or_else(|| xhr.settings().replay_status_text.clone())
        .unwrap_or_else(|| reason_phrase(response.status).to_string());
    let body_len = response.body_len();

    tracing::debug!(
        instance = %xhr.id(),
        status = response.status,
        "Replaying fabricated response"
    );

    let mut stage = Some(ReplayStage::Start);
    while let Some(current) = stage {
        if shadow.lifecycle.lock().abort_requested {
            abort(xhr, shadow).await;
            return Err(Error::Aborted);
        }

        {
            let mut lifecycle = shadow.lifecycle.lock();
            match current {
                ReplayStage::HeadersReceived => {
                    lifecycle.overrides.status_text = Some(status_text.clone());
                    lifecycle.overrides.headers = Some(response.headers.clone());
                }
                ReplayStage::Done => {
                    lifecycle.overrides.response_type = Some(response.response_type);
                    lifecycle.overrides.response = Some(response.response.clone());
                    lifecycle.overrides.response_text = Some(response.response_text.clone());
                }
                _ => {}
            }
        }
        if let Some((ready_state, status)) = current.snapshot(response.status) {
            set_snapshot(shadow, ready_state, status);
        }

        let event = match current {
            ReplayStage::Progress => XhrEvent::synthetic_progress(body_len, body_len),
            _ => XhrEvent::synthetic(current.event_kind()),
        };
        emit(xhr, &event).await;

        stage = current.next();
        if stage.is_some() {
            pause(delay).await;
        }
    }

    Ok(())
}

/// Abort sequence: terminal state with status 0, readystatechange, abort and loadend
///
/// Also used when an abort lands before the request reached the transport,
/// which then has nothing in flight to report.
pub(crate) async fn abort(xhr: &InterceptedXhr, shadow: &ShadowState) {
    tracing::debug!(instance = %xhr.id(), "Request aborted");

    set_snapshot(shadow, ReadyState::Done, 0);
    emit(xhr, &XhrEvent::synthetic(EventKind::ReadyStateChange)).await;
    emit(xhr, &XhrEvent::synthetic(EventKind::Abort)).await;
    emit(xhr, &XhrEvent::synthetic(EventKind::LoadEnd)).await;
    set_snapshot(shadow, ReadyState::Unsent, 0);
}

fn set_snapshot(shadow: &ShadowState, ready_state: ReadyState, status: u16) {
    {
        let mut lifecycle = shadow.lifecycle.lock();
        lifecycle.marker = DoneMarker::Replaying;
        lifecycle.set_snapshot(ready_state, status);
    }
    shadow.config.update(|c| {
        c.ready_state = ready_state;
        c.status = status;
    });
}

/// Dispatch through the transport's target and wait for serialized listeners
async fn emit(xhr: &InterceptedXhr, event: &XhrEvent) {
    xhr.transport().event_target().dispatch(event);
    xhr.settled().await;
}

async fn pause(delay: Option<Duration>) {
    match delay {
        Some(d) if Handle::try_current().is_ok() => tokio::time::sleep(d).await,
        Some(d) => std::thread::sleep(d),
        None => tokio::task::yield_now().await,
    }
}
