// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Identity map between consumer listeners and their wrappers

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::event::{listener_key, EventKind, Listener};

/// How a listener for an event kind is wrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WrapMode {
    /// Serialized, may trigger the response sweep
    ReadyState,
    /// Serialized
    Serialized,
    /// Forwarded immediately
    Direct,
}

impl WrapMode {
    /// `None` for events passed through unwrapped
    pub fn for_kind(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::ReadyStateChange => Some(WrapMode::ReadyState),
            EventKind::Load | EventKind::LoadEnd => Some(WrapMode::Serialized),
            EventKind::Progress => Some(WrapMode::Direct),
            EventKind::LoadStart | EventKind::Abort | EventKind::Error | EventKind::Timeout => None,
        }
    }
}

#[derive(Default)]
struct Maps {
    wrappers: HashMap<(EventKind, usize), Listener>,
    originals: HashMap<usize, Listener>,
}

/// Bidirectional listener/wrapper association of one instance
#[derive(Default)]
pub(crate) struct ListenerMap {
    maps: Mutex<Maps>,
}

impl ListenerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrapper for `original`, built by `wrap` the first time
    ///
    /// Wrapping the same listener twice yields the same wrapper, so the
    /// event target's duplicate check keeps working.
    pub fn wrapper_for(
        &self,
        kind: EventKind,
        original: &Listener,
        wrap: impl FnOnce() -> Listener,
    ) -> Listener {
        let key = (kind, listener_key(original));
        let mut maps = self.maps.lock();
        if let Some(existing) = maps.wrappers.get(&key) {
            return existing.clone();
        }

        let wrapper = wrap();
        maps.wrappers.insert(key, wrapper.clone());
        maps.originals
            .insert(listener_key(&wrapper), original.clone());
        wrapper
    }

    /// Wrapper previously built for `original`
    pub fn wrapped(&self, kind: EventKind, original: &Listener) -> Option<Listener> {
        self.maps
            .lock()
            .wrappers
            .get(&(kind, listener_key(original)))
            .cloned()
    }

    /// Drop the association built for `original`
    pub fn forget(&self, kind: EventKind, original: &Listener) -> Option<Listener> {
        let mut maps = self.maps.lock();
        let wrapper = maps.wrappers.remove(&(kind, listener_key(original)))?;
        maps.originals.remove(&listener_key(&wrapper));
        Some(wrapper)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.maps.lock().wrappers.len()
    }

    /// Consumer listener behind `wrapper`
    pub fn original_of(&self, wrapper: &Listener) -> Option<Listener> {
        self.maps
            .lock()
            .originals
            .get(&listener_key(wrapper))
            .cloned()
    }
}
