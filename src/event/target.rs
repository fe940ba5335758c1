// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Event target: listener bookkeeping and dispatch

use std::panic::{catch_unwind, AssertUnwindSafe};

use parking_lot::RwLock;

use super::{listener_key, EventKind, Listener, XhrEvent};

struct Entry {
    kind: EventKind,
    listener: Listener,
    /// Occupied by an `on<event>` attribute rather than `add_event_listener`
    handler: bool,
}

/// Listener registry for one request object
///
/// Listeners run in registration order. A handler attribute keeps the
/// position it had when first set, like the DOM does.
#[derive(Default)]
pub struct EventTarget {
    entries: RwLock<Vec<Entry>>,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; registering the same listener twice is a no-op
    pub fn add_listener(&self, kind: EventKind, listener: Listener) {
        let key = listener_key(&listener);
        let mut entries = self.entries.write();
        let duplicate = entries
            .iter()
            .any(|e| !e.handler && e.kind == kind && listener_key(&e.listener) == key);
        if !duplicate {
            entries.push(Entry {
                kind,
                listener,
                handler: false,
            });
        }
    }

    /// Remove a listener, returns whether it was registered
    pub fn remove_listener(&self, kind: EventKind, listener: &Listener) -> bool {
        let key = listener_key(listener);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.handler || e.kind != kind || listener_key(&e.listener) != key);
        entries.len() != before
    }

    /// Whether `listener` is registered for `kind` (handler slot excluded)
    pub fn contains(&self, kind: EventKind, listener: &Listener) -> bool {
        let key = listener_key(listener);
        self.entries
            .read()
            .iter()
            .any(|e| !e.handler && e.kind == kind && listener_key(&e.listener) == key)
    }

    /// Set or clear the handler attribute for `kind`
    pub fn set_handler(&self, kind: EventKind, handler: Option<Listener>) {
        let mut entries = self.entries.write();
        let slot = entries.iter().position(|e| e.handler && e.kind == kind);

        match (slot, handler) {
            (Some(i), Some(listener)) => entries[i].listener = listener,
            (Some(i), None) => {
                entries.remove(i);
            }
            (None, Some(listener)) => entries.push(Entry {
                kind,
                listener,
                handler: true,
            }),
            (None, None) => {}
        }
    }

    /// Current handler attribute for `kind`
    pub fn handler(&self, kind: EventKind) -> Option<Listener> {
        self.entries
            .read()
            .iter()
            .find(|e| e.handler && e.kind == kind)
            .map(|e| e.listener.clone())
    }

    /// Number of listeners (handler included) for `kind`
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.entries.read().iter().filter(|e| e.kind == kind).count()
    }

    /// Deliver `event` to its listeners, returns how many were invoked
    ///
    /// The listener list is snapshotted first, so listeners may add or
    /// remove listeners while being called. A panicking listener is
    /// reported and does not stop delivery to the rest. Fabricated events
    /// reach listeners as trusted ones.
    pub fn dispatch(&self, event: &XhrEvent) -> usize {
        let event = &event.presented();
        let listeners: Vec<Listener> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.kind == event.kind)
            .map(|e| e.listener.clone())
            .collect();

        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(event = %event.kind, "Event listener panicked");
            }
        }

        listeners.len()
    }

    /// Drop every listener and handler
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
