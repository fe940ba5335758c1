// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Ordered set of registered hooks

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::XhrHook;

/// Stable identity of a registered hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

impl HookId {
    #[cfg(test)]
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hook_{}", self.0)
    }
}

/// A registered hook
#[derive(Clone)]
pub struct HookEntry {
    pub id: HookId,
    pub hook: Arc<dyn XhrHook>,
}

/// Registry of hooks, iterated in registration order at every checkpoint
///
/// Iteration works on a snapshot, so hooks may be added or removed while a
/// checkpoint is running.
pub struct HookRegistry {
    entries: RwLock<Vec<HookEntry>>,
    next_id: AtomicU64,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a hook; registering the same object again returns its existing id
    pub fn register(&self, hook: Arc<dyn XhrHook>) -> HookId {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.iter().find(|e| same_hook(&e.hook, &hook)) {
            return existing.id;
        }

        let id = HookId(self.next_id.fetch_add(1, Ordering::SeqCst));
        tracing::debug!(hook = %id, name = hook.name(), "Hook registered");
        entries.push(HookEntry { id, hook });
        id
    }

    /// Remove a hook, returns whether it was registered
    pub fn unregister(&self, id: HookId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if removed {
            tracing::debug!(hook = %id, "Hook unregistered");
        }
        removed
    }

    /// Remove a hook by object identity
    pub fn unregister_hook(&self, hook: &Arc<dyn XhrHook>) -> bool {
        let id = self
            .entries
            .read()
            .iter()
            .find(|e| same_hook(&e.hook, hook))
            .map(|e| e.id);
        id.map(|id| self.unregister(id)).unwrap_or(false)
    }

    /// Whether the hook is still registered
    pub fn contains(&self, id: HookId) -> bool {
        self.entries.read().iter().any(|e| e.id == id)
    }

    /// Registered hooks in registration order
    pub fn snapshot(&self) -> Vec<HookEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove every hook
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

fn same_hook(a: &Arc<dyn XhrHook>, b: &Arc<dyn XhrHook>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
