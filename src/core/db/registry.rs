//! Handle Registry Module
//!
//! Shared per-handle state, keyed by handle identity rather than by the
//! `Connection` value that happens to hold the handle. Every alias of a
//! handle reads and writes the same entry, so the "transaction open" flag is
//! consistent across copies and threads.
//!
//! The process-wide instance ([`Registry::global`]) is created lazily on
//! first use and lives for the rest of the process. Entries are added when a
//! handle opens and removed when its last alias closes it, so an idle
//! process carries an empty map. Tests and embedders may inject their own
//! registry through [`Connection::with_registry`](super::Connection::with_registry).

use crate::core::Result;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Identity of one open engine handle.
///
/// Ids are never reused within a registry, unlike raw handle addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State shared by all aliases of a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleState {
    /// Path the handle was opened with
    pub path: String,
    /// Whether a database-level transaction is open on the handle
    pub in_transaction: bool,
}

static GLOBAL_REGISTRY: Lazy<Arc<Registry>> = Lazy::new(|| Arc::new(Registry::new()));

/// Table of open handles, guarded by a single lock.
///
/// The lock is held only for a lookup or an update and never across an
/// engine call.
#[derive(Debug)]
pub struct Registry {
    handles: Mutex<HashMap<HandleId, HandleState>>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry {
            handles: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the process-wide registry.
    pub fn global() -> Arc<Registry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Adds a freshly opened handle with its transaction flag cleared.
    pub(crate) fn register(&self, path: &str) -> Result<HandleId> {
        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handles.lock()?.insert(
            id,
            HandleState {
                path: path.to_string(),
                in_transaction: false,
            },
        );
        Ok(id)
    }

    /// Removes a handle's entry. Called while the handle is being closed,
    /// so it must not fail: a poisoned map is still cleaned up.
    pub(crate) fn unregister(&self, id: HandleId) -> Option<HandleState> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Reads the transaction flag. Unknown handles report `false`.
    pub fn in_transaction(&self, id: HandleId) -> Result<bool> {
        Ok(self
            .handles
            .lock()?
            .get(&id)
            .map(|s| s.in_transaction)
            .unwrap_or(false))
    }

    pub(crate) fn set_in_transaction(&self, id: HandleId, open: bool) -> Result<()> {
        if let Some(state) = self.handles.lock()?.get_mut(&id) {
            state.in_transaction = open;
        }
        Ok(())
    }

    /// Whether `id` is currently open.
    pub fn contains(&self, id: HandleId) -> bool {
        self.handles
            .lock()
            .map(|h| h.contains_key(&id))
            .unwrap_or(false)
    }

    /// Snapshot of a handle's shared state.
    pub fn state(&self, id: HandleId) -> Option<HandleState> {
        self.handles.lock().ok()?.get(&id).cloned()
    }

    /// Number of handles currently open through this registry.
    pub fn open_handles(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }
}
