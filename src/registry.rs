//! C3: the connection registry (spec.md §4.3) — `session → ConnectionState`
//! and `uri → session`, held under a single logical lock domain so that
//! `bind`, `remove`, and `lookup` are linearizable with respect to each
//! other.
//!
//! Grounded on the teacher's `client/registry.rs` `HashMap`-backed CRUD
//! shape, generalized from a single map to the bijection spec.md §4.3
//! requires, and on `channel/mod.rs`'s `ConnectionState`-like state
//! tracking for the per-session fields.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::inventory::Inventory;
use crate::session::{ConnectionState, Session, SessionEntry, SessionId, SessionStatus};
use crate::uri::Uri;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Bound(Uri),
    AlreadyLoggedIn,
    UriTaken(Uri),
}

struct RegistryInner {
    sessions: HashMap<SessionId, SessionEntry>,
    uris: HashMap<Uri, SessionId>,
}

pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    inventory: Arc<Inventory>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(inventory: Arc<Inventory>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                sessions: HashMap::new(),
                uris: HashMap::new(),
            }),
            inventory,
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("connection registry lock poisoned")
    }

    /// Insert a freshly-accepted session in `status = connected`.
    pub fn add(&self, session: Arc<dyn Session>, common_name: impl Into<String>) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = SessionEntry::new(session, common_name);
        self.lock().sessions.insert(id, entry);
        id
    }

    /// Remove a session. If it was bound, unbinds the URI and forgets it
    /// from the inventory atomically with the session removal (I1).
    pub fn remove(&self, session_id: SessionId) {
        let mut inner = self.lock();
        if let Some(entry) = inner.sessions.remove(&session_id) {
            if let Some(uri) = entry.state.uri {
                inner.uris.remove(&uri);
                drop(inner);
                self.inventory.forget(&uri);
            }
        }
    }

    /// Complete the login handshake for `session_id`, binding it to
    /// `<scheme>://<common_name>/<type_>`.
    pub fn bind(&self, session_id: SessionId, type_: &str, scheme: &str) -> Option<BindOutcome> {
        let mut inner = self.lock();
        let common_name = inner.sessions.get(&session_id)?.state.common_name.clone();

        if inner.sessions.get(&session_id)?.state.status == SessionStatus::Ready {
            return Some(BindOutcome::AlreadyLoggedIn);
        }

        let uri = Uri::new(scheme, common_name, type_);
        if inner.uris.contains_key(&uri) {
            return Some(BindOutcome::UriTaken(uri));
        }

        let entry = inner.sessions.get_mut(&session_id)?;
        entry.state.status = SessionStatus::Ready;
        entry.state.type_ = type_.to_string();
        entry.state.uri = Some(uri.clone());
        inner.uris.insert(uri.clone(), session_id);
        drop(inner);
        self.inventory.record(uri.clone());
        Some(BindOutcome::Bound(uri))
    }

    pub fn lookup(&self, uri: &Uri) -> Option<SessionId> {
        self.lock().uris.get(uri).copied()
    }

    /// Snapshot of every currently live session id, for shutdown sweeps.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.lock().sessions.keys().copied().collect()
    }

    pub fn state(&self, session_id: SessionId) -> Option<ConnectionState> {
        self.lock().sessions.get(&session_id).map(|e| e.state.clone())
    }

    pub fn session_handle(&self, session_id: SessionId) -> Option<Arc<dyn Session>> {
        self.lock().sessions.get(&session_id).map(|e| e.session.clone())
    }

    /// The leaf write lock attached to this session's `ConnectionState`
    /// (spec.md §9) — acquired by the delivery pool, never by this
    /// registry itself.
    pub fn write_lock(&self, session_id: SessionId) -> Option<Arc<tokio::sync::Mutex<()>>> {
        self.lock().sessions.get(&session_id).map(|e| e.write_lock.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
