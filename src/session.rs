//! The opaque socket handle the core talks to, and the per-session state
//! record the registry keeps beside it (spec.md §3's `ConnectionState`).
//!
//! `Session` is modeled on the teacher's `Channel` trait
//! (`channel/mod.rs`): a small async surface over a transport the core
//! never touches directly.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::BrokerError;
use crate::uri::Uri;

#[async_trait]
pub trait Session: Send + Sync {
    /// Write one fully-encoded message as a single unit. Implementations
    /// must not interleave bytes from concurrent calls; the delivery pool
    /// additionally serializes calls through the per-session write lock
    /// (spec.md §4.5), so a correct transport only needs to guarantee
    /// atomicity of a single `send`.
    async fn send(&self, bytes: Vec<u8>) -> Result<(), BrokerError>;

    async fn close(&self);

    /// Identity string extracted from the peer's TLS client certificate;
    /// immutable for the lifetime of the session.
    fn common_name(&self) -> &str;
}

/// Opaque handle identifying a live session inside the registry. Assigned
/// by `ConnectionRegistry::add` and otherwise meaningless — it exists so
/// the registry can key maps without requiring `Session` trait objects to
/// be `Eq`/`Hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connected,
    Ready,
    Closing,
}

#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub common_name: String,
    pub type_: String,
    pub status: SessionStatus,
    pub uri: Option<Uri>,
    pub created_at: Instant,
}

impl ConnectionState {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            type_: "undefined".to_string(),
            status: SessionStatus::Connected,
            uri: None,
            created_at: Instant::now(),
        }
    }
}

/// A session's `ConnectionState` plus the leaf write lock attached to it
/// (spec.md §9: "reimplement as a mutex attached to each ConnectionState;
/// do not reuse the registry lock").
pub struct SessionEntry {
    pub session: Arc<dyn Session>,
    pub state: ConnectionState,
    pub write_lock: Arc<Mutex<()>>,
}

impl SessionEntry {
    pub fn new(session: Arc<dyn Session>, common_name: impl Into<String>) -> Self {
        Self {
            session,
            state: ConnectionState::new(common_name),
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}
