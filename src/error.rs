//! Per-message and per-session faults.
//!
//! Hand-rolled, not `thiserror`-derived, matching the teacher's own
//! `channel::ChannelError` — a manual `Display` plus a bare
//! `impl std::error::Error`. Bootstrap/CLI failures use `anyhow` instead;
//! see `main.rs`.

use std::fmt;

use crate::uri::Uri;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The message's `expires` timestamp is at or before now.
    Expired,
    /// A peer sent a non-login message before completing the login
    /// handshake.
    NotReady,
    /// Envelope or body failed schema validation.
    ValidationFailed(String),
    /// The resolved target has no live session in the registry.
    TargetNotConnected(Uri),
    /// Writing the encoded frame to the session's transport failed.
    TransportWrite(String),
    /// A session attempted to bind a second URI after already logging in.
    DuplicateLogin,
    /// The requested URI is already bound to a different session.
    UriTaken(Uri),
    /// A message addressed to the server named a `message_type` the
    /// server-message handler does not recognize.
    UnknownServerMessageType(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Expired => write!(f, "message expired"),
            BrokerError::NotReady => write!(f, "session has not completed login"),
            BrokerError::ValidationFailed(reason) => write!(f, "validation failed: {reason}"),
            BrokerError::TargetNotConnected(uri) => write!(f, "target not connected: {uri}"),
            BrokerError::TransportWrite(reason) => write!(f, "transport write failed: {reason}"),
            BrokerError::DuplicateLogin => write!(f, "session already logged in"),
            BrokerError::UriTaken(uri) => write!(f, "uri already bound: {uri}"),
            BrokerError::UnknownServerMessageType(t) => write!(f, "unknown server message type: {t}"),
        }
    }
}

impl std::error::Error for BrokerError {}
