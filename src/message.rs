//! The message envelope (spec.md §3) and its JSON wire codec.
//!
//! The codec is a pluggable collaborator in the spec — the core only
//! needs `encode`/`decode` functions and the envelope fields below. This
//! module provides the JSON implementation the rest of the crate uses,
//! adapted from the teacher's length-delimited `Frame` split in
//! `socket/framing.rs` (there the wire type is a custom binary frame;
//! here it is a JSON document, since the transport — a WebSocket — already
//! provides message framing).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BrokerError;

/// A single append-only record of broker-internal processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    pub stage: String,
    pub timestamp: DateTime<Utc>,
}

impl Hop {
    pub fn now(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The authoritative message envelope (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender: String,
    pub targets: Vec<String>,
    pub message_type: String,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub destination_report: bool,
    #[serde(default)]
    pub hops: Vec<Hop>,
    #[serde(default)]
    pub data: serde_json::Value,

    /// Internal field set once a target has been expanded out of a
    /// wildcard/literal pattern; not part of the wire envelope a client
    /// sends, but present on every clone submitted to the delivery pool
    /// (spec.md §4.4 step 3: "clone the message with an internal field
    /// `_target`").
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<String>,
}

impl Message {
    /// Construct a broker-originated message (`sender` is always the
    /// broker's own identity for these).
    pub fn new_broker_originated(
        sender: impl Into<String>,
        target: impl Into<String>,
        message_type: impl Into<String>,
        expires: DateTime<Utc>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            targets: vec![target.into()],
            message_type: message_type.into(),
            expires,
            destination_report: false,
            hops: Vec::new(),
            data,
            target: None,
        }
    }

    pub fn append_hop(&mut self, stage: impl Into<String>) {
        self.hops.push(Hop::now(stage));
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Clone this message for delivery to a single expanded target,
    /// stamping the internal `_target` field (spec.md §4.4 step 3).
    pub fn clone_for_target(&self, target: &str) -> Self {
        let mut clone = self.clone();
        clone.target = Some(target.to_string());
        clone
    }

    pub fn encode(&self) -> Vec<u8> {
        // Only fails if `Message` contains non-serializable data, which
        // cannot happen for a type built entirely from serde-derived
        // fields and a `serde_json::Value` payload.
        serde_json::to_vec(self).expect("message envelope is always serializable")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BrokerError> {
        serde_json::from_slice(bytes).map_err(|e| BrokerError::ValidationFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> Message {
        Message {
            id: Uuid::new_v4(),
            sender: "cth://agent-1/agent".into(),
            targets: vec!["cth://agent-2/agent".into()],
            message_type: "cth://example.com/test".into(),
            expires: Utc::now() + Duration::seconds(60),
            destination_report: false,
            hops: Vec::new(),
            data: serde_json::json!({"k": "v"}),
            target: None,
        }
    }

    #[test]
    fn round_trips_modulo_hops() {
        let mut m = sample();
        let encoded = m.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, m);

        m.append_hop("accept-to-queue");
        let encoded2 = m.encode();
        let decoded2 = Message::decode(&encoded2).unwrap();
        assert_eq!(decoded2.hops.len(), 1);
    }

    #[test]
    fn expiry_check_uses_strict_greater_than() {
        let mut m = sample();
        m.expires = Utc::now() - Duration::seconds(1);
        assert!(m.is_expired());

        m.expires = Utc::now() + Duration::seconds(60);
        assert!(!m.is_expired());
    }

    #[test]
    fn clone_for_target_stamps_internal_field_without_mutating_original() {
        let m = sample();
        let clone = m.clone_for_target("cth://agent-3/agent");
        assert_eq!(clone.target.as_deref(), Some("cth://agent-3/agent"));
        assert!(m.target.is_none());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Message::decode(b"not json").is_err());
    }
}
