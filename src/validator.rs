//! C4: envelope and control-body schema checks (spec.md §4.4 step 1, §6).
//!
//! Body shapes mirror the teacher's small serde-derived payload structs
//! (e.g. `broker/protocol.rs`'s `FdTransferPayload`) — a plain struct per
//! wire schema, decoded out of the envelope's opaque `data` field.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BrokerError;
use crate::message::Message;

pub fn login_schema(scheme: &str) -> String {
    format!("{scheme}://schemas/loginschema")
}

pub fn inventory_schema(scheme: &str) -> String {
    format!("{scheme}://schemas/inventoryschema")
}

pub fn inventory_response_schema(scheme: &str) -> String {
    format!("{scheme}://schemas/inventoryresponseschema")
}

pub fn destination_report_schema(scheme: &str) -> String {
    format!("{scheme}://schemas/destination_report")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginBody {
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryBody {
    pub query: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryResponseBody {
    pub uris: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationReportBody {
    pub id: Uuid,
    pub targets: Vec<String>,
}

/// Envelope-level checks that apply regardless of `message_type`: a
/// message must name at least one target and a non-empty schema.
pub fn validate_envelope(message: &Message) -> Result<(), BrokerError> {
    if message.targets.is_empty() {
        return Err(BrokerError::ValidationFailed("targets must not be empty".to_string()));
    }
    if message.message_type.is_empty() {
        return Err(BrokerError::ValidationFailed("message_type must not be empty".to_string()));
    }
    if message.sender.is_empty() {
        return Err(BrokerError::ValidationFailed("sender must not be empty".to_string()));
    }
    Ok(())
}

pub fn parse_login_body(message: &Message) -> Result<LoginBody, BrokerError> {
    serde_json::from_value(message.data.clone())
        .map_err(|e| BrokerError::ValidationFailed(format!("login body: {e}")))
}

pub fn parse_inventory_body(message: &Message) -> Result<InventoryBody, BrokerError> {
    serde_json::from_value(message.data.clone())
        .map_err(|e| BrokerError::ValidationFailed(format!("inventory body: {e}")))
}
