//! C7: the server-directed control protocol (spec.md §4.4): login and
//! inventory query, plus response synthesis for both the inventory query
//! reply and the destination report the router requests.

use std::sync::Arc;

use log::{error, info, warn};

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::message::Message;
use crate::registry::BindOutcome;
use crate::session::SessionId;
use crate::uri;
use crate::validator::{
    self, DestinationReportBody, InventoryResponseBody,
};

pub async fn handle(broker: &Arc<Broker>, session_id: Option<SessionId>, message: Message) {
    let Some(session_id) = session_id else {
        warn!("[server] dropping broker-originated message addressed to the server");
        return;
    };

    if message.message_type == validator::login_schema(&broker.config.scheme) {
        handle_login(broker, session_id, message).await;
    } else if message.message_type == validator::inventory_schema(&broker.config.scheme) {
        handle_inventory(broker, session_id, message).await;
    } else {
        let err = BrokerError::UnknownServerMessageType(message.message_type.clone());
        warn!("[server] {err}");
    }
}

async fn handle_login(broker: &Arc<Broker>, session_id: SessionId, message: Message) {
    let body = match validator::parse_login_body(&message) {
        Ok(body) => body,
        Err(e) => {
            warn!("[server] login validation failed: {e}");
            return;
        }
    };

    match broker.registry.bind(session_id, &body.type_, &broker.config.scheme) {
        Some(BindOutcome::Bound(uri)) => {
            info!("[server] session bound to {uri}");
        }
        Some(BindOutcome::AlreadyLoggedIn) => {
            error!("[server] rejecting login: {}", BrokerError::DuplicateLogin);
            close_new_session(broker, session_id).await;
        }
        Some(BindOutcome::UriTaken(uri)) => {
            error!("[server] rejecting login: {}", BrokerError::UriTaken(uri));
            close_new_session(broker, session_id).await;
        }
        None => {
            warn!("[server] login attempted on an unknown session");
        }
    }
}

async fn close_new_session(broker: &Arc<Broker>, session_id: SessionId) {
    if let Some(session) = broker.registry.session_handle(session_id) {
        session.close().await;
    }
    broker.registry.remove(session_id);
}

async fn handle_inventory(broker: &Arc<Broker>, session_id: SessionId, message: Message) {
    let body = match validator::parse_inventory_body(&message) {
        Ok(body) => body,
        Err(e) => {
            warn!("[server] inventory validation failed: {e}");
            return;
        }
    };

    let Some(state) = broker.registry.state(session_id) else {
        return;
    };
    let Some(self_uri) = state.uri else {
        warn!("[server] inventory query from a session that has not logged in");
        return;
    };

    let uris = broker.inventory.find(&body.query);
    let response = Message::new_broker_originated(
        uri::server_target(&broker.config.scheme),
        self_uri.to_string(),
        validator::inventory_response_schema(&broker.config.scheme),
        message.expires,
        serde_json::to_value(InventoryResponseBody { uris })
            .expect("inventory response body always serializes"),
    );
    broker.ingress(None, response).await;
}

/// Synthesize the broker-originated `destination_report` message the
/// router requests when `msg.destination_report` is set (spec.md §4.4
/// step 2).
pub fn build_destination_report(
    broker: &Arc<Broker>,
    message: &Message,
    targets_expanded: &[String],
) -> Message {
    Message::new_broker_originated(
        uri::server_sender(&broker.config.scheme),
        message.sender.clone(),
        validator::destination_report_schema(&broker.config.scheme),
        message.expires,
        serde_json::to_value(DestinationReportBody {
            id: message.id,
            targets: targets_expanded.to_vec(),
        })
        .expect("destination report body always serializes"),
    )
}
