//! C5: target expansion and enqueue-to-accept (spec.md §4.4).
//!
//! Grounded on `hub/client_routing.rs`'s dispatch-by-target shape and
//! `socket/server.rs`'s accept-loop-hands-off-to-owner pattern, adapted
//! from "forward an event to the hub" to "enqueue a message for the
//! accept consumers".

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{debug, warn};

use crate::broker::Broker;
use crate::delivery;
use crate::message::Message;
use crate::queue::EnqueueOptions;
use crate::server_handler;

/// `Router.accept(msg)`: append the queueing hop and enqueue. Returns as
/// soon as the enqueue completes; the accept consumer does the actual
/// target expansion.
pub async fn accept(broker: &Arc<Broker>, mut message: Message) {
    message.append_hop("accept-to-queue");
    let started = Instant::now();
    broker.queue.enqueue("accept", message, EnqueueOptions::immediate()).await;
    debug!("[router] accept-queue insertion took {:?}", started.elapsed());
}

/// Invoked once per message dequeued from **accept**. A message can sit
/// in the queue long enough to expire before this runs, so expiry is
/// re-checked here rather than trusting the ingress-time check (spec.md
/// I6 / P2: an expired message must never reach a destination).
pub async fn handle_accept(broker: &Arc<Broker>, message: Message) {
    if message.is_expired_at(Utc::now()) {
        warn!("[router] dropping expired message {} dequeued from accept", message.id);
        return;
    }

    let targets_expanded = broker.inventory.find(&message.targets);

    if message.destination_report {
        let report = server_handler::build_destination_report(broker, &message, &targets_expanded);
        broker.ingress(None, report).await;
    }

    for target in &targets_expanded {
        let clone = message.clone_for_target(target);
        delivery::submit(broker, clone).await;
    }
}
