//! C6: the delivery worker pool (spec.md §4.5).
//!
//! A fixed set of workers drains an in-process task channel — this is
//! distinct from the durable accept/redeliver queues in `queue.rs`; it
//! only ever holds already-expanded, single-target delivery tasks and
//! does not need to survive a restart. Grounded on the teacher's
//! `broker/mod.rs` reader-loop (one task per unit of concurrency, shared
//! state re-wired under a lock) and `socket/client_conn.rs`'s write task
//! for "never interleave writes to one session".

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::message::Message;
use crate::queue::EnqueueOptions;
use crate::uri::Uri;

pub struct DeliveryPool {
    sender: mpsc::UnboundedSender<Message>,
}

impl DeliveryPool {
    pub fn start(broker: Arc<Broker>, worker_count: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(AsyncMutex::new(receiver));

        for worker in 0..worker_count {
            let receiver = receiver.clone();
            let broker = broker.clone();
            tokio::spawn(async move {
                loop {
                    let message = {
                        let mut guard = receiver.lock().await;
                        guard.recv().await
                    };
                    match message {
                        Some(message) => deliver(&broker, message).await,
                        None => break,
                    }
                }
                debug!("[delivery] worker {worker} exiting: channel closed");
            });
        }

        Self { sender }
    }

    /// Submit one already-expanded, single-target delivery task.
    pub fn submit(&self, message: Message) {
        // A closed channel means every worker has exited, which only
        // happens once the broker itself is shutting down.
        let _ = self.sender.send(message);
    }
}

/// Hand a message to the running delivery pool. Called by the accept
/// consumer after target expansion, and by the redeliver consumer
/// (without re-expansion — the target is already fixed).
pub async fn submit(broker: &Arc<Broker>, message: Message) {
    match broker.delivery_pool() {
        Some(pool) => pool.submit(message),
        None => warn!("[delivery] submit called before the delivery pool started; dropping"),
    }
}

pub async fn redeliver(broker: &Arc<Broker>, message: Message) {
    submit(broker, message).await;
}

async fn deliver(broker: &Arc<Broker>, mut message: Message) {
    // A task can sit behind other work on the delivery pool's channel
    // long enough for its message to expire before this runs; re-check
    // here rather than trusting the ingress/accept-time checks (spec.md
    // I6 / P2).
    if message.is_expired_at(Utc::now()) {
        warn!("[delivery] dropping message {}: {}", message.id, BrokerError::Expired);
        return;
    }

    let Some(target) = message.target.clone() else {
        warn!("[delivery] task has no resolved target; dropping");
        return;
    };
    let Some(uri) = Uri::parse(&target) else {
        warn!("[delivery] resolved target {target} is not a valid uri; dropping");
        return;
    };

    let Some(session_id) = broker.registry.lookup(&uri) else {
        delivery_failure(broker, message, BrokerError::TargetNotConnected(uri)).await;
        return;
    };
    let (Some(session), Some(write_lock)) = (
        broker.registry.session_handle(session_id),
        broker.registry.write_lock(session_id),
    ) else {
        delivery_failure(broker, message, BrokerError::TargetNotConnected(uri)).await;
        return;
    };

    message.append_hop("deliver");
    let encoded = message.encode();

    // The write lock is scoped to exactly this block and released on
    // every exit path — including the early return on a transport error
    // below — by `MutexGuard`'s `Drop`.
    let send_result = {
        let _guard = write_lock.lock().await;
        scopeguard::defer! {
            debug!("[delivery] write lock released for {}", uri);
        }
        session.send(encoded).await
    };

    match send_result {
        Ok(()) => info!("[delivery] delivered to {uri}"),
        Err(e) => {
            warn!("[delivery] transport write to {uri} failed: {e}");
            delivery_failure(broker, message, e).await;
        }
    }
}

async fn delivery_failure(broker: &Arc<Broker>, mut message: Message, reason: BrokerError) {
    let now = Utc::now();
    if now >= message.expires {
        info!("[delivery] dropping message {} after delivery failure ({reason}): expired", message.id);
        return;
    }

    let remaining_secs = (message.expires - now).num_seconds().max(0);
    let retry_delay = compute_retry_delay(remaining_secs, broker.config.message_ttl_floor_secs);
    message.append_hop("redelivery");
    info!("[delivery] delivery failed ({reason}); retrying message {} in {retry_delay}s", message.id);
    broker
        .queue
        .enqueue("redeliver", message, EnqueueOptions::delayed(retry_delay))
        .await;
}

/// Halve the remaining time-to-live, never going below `floor_secs`
/// (spec.md §4.5 and §9: "deliberately aggressive near expiry; preserve
/// it").
fn compute_retry_delay(remaining_secs: i64, floor_secs: i64) -> u64 {
    (remaining_secs / 2).max(floor_secs).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_remaining_ttl() {
        assert_eq!(compute_retry_delay(4, 1), 2);
        assert_eq!(compute_retry_delay(2, 1), 1);
    }

    #[test]
    fn never_drops_below_the_floor() {
        assert_eq!(compute_retry_delay(1, 1), 1);
        assert_eq!(compute_retry_delay(0, 1), 1);
    }

    #[test]
    fn respects_a_configured_floor_above_one_second() {
        assert_eq!(compute_retry_delay(4, 3), 3);
        assert_eq!(compute_retry_delay(10, 3), 5);
    }
}
