//! The explicit `Broker` value (spec.md §9 design note): constructed by
//! `init`, wiring C1–C7 together in place of the source's process-wide
//! mutable globals, with a single `ingress` entry point resolving the
//! recursive dependency between message ingress and broker-originated
//! response synthesis.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use log::warn;
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::delivery::DeliveryPool;
use crate::error::BrokerError;
use crate::inventory::Inventory;
use crate::message::Message;
use crate::queue::{Handler, QueueBackend};
use crate::registry::ConnectionRegistry;
use crate::router;
use crate::server_handler;
use crate::session::SessionStatus;
pub use crate::session::SessionId;
use crate::uri;
use crate::validator;

/// Point-in-time counters for operational visibility; not a metrics
/// sink (that collaborator is out of scope, spec.md §1) — just enough
/// state for a log line or a status endpoint to report.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerStats {
    pub sessions: usize,
}

pub struct Broker {
    pub config: Config,
    pub inventory: Arc<Inventory>,
    pub registry: Arc<ConnectionRegistry>,
    pub queue: Arc<dyn QueueBackend>,
    delivery_pool: OnceCell<DeliveryPool>,
}

impl Broker {
    pub fn init(config: Config, queue: Arc<dyn QueueBackend>) -> Arc<Self> {
        let inventory = Arc::new(Inventory::new());
        let registry = Arc::new(ConnectionRegistry::new(inventory.clone()));
        Arc::new(Self {
            config,
            inventory,
            registry,
            queue,
            delivery_pool: OnceCell::new(),
        })
    }

    pub(crate) fn delivery_pool(&self) -> Option<&DeliveryPool> {
        self.delivery_pool.get()
    }

    /// Start the delivery pool and both queue consumer groups. Must be
    /// called exactly once, before any message reaches `ingress`.
    pub async fn start(self: &Arc<Self>) {
        let pool = DeliveryPool::start(self.clone(), self.config.delivery_consumers);
        // `init` never populates this cell, so `start` calling it twice
        // is the only way `set` can fail; that is a caller bug.
        self.delivery_pool
            .set(pool)
            .unwrap_or_else(|_| panic!("Broker::start called more than once"));

        let accept_broker = self.clone();
        let accept_handler: Handler = Arc::new(move |message| {
            let broker = accept_broker.clone();
            Box::pin(async move { router::handle_accept(&broker, message).await })
        });
        self.queue
            .subscribe("accept", self.config.accept_consumers, accept_handler)
            .await;

        let redeliver_broker = self.clone();
        let redeliver_handler: Handler = Arc::new(move |message| {
            let broker = redeliver_broker.clone();
            Box::pin(async move { crate::delivery::redeliver(&broker, message).await })
        });
        self.queue
            .subscribe("redeliver", self.config.delivery_consumers, redeliver_handler)
            .await;
    }

    /// The single ingress entry point (spec.md §9). `session_id = None`
    /// marks a broker-originated message (a synthesized response
    /// re-entering the pipeline); `Some` carries the originating peer
    /// session for the authentication gate.
    pub fn ingress<'a>(
        self: &'a Arc<Self>,
        session_id: Option<SessionId>,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let now = Utc::now();
            if message.is_expired_at(now) {
                warn!("[router] dropping message {}: {}", message.id, BrokerError::Expired);
                return;
            }

            if let Err(e) = validator::validate_envelope(&message) {
                warn!("[router] dropping invalid message {}: {e}", message.id);
                return;
            }

            let target0 = &message.targets[0];
            let addressed_to_server = uri::is_server_target(target0, &self.config.scheme);

            if let Some(session_id) = session_id {
                match self.registry.state(session_id) {
                    None => {
                        warn!("[router] dropping message from an unknown session");
                        return;
                    }
                    Some(state) if state.status == SessionStatus::Ready => {}
                    Some(_) => {
                        let is_login = addressed_to_server
                            && message.message_type == validator::login_schema(&self.config.scheme);
                        if !is_login {
                            warn!("[router] {}", BrokerError::NotReady);
                            return;
                        }
                    }
                }
            }

            if addressed_to_server {
                server_handler::handle(self, session_id, message).await;
            } else {
                router::accept(self, message).await;
            }
        })
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            sessions: self.registry.len(),
        }
    }

    /// Stopping the accept loop is the transport's job (it simply exits
    /// instead of spawning new connections); here we close every live
    /// session so in-flight deliveries fail cleanly into the
    /// delivery-failure path rather than hanging indefinitely.
    pub async fn shutdown(&self) {
        let ids = self.registry.session_ids();
        log::info!("[broker] shutdown: closing {} live session(s)", ids.len());
        for id in ids {
            if let Some(session) = self.registry.session_handle(id) {
                session.close().await;
            }
            self.registry.remove(id);
        }
    }
}
