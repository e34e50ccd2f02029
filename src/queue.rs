//! C2: the queue backend abstraction (spec.md §4.2) plus a non-durable
//! in-memory implementation.
//!
//! Modeled on the teacher's `#[async_trait] trait Channel` — an
//! abstraction over a collaborator the core only talks to through a
//! handful of async methods — and on `broker/mod.rs`'s one-task-per-unit-
//! of-concurrency consumer spawn. A durable backend (e.g. backed by a
//! spool directory on disk) can implement the same trait without the
//! router or delivery pool changing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Duration;

use crate::message::Message;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type Handler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    pub delay_seconds: u64,
}

impl EnqueueOptions {
    pub fn immediate() -> Self {
        Self { delay_seconds: 0 }
    }

    pub fn delayed(delay_seconds: u64) -> Self {
        Self { delay_seconds }
    }
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn enqueue(&self, queue_name: &str, message: Message, options: EnqueueOptions);

    /// Spawn `parallelism` consumers draining `queue_name`; each dequeued
    /// message is handed to a fresh invocation of `handler`.
    /// Acknowledgement is implicit on the handler future resolving.
    async fn subscribe(&self, queue_name: &str, parallelism: usize, handler: Handler);
}

struct QueueChannel {
    sender: mpsc::UnboundedSender<Message>,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<Message>>>,
}

impl Clone for QueueChannel {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

/// Non-durable in-memory queue. This is the default/dev backend; it does
/// not survive a process restart, so it does not satisfy spec.md §4.2's
/// durability expectation on its own — a production deployment is
/// expected to supply a `QueueBackend` impl backed by persistent storage.
#[derive(Default)]
pub struct InMemoryQueue {
    queues: StdMutex<HashMap<String, QueueChannel>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel_for(&self, queue_name: &str) -> QueueChannel {
        let mut queues = self.queues.lock().expect("queue table lock poisoned");
        queues
            .entry(queue_name.to_string())
            .or_insert_with(|| {
                let (sender, receiver) = mpsc::unbounded_channel();
                QueueChannel {
                    sender,
                    receiver: Arc::new(AsyncMutex::new(receiver)),
                }
            })
            .clone()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueue {
    async fn enqueue(&self, queue_name: &str, message: Message, options: EnqueueOptions) {
        let channel = self.channel_for(queue_name);
        if options.delay_seconds == 0 {
            // An unbounded channel to a still-subscribed consumer never
            // errors; a dropped receiver here means nothing is draining
            // this queue anymore, which the caller cannot meaningfully
            // recover from.
            let _ = channel.sender.send(message);
        } else {
            let delay = Duration::from_secs(options.delay_seconds);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = channel.sender.send(message);
            });
        }
    }

    async fn subscribe(&self, queue_name: &str, parallelism: usize, handler: Handler) {
        let channel = self.channel_for(queue_name);
        for _ in 0..parallelism {
            let receiver = channel.receiver.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                loop {
                    let message = {
                        let mut guard = receiver.lock().await;
                        guard.recv().await
                    };
                    match message {
                        Some(message) => handler(message).await,
                        None => break,
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::mpsc as test_mpsc;
    use uuid::Uuid;

    fn sample(id: Uuid) -> Message {
        Message {
            id,
            sender: "cth://a/agent".into(),
            targets: vec!["cth://b/agent".into()],
            message_type: "cth://example.com/test".into(),
            expires: Utc::now() + chrono::Duration::seconds(60),
            destination_report: false,
            hops: Vec::new(),
            data: serde_json::Value::Null,
            target: None,
        }
    }

    #[tokio::test]
    async fn immediate_enqueue_is_delivered_to_subscriber() {
        let queue = InMemoryQueue::new();
        let (tx, mut rx) = test_mpsc::unbounded_channel();
        let handler: Handler = Arc::new(move |msg| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(msg);
            })
        });
        queue.subscribe("accept", 2, handler).await;

        let id = Uuid::new_v4();
        queue.enqueue("accept", sample(id), EnqueueOptions::immediate()).await;

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("handler should run")
            .expect("channel should yield the message");
        assert_eq!(received.id, id);
    }

    #[tokio::test]
    async fn delayed_enqueue_is_not_visible_immediately() {
        let queue = InMemoryQueue::new();
        let (tx, mut rx) = test_mpsc::unbounded_channel();
        let handler: Handler = Arc::new(move |msg| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(msg);
            })
        });
        queue.subscribe("redeliver", 1, handler).await;

        queue
            .enqueue("redeliver", sample(Uuid::new_v4()), EnqueueOptions::delayed(2))
            .await;

        let early = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(early.is_err(), "message should not be visible before its delay elapses");
    }

    #[tokio::test]
    async fn multiple_consumers_share_the_same_queue() {
        let queue = Arc::new(InMemoryQueue::new());
        let (tx, mut rx) = test_mpsc::unbounded_channel();
        let handler: Handler = Arc::new(move |msg| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(msg);
            })
        });
        queue.subscribe("accept", 4, handler).await;

        for _ in 0..10 {
            queue
                .enqueue("accept", sample(Uuid::new_v4()), EnqueueOptions::immediate())
                .await;
        }

        let mut count = 0;
        while count < 10 {
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("all ten messages should eventually arrive")
                .expect("channel should stay open");
            count += 1;
        }
    }
}
