//! Message queue trait and in-memory implementation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::error::QueueError;

/// A received message. The receipt handle is minted per delivery and is the
/// only way to acknowledge (delete) the message.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: Uuid,
    pub body: String,
    pub receipt_handle: String,
}

/// Parameters for one receive call.
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// Maximum number of messages returned in one batch.
    pub max_messages: usize,
    /// Long-poll duration when the queue is empty.
    pub wait: Duration,
    /// How long a delivered message stays hidden before it becomes
    /// eligible for redelivery.
    pub visibility_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

/// A point-to-point queue with visibility-timeout redelivery.
///
/// Consumers must delete each message after processing it; an un-deleted
/// message is redelivered (with a fresh receipt handle) once its visibility
/// timeout elapses. Delivery is therefore at-least-once.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueues a message body.
    async fn send(&self, body: String) -> Result<(), QueueError>;

    /// Long-polls for up to `options.wait`, returning at most
    /// `options.max_messages` visible messages. Returns an empty batch on
    /// timeout.
    async fn receive(&self, options: ReceiveOptions) -> Result<Vec<Message>, QueueError>;

    /// Acknowledges a message by its receipt handle, removing it from the
    /// queue. A handle from a delivery whose visibility timeout has already
    /// produced a redelivery is stale and rejected.
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

struct QueueEntry {
    message_id: Uuid,
    body: String,
    visible_at: Instant,
    receipt_handle: Option<String>,
}

struct Inner {
    entries: Mutex<Vec<QueueEntry>>,
    notify: Notify,
}

/// In-memory queue implementation.
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

impl InMemoryQueue {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Returns the number of messages in the queue, including in-flight ones.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    /// Returns true if the queue holds no messages at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn send(&self, body: String) -> Result<(), QueueError> {
        let mut entries = self.inner.entries.lock().unwrap();
        entries.push(QueueEntry {
            message_id: Uuid::new_v4(),
            body,
            visible_at: Instant::now(),
            receipt_handle: None,
        });
        drop(entries);
        // notify_one stores a permit when no receiver is parked yet, so a
        // send racing a receiver's empty-check is not lost.
        self.inner.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, options: ReceiveOptions) -> Result<Vec<Message>, QueueError> {
        let deadline = Instant::now() + options.wait;

        loop {
            let next_visible = {
                let mut entries = self.inner.entries.lock().unwrap();
                let now = Instant::now();
                let mut batch = Vec::new();

                for entry in entries.iter_mut() {
                    if batch.len() >= options.max_messages {
                        break;
                    }
                    if entry.visible_at <= now {
                        let handle = Uuid::new_v4().to_string();
                        entry.visible_at = now + options.visibility_timeout;
                        entry.receipt_handle = Some(handle.clone());
                        batch.push(Message {
                            message_id: entry.message_id,
                            body: entry.body.clone(),
                            receipt_handle: handle,
                        });
                    }
                }

                if !batch.is_empty() {
                    return Ok(batch);
                }
                entries.iter().map(|e| e.visible_at).min()
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            // Wake on a new send, on the next visibility expiry, or at the
            // long-poll deadline, whichever comes first.
            let mut wake_at = deadline;
            if let Some(visible_at) = next_visible
                && visible_at < wake_at
            {
                wake_at = visible_at;
            }
            tokio::select! {
                () = self.inner.notify.notified() => {}
                () = time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut entries = self.inner.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| e.receipt_handle.as_deref() != Some(receipt_handle));

        if entries.len() == before {
            return Err(QueueError::ReceiptNotFound(receipt_handle.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn immediate() -> ReceiveOptions {
        ReceiveOptions {
            wait: Duration::ZERO,
            ..ReceiveOptions::default()
        }
    }

    #[tokio::test]
    async fn send_receive_delete() {
        let queue = InMemoryQueue::new();
        queue.send("hello".to_string()).await.unwrap();

        let batch = queue.receive(immediate()).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "hello");

        queue.delete(&batch[0].receipt_handle).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn in_flight_messages_are_invisible() {
        let queue = InMemoryQueue::new();
        queue.send("m1".to_string()).await.unwrap();

        let first = queue.receive(immediate()).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = queue.receive(immediate()).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_message_is_redelivered_after_visibility_timeout() {
        let queue = InMemoryQueue::new();
        queue.send("m1".to_string()).await.unwrap();

        let options = ReceiveOptions {
            wait: Duration::ZERO,
            visibility_timeout: Duration::from_secs(30),
            ..ReceiveOptions::default()
        };
        let first = queue.receive(options.clone()).await.unwrap();
        assert_eq!(first.len(), 1);

        time::advance(Duration::from_secs(31)).await;

        let second = queue.receive(options).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);

        // The original handle is now stale.
        let stale = queue.delete(&first[0].receipt_handle).await;
        assert!(matches!(stale, Err(QueueError::ReceiptNotFound(_))));

        queue.delete(&second[0].receipt_handle).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_returns_message_sent_mid_wait() {
        let queue = InMemoryQueue::new();
        let poller = queue.clone();

        let handle = tokio::spawn(async move {
            poller
                .receive(ReceiveOptions {
                    wait: Duration::from_secs(20),
                    ..ReceiveOptions::default()
                })
                .await
                .unwrap()
        });

        time::sleep(Duration::from_secs(3)).await;
        queue.send("late".to_string()).await.unwrap();

        let batch = handle.await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_times_out_empty() {
        let queue = InMemoryQueue::new();
        let batch = queue
            .receive(ReceiveOptions {
                wait: Duration::from_secs(5),
                ..ReceiveOptions::default()
            })
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn batch_respects_max_messages() {
        let queue = InMemoryQueue::new();
        for i in 0..5 {
            queue.send(format!("m{i}")).await.unwrap();
        }

        let batch = queue
            .receive(ReceiveOptions {
                max_messages: 3,
                wait: Duration::ZERO,
                ..ReceiveOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn delete_unknown_handle_is_an_error() {
        let queue = InMemoryQueue::new();
        let result = queue.delete("nope").await;
        assert!(matches!(result, Err(QueueError::ReceiptNotFound(_))));
    }
}
