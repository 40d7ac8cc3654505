//! Named-queue broker and bus-to-queue bindings.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::bus::{EventBus, InMemoryEventBus, SubscriptionFilter};
use crate::error::QueueError;
use crate::queue::{InMemoryQueue, MessageQueue};

/// A registry of named queues.
///
/// Queues are created by whoever provisions the topology; consumers resolve
/// them by name and must retry if they start before the queue exists (local
/// startup ordering, not a failure).
#[derive(Clone, Default)]
pub struct QueueBroker {
    queues: Arc<RwLock<HashMap<String, InMemoryQueue>>>,
}

impl QueueBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or returns the existing) queue with the given name.
    pub fn create_queue(&self, name: impl Into<String>) -> InMemoryQueue {
        let mut queues = self.queues.write().unwrap();
        queues.entry(name.into()).or_default().clone()
    }

    /// Resolves a queue by name.
    pub fn resolve(&self, name: &str) -> Result<InMemoryQueue, QueueError> {
        self.queues
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }
}

/// Binds a queue to the bus: every published envelope matching the filter is
/// forwarded to the queue as a JSON-serialized message body.
///
/// Returns the forwarder task handle; the task ends when the bus is dropped.
pub fn bind_queue(
    bus: &InMemoryEventBus,
    queue: InMemoryQueue,
    filter: SubscriptionFilter,
) -> tokio::task::JoinHandle<()> {
    let mut subscription = bus.subscribe(filter);
    tokio::spawn(async move {
        while let Some(envelope) = subscription.recv().await {
            let body = match serde_json::to_string(&envelope) {
                Ok(body) => body,
                Err(error) => {
                    tracing::warn!(%error, "failed to serialize envelope for queue binding");
                    continue;
                }
            };
            if let Err(error) = queue.send(body).await {
                tracing::warn!(%error, "failed to forward envelope to bound queue");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EventEnvelope;
    use crate::queue::ReceiveOptions;
    use std::time::Duration;

    #[tokio::test]
    async fn resolve_fails_until_queue_exists() {
        let broker = QueueBroker::new();
        assert!(matches!(
            broker.resolve("orders"),
            Err(QueueError::QueueNotFound(_))
        ));

        broker.create_queue("orders");
        assert!(broker.resolve("orders").is_ok());
    }

    #[tokio::test]
    async fn create_queue_is_idempotent() {
        let broker = QueueBroker::new();
        let first = broker.create_queue("orders");
        first.send("m1".to_string()).await.unwrap();

        let second = broker.create_queue("orders");
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn bound_queue_receives_matching_envelopes() {
        let bus = InMemoryEventBus::new();
        let broker = QueueBroker::new();
        let queue = broker.create_queue("inventory-orders");
        bind_queue(
            &bus,
            queue.clone(),
            SubscriptionFilter::detail_types(["order.placed"]),
        );

        bus.publish(
            EventEnvelope::new("test", "order.placed", &serde_json::json!({"orderId": "o1"}))
                .unwrap(),
        )
        .await
        .unwrap();
        bus.publish(
            EventEnvelope::new("test", "payment.succeeded", &serde_json::json!({})).unwrap(),
        )
        .await
        .unwrap();

        let batch = queue
            .receive(ReceiveOptions {
                wait: Duration::from_secs(1),
                ..ReceiveOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);

        let envelope: EventEnvelope = serde_json::from_str(&batch[0].body).unwrap();
        assert_eq!(envelope.detail_type, "order.placed");
    }
}
