//! The queue-consuming worker loop.

use event_bus::{
    EventBus, EventEnvelope, InMemoryQueue, Message, MessageQueue, QueueBroker,
};
use fulfillment::{FulfillmentError, InventoryReservationEngine};
use store::InventoryStore;

use crate::config::WorkerConfig;

/// What happened to one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Handled and acknowledged.
    Processed,
    /// Poison (unparseable, shapeless, or malformed payload): acknowledged
    /// and dropped without retry.
    Dropped,
    /// Handler failed: left un-acknowledged, eligible for redelivery after
    /// the visibility timeout.
    Retained,
}

/// Long-polls the order queue and dispatches messages to the inventory
/// reservation engine, acknowledging per message.
pub struct QueueWorker<S, B> {
    broker: QueueBroker,
    config: WorkerConfig,
    engine: InventoryReservationEngine<S, B>,
}

impl<S, B> QueueWorker<S, B>
where
    S: InventoryStore,
    B: EventBus,
{
    /// Creates a new worker.
    pub fn new(
        broker: QueueBroker,
        config: WorkerConfig,
        engine: InventoryReservationEngine<S, B>,
    ) -> Self {
        Self {
            broker,
            config,
            engine,
        }
    }

    /// Resolves the configured queue, retrying indefinitely with a fixed
    /// backoff. Startup ordering, not a failure: the broker may simply not
    /// have provisioned the queue yet.
    pub async fn resolve_queue(&self) -> InMemoryQueue {
        loop {
            match self.broker.resolve(&self.config.queue_name) {
                Ok(queue) => return queue,
                Err(error) => {
                    tracing::info!(queue = %self.config.queue_name, %error, "waiting for queue broker");
                    tokio::time::sleep(self.config.resolve_retry_delay).await;
                }
            }
        }
    }

    /// Runs the receive loop indefinitely.
    pub async fn run(&self) {
        let queue = self.resolve_queue().await;
        tracing::info!(queue = %self.config.queue_name, "inventory queue worker started");

        loop {
            self.poll_once(&queue).await;
        }
    }

    /// One long-poll: receives a batch and processes each message
    /// independently. Returns the outcome per message, in batch order.
    pub async fn poll_once(&self, queue: &InMemoryQueue) -> Vec<MessageOutcome> {
        let batch = match queue.receive(self.config.receive_options()).await {
            Ok(batch) => batch,
            Err(error) => {
                tracing::error!(%error, "queue receive failed");
                tokio::time::sleep(self.config.resolve_retry_delay).await;
                return Vec::new();
            }
        };

        let mut outcomes = Vec::with_capacity(batch.len());
        for message in &batch {
            outcomes.push(self.process_message(queue, message).await);
        }
        outcomes
    }

    /// Processes one message and decides its fate.
    ///
    /// Poison policy: a body that does not parse as an envelope, an absent
    /// detail, or a malformed `order.placed` payload is logged and deleted —
    /// retrying cannot fix it and there is no dead-letter re-routing. Any
    /// other handler failure leaves the message in place so the visibility
    /// timeout redelivers it.
    async fn process_message(&self, queue: &InMemoryQueue, message: &Message) -> MessageOutcome {
        let envelope: EventEnvelope = match serde_json::from_str(&message.body) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(message_id = %message.message_id, %error, "dropping unparseable message");
                self.acknowledge(queue, message).await;
                metrics::counter!("worker_messages_dropped").increment(1);
                return MessageOutcome::Dropped;
            }
        };

        if !envelope.has_detail() {
            tracing::warn!(message_id = %message.message_id, "dropping message without detail");
            self.acknowledge(queue, message).await;
            metrics::counter!("worker_messages_dropped").increment(1);
            return MessageOutcome::Dropped;
        }

        match self.engine.handle_envelope(&envelope).await {
            Ok(_) => {
                self.acknowledge(queue, message).await;
                metrics::counter!("worker_messages_processed").increment(1);
                MessageOutcome::Processed
            }
            Err(FulfillmentError::InvalidPayload(reason)) => {
                tracing::warn!(message_id = %message.message_id, reason, "dropping malformed payload");
                self.acknowledge(queue, message).await;
                metrics::counter!("worker_messages_dropped").increment(1);
                MessageOutcome::Dropped
            }
            Err(error) => {
                tracing::error!(message_id = %message.message_id, %error, "handler failed, message will redeliver");
                metrics::counter!("worker_messages_retained").increment(1);
                MessageOutcome::Retained
            }
        }
    }

    async fn acknowledge(&self, queue: &InMemoryQueue, message: &Message) {
        if let Err(error) = queue.delete(&message.receipt_handle).await {
            tracing::warn!(message_id = %message.message_id, %error, "failed to delete message");
        }
    }
}
