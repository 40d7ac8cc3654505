//! Event bus trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::envelope::EventEnvelope;
use crate::error::EventBusError;

/// Selects which detail-types a subscription receives.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    detail_types: Vec<String>,
}

impl SubscriptionFilter {
    /// Matches every published event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches only the given detail-types.
    pub fn detail_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            detail_types: types.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, envelope: &EventEnvelope) -> bool {
        self.detail_types.is_empty() || self.detail_types.iter().any(|t| *t == envelope.detail_type)
    }
}

/// A stream of envelopes delivered to one subscriber.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<EventEnvelope>,
}

impl Subscription {
    /// Receives the next matching envelope. Returns `None` when the bus
    /// has been dropped.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.recv().await
    }

    /// Receives without waiting; `None` when nothing is pending.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.try_recv().ok()
    }
}

/// Publish/subscribe interface over a durable topic.
///
/// Delivery is at-least-once and unordered across producers. Every
/// subscriber sees every matching event independently; publishing never
/// waits on consumers.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes an envelope to the bus.
    async fn publish(&self, event: EventEnvelope) -> Result<(), EventBusError>;

    /// Registers a subscriber for envelopes matching the filter.
    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription;
}

#[derive(Default)]
struct BusState {
    subscribers: Vec<(SubscriptionFilter, mpsc::UnboundedSender<EventEnvelope>)>,
    published: Vec<EventEnvelope>,
    fail_on_publish: bool,
}

/// In-memory event bus.
///
/// Fans published envelopes out to all matching subscribers and keeps a log
/// of everything published, so tests can assert on emitted events the same
/// way a downstream consumer would observe them.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<RwLock<BusState>>,
}

impl InMemoryEventBus {
    /// Creates a new empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the bus to reject publishes, for double-fault tests.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().unwrap().fail_on_publish = fail;
    }

    /// Returns every envelope published so far.
    pub fn published(&self) -> Vec<EventEnvelope> {
        self.state.read().unwrap().published.clone()
    }

    /// Returns published envelopes with the given detail-type.
    pub fn published_of_type(&self, detail_type: &str) -> Vec<EventEnvelope> {
        self.state
            .read()
            .unwrap()
            .published
            .iter()
            .filter(|e| e.detail_type == detail_type)
            .cloned()
            .collect()
    }

    /// Returns the total number of published envelopes.
    pub fn event_count(&self) -> usize {
        self.state.read().unwrap().published.len()
    }

    /// Clears the publish log.
    pub fn clear(&self) {
        self.state.write().unwrap().published.clear();
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: EventEnvelope) -> Result<(), EventBusError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_publish {
            return Err(EventBusError::PublishFailed(
                "event bus unavailable".to_string(),
            ));
        }

        tracing::debug!(detail_type = %event.detail_type, source = %event.source, "publishing event");

        // Drop subscribers whose receiving end has gone away.
        state
            .subscribers
            .retain(|(filter, sender)| !filter.matches(&event) || sender.send(event.clone()).is_ok());
        state.published.push(event);

        Ok(())
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state.write().unwrap().subscribers.push((filter, sender));
        Subscription { receiver }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(detail_type: &str) -> EventEnvelope {
        EventEnvelope::new("test.service", detail_type, &serde_json::json!({"k": 1})).unwrap()
    }

    #[tokio::test]
    async fn subscribers_see_matching_events() {
        let bus = InMemoryEventBus::new();
        let mut all = bus.subscribe(SubscriptionFilter::all());
        let mut placed_only = bus.subscribe(SubscriptionFilter::detail_types(["order.placed"]));

        bus.publish(envelope("order.placed")).await.unwrap();
        bus.publish(envelope("payment.succeeded")).await.unwrap();

        assert_eq!(all.recv().await.unwrap().detail_type, "order.placed");
        assert_eq!(all.recv().await.unwrap().detail_type, "payment.succeeded");
        assert_eq!(placed_only.recv().await.unwrap().detail_type, "order.placed");
        assert!(placed_only.try_recv().is_none());
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = InMemoryEventBus::new();
        let mut first = bus.subscribe(SubscriptionFilter::all());
        let mut second = bus.subscribe(SubscriptionFilter::all());

        bus.publish(envelope("order.placed")).await.unwrap();

        assert!(first.recv().await.is_some());
        assert!(second.recv().await.is_some());
    }

    #[tokio::test]
    async fn publish_log_records_everything() {
        let bus = InMemoryEventBus::new();
        bus.publish(envelope("order.placed")).await.unwrap();
        bus.publish(envelope("order.placed")).await.unwrap();
        bus.publish(envelope("payment.failed")).await.unwrap();

        assert_eq!(bus.event_count(), 3);
        assert_eq!(bus.published_of_type("order.placed").len(), 2);
        assert_eq!(bus.published_of_type("refund.processed").len(), 0);

        bus.clear();
        assert_eq!(bus.event_count(), 0);
    }

    #[tokio::test]
    async fn fail_on_publish() {
        let bus = InMemoryEventBus::new();
        bus.set_fail_on_publish(true);

        let result = bus.publish(envelope("order.placed")).await;
        assert!(matches!(result, Err(EventBusError::PublishFailed(_))));
        assert_eq!(bus.event_count(), 0);

        bus.set_fail_on_publish(false);
        assert!(bus.publish(envelope("order.placed")).await.is_ok());
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_block_publishing() {
        let bus = InMemoryEventBus::new();
        drop(bus.subscribe(SubscriptionFilter::all()));

        bus.publish(envelope("order.placed")).await.unwrap();
        assert_eq!(bus.event_count(), 1);
    }
}
