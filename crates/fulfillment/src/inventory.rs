//! Inventory reservation engine.

use event_bus::{EventBus, EventBusError, EventEnvelope};
use serde::Serialize;
use store::{InventoryStore, StoreError};

use crate::error::Result;
use crate::events::{
    FailedItem, FulfillmentEvent, INVENTORY_OUT_OF_STOCK, INVENTORY_RESERVATION_FAILED,
    INVENTORY_RESERVED, InventoryReserved, LineItem, OrderPlaced, OutOfStock, ReservationFailed,
};

const EVENT_SOURCE: &str = "storefront.inventory-service";

/// The per-order partition of line items produced by a reservation attempt.
///
/// Reconciliation contract: every original line item appears in exactly one
/// of the two lists.
#[derive(Debug, Clone)]
pub struct ReservationOutcome {
    /// Items whose stock was successfully decremented.
    pub reserved: Vec<LineItem>,
    /// Items that could not be reserved: shortfall discovered in the read,
    /// a decrement that lost a race, or a non-positive quantity.
    pub failed: Vec<FailedItem>,
}

impl ReservationOutcome {
    /// Returns true if every line item was reserved.
    pub fn is_fully_reserved(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns the number of items across both partitions.
    pub fn item_count(&self) -> usize {
        self.reserved.len() + self.failed.len()
    }
}

/// Consumes `order.placed` and reserves stock per line item.
///
/// Reservation is a two-phase, non-transactional process across the order's
/// items: there is no all-or-nothing atomicity, and some items may reserve
/// while siblings fail. That trade-off is deliberate; downstream consumers
/// reconcile through the reserved list carried on the failure event.
pub struct InventoryReservationEngine<S, B> {
    store: S,
    bus: B,
}

impl<S, B> InventoryReservationEngine<S, B>
where
    S: InventoryStore,
    B: EventBus,
{
    /// Creates a new engine over the given store and bus.
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    /// Boundary entry point used by the queue worker: validates and
    /// dispatches an envelope. Returns `Ok(None)` for events this engine
    /// does not consume; a recognized event with a broken payload is
    /// rejected as poison.
    pub async fn handle_envelope(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<Option<ReservationOutcome>> {
        match FulfillmentEvent::try_from_envelope(envelope)? {
            Some(FulfillmentEvent::OrderPlaced(order)) => {
                self.handle_order_placed(&order).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Reserves inventory for an order.
    ///
    /// Stock shortfall is a normal, expected outcome communicated entirely
    /// through emitted events; the invocation itself succeeds. Only
    /// store/bus infrastructure faults return an error (and redelivery
    /// retries the whole event).
    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id))]
    pub async fn handle_order_placed(&self, order: &OrderPlaced) -> Result<ReservationOutcome> {
        metrics::counter!("inventory_orders_received").increment(1);

        // Phase 1: read availability for every item.
        let mut unavailable = Vec::new();
        let mut candidates = Vec::new();
        for item in &order.items {
            let available = self
                .store
                .get(&item.product_id)
                .await?
                .map(|r| r.available)
                .unwrap_or(0);

            if item.quantity == 0 || available < item.quantity {
                unavailable.push(FailedItem {
                    product_id: item.product_id.clone(),
                    requested: item.quantity,
                    available,
                });
            } else {
                candidates.push(item.clone());
            }
        }

        // Phase 2: conditional decrement per candidate. A candidate can
        // still lose the race between read and write, or the record can
        // vanish; both land in the failed set.
        let mut reserved = Vec::new();
        let mut failed_updates = Vec::new();
        for item in candidates {
            match self
                .store
                .conditional_decrement(&item.product_id, item.quantity)
                .await
            {
                Ok(remaining) => {
                    tracing::debug!(product_id = %item.product_id, quantity = item.quantity, remaining, "reserved");
                    reserved.push(item);
                }
                Err(StoreError::InsufficientStock { available, .. }) => {
                    failed_updates.push(FailedItem {
                        product_id: item.product_id,
                        requested: item.quantity,
                        available,
                    });
                }
                Err(StoreError::RecordNotFound(_)) => {
                    failed_updates.push(FailedItem {
                        product_id: item.product_id,
                        requested: item.quantity,
                        available: 0,
                    });
                }
                Err(error) => return Err(error.into()),
            }
        }

        if !reserved.is_empty() {
            self.publish(
                INVENTORY_RESERVED,
                &InventoryReserved {
                    order_id: order.order_id.clone(),
                    customer_id: order.customer_id.clone(),
                    items: reserved.clone(),
                    total_cents: order.total_cents,
                },
            )
            .await?;
            metrics::counter!("inventory_reservations").increment(1);
        }

        let mut failed = unavailable.clone();
        failed.extend(failed_updates);

        if !failed.is_empty() {
            self.publish(
                INVENTORY_RESERVATION_FAILED,
                &ReservationFailed {
                    order_id: order.order_id.clone(),
                    customer_id: order.customer_id.clone(),
                    failed_items: failed.clone(),
                    reserved_items: reserved.clone(),
                },
            )
            .await?;
            metrics::counter!("inventory_reservation_failures").increment(1);
            tracing::info!(failed = failed.len(), reserved = reserved.len(), "reservation incomplete");
        }

        if !unavailable.is_empty() {
            self.publish(
                INVENTORY_OUT_OF_STOCK,
                &OutOfStock {
                    order_id: order.order_id.clone(),
                    customer_id: order.customer_id.clone(),
                    unavailable_items: unavailable,
                },
            )
            .await?;
        }

        Ok(ReservationOutcome { reserved, failed })
    }

    async fn publish<T: Serialize>(&self, detail_type: &str, payload: &T) -> Result<()> {
        let envelope = EventEnvelope::new(EVENT_SOURCE, detail_type, payload)
            .map_err(EventBusError::Serialization)?;
        self.bus.publish(envelope).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FulfillmentError;
    use crate::events::ORDER_PLACED;
    use common::{CustomerId, OrderId, ProductId};
    use event_bus::InMemoryEventBus;
    use store::{InMemoryInventoryStore, InventoryRecord};

    fn engine() -> (
        InventoryReservationEngine<InMemoryInventoryStore, InMemoryEventBus>,
        InMemoryInventoryStore,
        InMemoryEventBus,
    ) {
        let store = InMemoryInventoryStore::new();
        let bus = InMemoryEventBus::new();
        let engine = InventoryReservationEngine::new(store.clone(), bus.clone());
        (engine, store, bus)
    }

    fn order(items: Vec<LineItem>) -> OrderPlaced {
        OrderPlaced {
            order_id: OrderId::new("o1"),
            customer_id: CustomerId::new("user-1"),
            items,
            total_cents: 1000,
        }
    }

    #[tokio::test]
    async fn reserves_available_items_and_decrements_stock() {
        let (engine, store, bus) = engine();
        store.put(InventoryRecord::new("p1", 5)).await.unwrap();

        let outcome = engine
            .handle_order_placed(&order(vec![LineItem::new("p1", 2)]))
            .await
            .unwrap();

        assert!(outcome.is_fully_reserved());
        assert_eq!(outcome.reserved, vec![LineItem::new("p1", 2)]);
        assert_eq!(store.available(&ProductId::new("p1")), Some(3));

        let reserved = bus.published_of_type(INVENTORY_RESERVED);
        assert_eq!(reserved.len(), 1);
        let payload: InventoryReserved = reserved[0].detail_as().unwrap();
        assert_eq!(payload.items, vec![LineItem::new("p1", 2)]);
        assert!(bus.published_of_type(INVENTORY_RESERVATION_FAILED).is_empty());
    }

    #[tokio::test]
    async fn shortfall_is_an_event_not_an_error() {
        let (engine, store, bus) = engine();
        store.put(InventoryRecord::new("p1", 3)).await.unwrap();

        let outcome = engine
            .handle_order_placed(&order(vec![LineItem::new("p1", 10)]))
            .await
            .unwrap();

        assert!(outcome.reserved.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].requested, 10);
        assert_eq!(outcome.failed[0].available, 3);
        // The rejected request leaves stock untouched.
        assert_eq!(store.available(&ProductId::new("p1")), Some(3));

        let failed = bus.published_of_type(INVENTORY_RESERVATION_FAILED);
        assert_eq!(failed.len(), 1);
        let payload: ReservationFailed = failed[0].detail_as().unwrap();
        assert!(payload.reserved_items.is_empty());
        assert_eq!(payload.failed_items[0].available, 3);

        assert_eq!(bus.published_of_type(INVENTORY_OUT_OF_STOCK).len(), 1);
        assert!(bus.published_of_type(INVENTORY_RESERVED).is_empty());
    }

    #[tokio::test]
    async fn partial_success_emits_both_events_with_reconcilable_lists() {
        let (engine, store, bus) = engine();
        store.put(InventoryRecord::new("p1", 5)).await.unwrap();
        store.put(InventoryRecord::new("p2", 1)).await.unwrap();

        let outcome = engine
            .handle_order_placed(&order(vec![
                LineItem::new("p1", 2),
                LineItem::new("p2", 4),
            ]))
            .await
            .unwrap();

        assert_eq!(outcome.item_count(), 2);
        assert_eq!(outcome.reserved, vec![LineItem::new("p1", 2)]);
        assert_eq!(outcome.failed[0].product_id, ProductId::new("p2"));

        // The failure event carries the reserved list so downstream can
        // reconcile the partial success.
        let payload: ReservationFailed = bus.published_of_type(INVENTORY_RESERVATION_FAILED)[0]
            .detail_as()
            .unwrap();
        assert_eq!(payload.reserved_items, vec![LineItem::new("p1", 2)]);
        assert_eq!(payload.failed_items.len(), 1);
        assert_eq!(bus.published_of_type(INVENTORY_RESERVED).len(), 1);
    }

    #[tokio::test]
    async fn missing_record_is_a_failed_item() {
        let (engine, _store, bus) = engine();

        let outcome = engine
            .handle_order_placed(&order(vec![LineItem::new("ghost", 1)]))
            .await
            .unwrap();

        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].available, 0);
        assert_eq!(bus.published_of_type(INVENTORY_RESERVATION_FAILED).len(), 1);
    }

    #[tokio::test]
    async fn zero_quantity_is_a_failed_item() {
        let (engine, store, _bus) = engine();
        store.put(InventoryRecord::new("p1", 5)).await.unwrap();

        let outcome = engine
            .handle_order_placed(&order(vec![LineItem::new("p1", 0)]))
            .await
            .unwrap();

        assert!(outcome.reserved.is_empty());
        assert_eq!(outcome.failed[0].requested, 0);
        // Stock is untouched.
        assert_eq!(store.available(&ProductId::new("p1")), Some(5));
    }

    #[tokio::test]
    async fn handle_envelope_ignores_foreign_detail_types() {
        let (engine, _store, _bus) = engine();
        let envelope = EventEnvelope::new(
            "storefront.catalog-service",
            "catalog.product_updated",
            &serde_json::json!({"productId": "p1"}),
        )
        .unwrap();
        assert!(engine.handle_envelope(&envelope).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn handle_envelope_rejects_malformed_order() {
        let (engine, _store, _bus) = engine();
        let envelope = EventEnvelope::new(
            "storefront.order-service",
            ORDER_PLACED,
            &serde_json::json!({"orderId": "o1"}),
        )
        .unwrap();
        let result = engine.handle_envelope(&envelope).await;
        assert!(matches!(result, Err(FulfillmentError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn store_fault_propagates_for_redelivery() {
        let (engine, store, _bus) = engine();
        store.put(InventoryRecord::new("p1", 5)).await.unwrap();
        store.set_fail_on_write(true);

        let result = engine
            .handle_order_placed(&order(vec![LineItem::new("p1", 1)]))
            .await;
        assert!(matches!(result, Err(FulfillmentError::Store(_))));
    }
}
