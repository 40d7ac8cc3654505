//! Typed event schema for the saga, validated at the bus boundary.
//!
//! Every payload is camelCase on the wire. Consumers decode through
//! [`FulfillmentEvent::try_from_envelope`], which distinguishes events this
//! saga does not consume (`Ok(None)`) from recognized events with a broken
//! payload (`InvalidPayload`, handled as poison).

use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, PaymentId, ProductId, RefundId, ShipmentId};
use event_bus::EventEnvelope;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use store::{RefundReason, ShipmentStatus};

use crate::error::FulfillmentError;

pub const ORDER_PLACED: &str = "order.placed";
pub const ORDER_CANCELLED: &str = "order.cancelled";
pub const INVENTORY_RESERVED: &str = "inventory.reserved";
pub const INVENTORY_RESERVATION_FAILED: &str = "inventory.reservation_failed";
pub const INVENTORY_OUT_OF_STOCK: &str = "inventory.out_of_stock";
pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
pub const PAYMENT_FAILED: &str = "payment.failed";
pub const REFUND_PROCESSED: &str = "refund.processed";
pub const REFUND_FAILED: &str = "refund.failed";
pub const SHIPMENT_CREATED: &str = "shipment.created";
pub const SHIPMENT_STATUS_UPDATED: &str = "shipment.status_updated";

/// One ordered line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// A line item that could not be reserved, with the quantity observed when
/// the attempt was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub product_id: ProductId,
    pub requested: u32,
    pub available: u32,
}

/// `order.placed` — produced by the order service.
///
/// Reservation events upstream of payment carry no total, so `totalCents`
/// defaults to zero when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlaced {
    pub order_id: OrderId,
    #[serde(alias = "userId")]
    pub customer_id: CustomerId,
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub total_cents: i64,
}

/// `order.cancelled` — produced by the order service; consumed here only to
/// trigger compensation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    pub order_id: OrderId,
    #[serde(default, alias = "userId")]
    pub customer_id: Option<CustomerId>,
}

/// `inventory.reserved`
///
/// Carries the order total forward so the payment processor, which consumes
/// this event, has a monetary amount to charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReserved {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub total_cents: i64,
}

/// `inventory.reservation_failed`
///
/// Carries the reserved list as well so downstream consumers can reconcile
/// partial success: every original line item appears in exactly one of the
/// two lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationFailed {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub failed_items: Vec<FailedItem>,
    pub reserved_items: Vec<LineItem>,
}

/// `inventory.out_of_stock` — read-phase shortfalls, for the storefront's
/// availability view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutOfStock {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub unavailable_items: Vec<FailedItem>,
}

/// `payment.succeeded` / `payment.failed`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcomeEvent {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub user_id: CustomerId,
    pub amount_cents: i64,
    pub timestamp: DateTime<Utc>,
}

/// `refund.processed` / `refund.failed`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundOutcomeEvent {
    pub refund_id: RefundId,
    pub order_id: OrderId,
    pub user_id: CustomerId,
    pub amount_cents: i64,
    pub reason: RefundReason,
    pub timestamp: DateTime<Utc>,
}

/// `shipment.created` / `shipment.status_updated`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentEvent {
    pub shipment_id: ShipmentId,
    pub order_id: OrderId,
    pub status: ShipmentStatus,
    pub tracking_number: String,
    pub estimated_delivery: DateTime<Utc>,
}

/// Every event the saga produces or consumes, tagged by detail-type.
#[derive(Debug, Clone)]
pub enum FulfillmentEvent {
    OrderPlaced(OrderPlaced),
    OrderCancelled(OrderCancelled),
    InventoryReserved(InventoryReserved),
    ReservationFailed(ReservationFailed),
    OutOfStock(OutOfStock),
    PaymentSucceeded(PaymentOutcomeEvent),
    PaymentFailed(PaymentOutcomeEvent),
    RefundProcessed(RefundOutcomeEvent),
    RefundFailed(RefundOutcomeEvent),
    ShipmentCreated(ShipmentEvent),
    ShipmentStatusUpdated(ShipmentEvent),
}

impl FulfillmentEvent {
    /// Returns the detail-type this event travels under.
    pub fn detail_type(&self) -> &'static str {
        match self {
            FulfillmentEvent::OrderPlaced(_) => ORDER_PLACED,
            FulfillmentEvent::OrderCancelled(_) => ORDER_CANCELLED,
            FulfillmentEvent::InventoryReserved(_) => INVENTORY_RESERVED,
            FulfillmentEvent::ReservationFailed(_) => INVENTORY_RESERVATION_FAILED,
            FulfillmentEvent::OutOfStock(_) => INVENTORY_OUT_OF_STOCK,
            FulfillmentEvent::PaymentSucceeded(_) => PAYMENT_SUCCEEDED,
            FulfillmentEvent::PaymentFailed(_) => PAYMENT_FAILED,
            FulfillmentEvent::RefundProcessed(_) => REFUND_PROCESSED,
            FulfillmentEvent::RefundFailed(_) => REFUND_FAILED,
            FulfillmentEvent::ShipmentCreated(_) => SHIPMENT_CREATED,
            FulfillmentEvent::ShipmentStatusUpdated(_) => SHIPMENT_STATUS_UPDATED,
        }
    }

    /// Decodes an envelope into a typed event.
    ///
    /// Returns `Ok(None)` for detail-types outside this saga, and
    /// `InvalidPayload` for a recognized detail-type whose detail does not
    /// validate — the caller drops those as poison.
    pub fn try_from_envelope(
        envelope: &EventEnvelope,
    ) -> Result<Option<FulfillmentEvent>, FulfillmentError> {
        let event = match envelope.detail_type.as_str() {
            ORDER_PLACED => FulfillmentEvent::OrderPlaced(decode(envelope)?),
            ORDER_CANCELLED => FulfillmentEvent::OrderCancelled(decode(envelope)?),
            INVENTORY_RESERVED => FulfillmentEvent::InventoryReserved(decode(envelope)?),
            INVENTORY_RESERVATION_FAILED => FulfillmentEvent::ReservationFailed(decode(envelope)?),
            INVENTORY_OUT_OF_STOCK => FulfillmentEvent::OutOfStock(decode(envelope)?),
            PAYMENT_SUCCEEDED => FulfillmentEvent::PaymentSucceeded(decode(envelope)?),
            PAYMENT_FAILED => FulfillmentEvent::PaymentFailed(decode(envelope)?),
            REFUND_PROCESSED => FulfillmentEvent::RefundProcessed(decode(envelope)?),
            REFUND_FAILED => FulfillmentEvent::RefundFailed(decode(envelope)?),
            SHIPMENT_CREATED => FulfillmentEvent::ShipmentCreated(decode(envelope)?),
            SHIPMENT_STATUS_UPDATED => FulfillmentEvent::ShipmentStatusUpdated(decode(envelope)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Decodes an envelope detail, mapping both a missing detail and a shape
/// mismatch to the poison error.
pub(crate) fn decode<T: DeserializeOwned>(envelope: &EventEnvelope) -> Result<T, FulfillmentError> {
    if !envelope.has_detail() {
        return Err(FulfillmentError::InvalidPayload(format!(
            "{}: missing detail",
            envelope.detail_type
        )));
    }
    envelope
        .detail_as()
        .map_err(|e| FulfillmentError::InvalidPayload(format!("{}: {e}", envelope.detail_type)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_placed_accepts_user_id_alias() {
        let detail = serde_json::json!({
            "orderId": "o1",
            "userId": "user-1",
            "items": [{"productId": "p1", "quantity": 2}],
            "totalCents": 1500
        });
        let order: OrderPlaced = serde_json::from_value(detail).unwrap();
        assert_eq!(order.customer_id.as_str(), "user-1");
        assert_eq!(order.items, vec![LineItem::new("p1", 2)]);
        assert_eq!(order.total_cents, 1500);
    }

    #[test]
    fn order_placed_total_defaults_to_zero() {
        let detail = serde_json::json!({
            "orderId": "o1",
            "customerId": "user-1",
            "items": []
        });
        let order: OrderPlaced = serde_json::from_value(detail).unwrap();
        assert_eq!(order.total_cents, 0);
    }

    #[test]
    fn payloads_are_camel_case_on_the_wire() {
        let failed = ReservationFailed {
            order_id: OrderId::new("o1"),
            customer_id: CustomerId::new("user-1"),
            failed_items: vec![FailedItem {
                product_id: ProductId::new("p1"),
                requested: 10,
                available: 3,
            }],
            reserved_items: vec![],
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert!(json.get("failedItems").is_some());
        assert!(json.get("reservedItems").is_some());
        assert_eq!(json["failedItems"][0]["productId"], "p1");
    }

    #[test]
    fn try_from_envelope_decodes_known_types() {
        let envelope = EventEnvelope::new(
            "storefront.order-service",
            ORDER_PLACED,
            &serde_json::json!({
                "orderId": "o1",
                "customerId": "user-1",
                "items": [{"productId": "p1", "quantity": 1}]
            }),
        )
        .unwrap();

        let event = FulfillmentEvent::try_from_envelope(&envelope).unwrap().unwrap();
        assert_eq!(event.detail_type(), ORDER_PLACED);
        assert!(matches!(event, FulfillmentEvent::OrderPlaced(_)));
    }

    #[test]
    fn foreign_detail_types_pass_through() {
        let envelope = EventEnvelope::new(
            "storefront.catalog-service",
            "catalog.product_updated",
            &serde_json::json!({"productId": "p1"}),
        )
        .unwrap();
        assert!(FulfillmentEvent::try_from_envelope(&envelope).unwrap().is_none());
    }

    #[test]
    fn malformed_recognized_payload_is_poison() {
        let envelope = EventEnvelope::new(
            "storefront.order-service",
            ORDER_PLACED,
            &serde_json::json!({"orderId": "o1"}),
        )
        .unwrap();
        let result = FulfillmentEvent::try_from_envelope(&envelope);
        assert!(matches!(result, Err(FulfillmentError::InvalidPayload(_))));
    }

    #[test]
    fn non_numeric_quantity_is_poison() {
        let envelope = EventEnvelope::new(
            "storefront.order-service",
            ORDER_PLACED,
            &serde_json::json!({
                "orderId": "o1",
                "customerId": "user-1",
                "items": [{"productId": "p1", "quantity": "two"}]
            }),
        )
        .unwrap();
        assert!(FulfillmentEvent::try_from_envelope(&envelope).is_err());
    }
}
