//! Refund compensator: the saga's compensating transaction.

use chrono::Utc;
use common::{CustomerId, Money, OrderId, RefundId};
use event_bus::{EventBus, EventBusError, EventEnvelope};
use serde::{Deserialize, Serialize};
use store::{
    PaymentRecord, PaymentRef, PaymentStatus, PaymentStore, RefundReason, RefundRecord,
    RefundStatus, RefundStore, StoreError,
};

use crate::error::{FulfillmentError, Result};
use crate::events::{
    self, INVENTORY_RESERVATION_FAILED, ORDER_CANCELLED, REFUND_FAILED, REFUND_PROCESSED,
    RefundOutcomeEvent,
};
use crate::gateway::{PaymentGateway, RefundOutcome};

const EVENT_SOURCE: &str = "storefront.payment-service";
const CURRENCY: &str = "USD";

/// The fields the compensator needs from a triggering event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefundRequest {
    order_id: OrderId,
    #[serde(default, alias = "userId")]
    customer_id: Option<CustomerId>,
}

/// How a refund trigger was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundDisposition {
    /// A refund record was persisted as processed (with or without money
    /// actually moving) and `refund.processed` was emitted.
    Processed(RefundId),
    /// The gateway declined the refund; a failed record was persisted.
    Declined(RefundId),
    /// A processed refund already exists for this order; the duplicate
    /// delivery was skipped.
    AlreadyProcessed,
}

/// Issues compensating refunds for failed fulfillment paths.
///
/// Always writes a refund record — even when no payment exists for the
/// order — because the audit trail must show the compensation ran
/// regardless of whether money moved.
pub struct RefundCompensator<P, R, G, B> {
    payments: P,
    refunds: R,
    gateway: G,
    bus: B,
}

impl<P, R, G, B> RefundCompensator<P, R, G, B>
where
    P: PaymentStore,
    R: RefundStore,
    G: PaymentGateway,
    B: EventBus,
{
    /// Creates a new compensator.
    pub fn new(payments: P, refunds: R, gateway: G, bus: B) -> Self {
        Self {
            payments,
            refunds,
            gateway,
            bus,
        }
    }

    /// Handles a failure event, deriving the refund reason from the
    /// triggering detail-type.
    pub async fn handle_failure_event(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<RefundDisposition> {
        let reason = match envelope.detail_type.as_str() {
            INVENTORY_RESERVATION_FAILED => RefundReason::InsufficientInventory,
            ORDER_CANCELLED => RefundReason::OrderCancelled,
            other => {
                return Err(FulfillmentError::InvalidPayload(format!(
                    "refund compensator does not consume '{other}'"
                )));
            }
        };
        let request: RefundRequest = events::decode(envelope)?;
        self.compensate(&request, reason).await
    }

    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id, %reason))]
    async fn compensate(
        &self,
        request: &RefundRequest,
        reason: RefundReason,
    ) -> Result<RefundDisposition> {
        // Duplicate delivery must not double-refund: the order id is the
        // idempotency key, enforced again by the store's conditional create.
        if let Some(existing) = self.refunds.find_by_order(&request.order_id).await?
            && existing.status == RefundStatus::Processed
        {
            tracing::info!(refund_id = %existing.refund_id, "refund already processed, skipping duplicate");
            return Ok(RefundDisposition::AlreadyProcessed);
        }

        let refund_id = RefundId::new();
        let original = self.payments.find_by_order(&request.order_id).await?;

        match original {
            Some(payment) if payment.status == PaymentStatus::Succeeded => {
                self.reverse_charge(refund_id, request, reason, payment).await
            }
            // Absence of a payment is valid: not every failure path has a
            // prior charge. Record the compensation anyway.
            _ => {
                let customer_id = request
                    .customer_id
                    .clone()
                    .unwrap_or_else(|| CustomerId::new("unknown"));
                tracing::info!("no payment found, writing audit-only refund record");
                self.finalize(RefundRecord::new(
                    refund_id,
                    request.order_id.clone(),
                    PaymentRef::NotFound,
                    customer_id,
                    Money::zero(),
                    reason,
                    RefundStatus::Processed,
                ))
                .await
            }
        }
    }

    /// Refunds a real charge through the gateway, then records the outcome.
    async fn reverse_charge(
        &self,
        refund_id: RefundId,
        request: &RefundRequest,
        reason: RefundReason,
        payment: PaymentRecord,
    ) -> Result<RefundDisposition> {
        let customer_id = request
            .customer_id
            .clone()
            .unwrap_or_else(|| payment.customer_id.clone());
        let payment_ref = PaymentRef::Payment(payment.payment_id);

        let Some(transaction_id) = payment.transaction_id.as_deref() else {
            // Succeeded payment without a gateway transaction: nothing to
            // reverse at the gateway, keep the audit trail consistent.
            tracing::warn!(payment_id = %payment.payment_id, "succeeded payment has no transaction id");
            return self
                .finalize(RefundRecord::new(
                    refund_id,
                    request.order_id.clone(),
                    payment_ref,
                    customer_id,
                    payment.amount,
                    reason,
                    RefundStatus::Processed,
                ))
                .await;
        };

        match self.gateway.refund(transaction_id, payment.amount, CURRENCY).await {
            Ok(RefundOutcome::Refunded { .. }) => {
                self.finalize(RefundRecord::new(
                    refund_id,
                    request.order_id.clone(),
                    payment_ref,
                    customer_id,
                    payment.amount,
                    reason,
                    RefundStatus::Processed,
                ))
                .await
            }
            Ok(RefundOutcome::Declined { error_code }) => {
                tracing::warn!(error_code, "gateway declined refund");
                self.finalize(RefundRecord::new(
                    refund_id,
                    request.order_id.clone(),
                    payment_ref,
                    customer_id,
                    payment.amount,
                    reason,
                    RefundStatus::Failed,
                ))
                .await
            }
            Err(error) => {
                tracing::error!(%error, "refund call failed");
                self.publish_failed_best_effort(refund_id, request, payment.amount, reason)
                    .await;
                Err(error.into())
            }
        }
    }

    /// Persists the refund record and emits the matching terminal event.
    async fn finalize(&self, record: RefundRecord) -> Result<RefundDisposition> {
        let refund_id = record.refund_id;
        let status = record.status;
        let event = RefundOutcomeEvent {
            refund_id,
            order_id: record.order_id.clone(),
            user_id: record.customer_id.clone(),
            amount_cents: record.amount.cents(),
            reason: record.reason,
            timestamp: Utc::now(),
        };

        match self.refunds.create(record).await {
            Ok(()) => {}
            Err(StoreError::DuplicateRefund(_)) => {
                tracing::warn!("concurrent duplicate refund detected, keeping first record");
                return Ok(RefundDisposition::AlreadyProcessed);
            }
            Err(error) => {
                tracing::error!(%error, "failed to persist refund record");
                if let Err(publish_error) = self.publish(REFUND_FAILED, &event).await {
                    tracing::error!(%publish_error, "failed to publish refund.failed");
                }
                return Err(error.into());
            }
        }

        match status {
            RefundStatus::Processed => {
                self.publish(REFUND_PROCESSED, &event).await?;
                metrics::counter!("refunds_processed").increment(1);
                tracing::info!(%refund_id, "refund processed");
                Ok(RefundDisposition::Processed(refund_id))
            }
            RefundStatus::Failed => {
                if let Err(error) = self.publish(REFUND_FAILED, &event).await {
                    tracing::error!(%error, "failed to publish refund.failed");
                }
                metrics::counter!("refunds_failed").increment(1);
                Ok(RefundDisposition::Declined(refund_id))
            }
        }
    }

    async fn publish_failed_best_effort(
        &self,
        refund_id: RefundId,
        request: &RefundRequest,
        amount: Money,
        reason: RefundReason,
    ) {
        let event = RefundOutcomeEvent {
            refund_id,
            order_id: request.order_id.clone(),
            user_id: request
                .customer_id
                .clone()
                .unwrap_or_else(|| CustomerId::new("unknown")),
            amount_cents: amount.cents(),
            reason,
            timestamp: Utc::now(),
        };
        if let Err(error) = self.publish(REFUND_FAILED, &event).await {
            tracing::error!(%error, order_id = %request.order_id, "failed to publish refund.failed");
        }
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
    use crate::gateway::MockPaymentGateway;
    use common::PaymentId;
    use event_bus::InMemoryEventBus;
    use store::{InMemoryPaymentStore, InMemoryRefundStore};

    fn compensator(
        gateway: MockPaymentGateway,
    ) -> (
        RefundCompensator<
            InMemoryPaymentStore,
            InMemoryRefundStore,
            MockPaymentGateway,
            InMemoryEventBus,
        >,
        InMemoryPaymentStore,
        InMemoryRefundStore,
        InMemoryEventBus,
    ) {
        let payments = InMemoryPaymentStore::new();
        let refunds = InMemoryRefundStore::new();
        let bus = InMemoryEventBus::new();
        let compensator =
            RefundCompensator::new(payments.clone(), refunds.clone(), gateway, bus.clone());
        (compensator, payments, refunds, bus)
    }

    fn failure_envelope(order_id: &str) -> EventEnvelope {
        EventEnvelope::new(
            "storefront.inventory-service",
            INVENTORY_RESERVATION_FAILED,
            &serde_json::json!({
                "orderId": order_id,
                "customerId": "user-1",
                "failedItems": [{"productId": "p1", "requested": 10, "available": 3}],
                "reservedItems": []
            }),
        )
        .unwrap()
    }

    async fn seed_payment(payments: &InMemoryPaymentStore, order_id: &str) -> PaymentId {
        let payment_id = PaymentId::new();
        payments
            .create(PaymentRecord::new(
                payment_id,
                OrderId::new(order_id),
                CustomerId::new("user-1"),
                Money::from_cents(5000),
                PaymentStatus::Succeeded,
                Some("txn_seed".to_string()),
            ))
            .await
            .unwrap();
        payment_id
    }

    #[tokio::test]
    async fn refund_without_payment_writes_audit_record() {
        let (compensator, _payments, refunds, bus) = compensator(MockPaymentGateway::approving());

        let disposition = compensator
            .handle_failure_event(&failure_envelope("o1"))
            .await
            .unwrap();
        assert!(matches!(disposition, RefundDisposition::Processed(_)));

        let record = refunds.find_by_order(&OrderId::new("o1")).await.unwrap().unwrap();
        assert_eq!(record.payment_id, PaymentRef::NotFound);
        assert!(record.amount.is_zero());
        assert_eq!(record.reason, RefundReason::InsufficientInventory);
        assert_eq!(record.status, RefundStatus::Processed);

        let events = bus.published_of_type(REFUND_PROCESSED);
        assert_eq!(events.len(), 1);
        let payload: RefundOutcomeEvent = events[0].detail_as().unwrap();
        assert_eq!(payload.amount_cents, 0);
    }

    #[tokio::test]
    async fn refund_with_payment_reverses_the_charge() {
        let (compensator, payments, refunds, bus) = compensator(MockPaymentGateway::approving());
        let payment_id = seed_payment(&payments, "o1").await;

        let disposition = compensator
            .handle_failure_event(&failure_envelope("o1"))
            .await
            .unwrap();
        assert!(matches!(disposition, RefundDisposition::Processed(_)));

        let record = refunds.find_by_order(&OrderId::new("o1")).await.unwrap().unwrap();
        assert_eq!(record.payment_id, PaymentRef::Payment(payment_id));
        assert_eq!(record.amount, Money::from_cents(5000));

        let payload: RefundOutcomeEvent =
            bus.published_of_type(REFUND_PROCESSED)[0].detail_as().unwrap();
        assert_eq!(payload.amount_cents, 5000);
    }

    #[tokio::test]
    async fn reason_derives_from_detail_type() {
        let (compensator, _payments, refunds, _bus) = compensator(MockPaymentGateway::approving());

        let cancelled = EventEnvelope::new(
            "storefront.order-service",
            ORDER_CANCELLED,
            &serde_json::json!({"orderId": "o2", "userId": "user-1"}),
        )
        .unwrap();
        compensator.handle_failure_event(&cancelled).await.unwrap();

        let record = refunds.find_by_order(&OrderId::new("o2")).await.unwrap().unwrap();
        assert_eq!(record.reason, RefundReason::OrderCancelled);
    }

    #[tokio::test]
    async fn duplicate_delivery_does_not_double_refund() {
        let (compensator, payments, refunds, bus) = compensator(MockPaymentGateway::approving());
        seed_payment(&payments, "o1").await;

        let first = compensator
            .handle_failure_event(&failure_envelope("o1"))
            .await
            .unwrap();
        assert!(matches!(first, RefundDisposition::Processed(_)));

        let second = compensator
            .handle_failure_event(&failure_envelope("o1"))
            .await
            .unwrap();
        assert_eq!(second, RefundDisposition::AlreadyProcessed);

        assert_eq!(refunds.refund_count(), 1);
        assert_eq!(bus.published_of_type(REFUND_PROCESSED).len(), 1);
    }

    #[tokio::test]
    async fn gateway_decline_records_failed_refund() {
        let gateway = MockPaymentGateway::approving();
        gateway.set_decline_refunds(true);
        let (compensator, payments, refunds, bus) = compensator(gateway);
        seed_payment(&payments, "o1").await;

        let disposition = compensator
            .handle_failure_event(&failure_envelope("o1"))
            .await
            .unwrap();
        assert!(matches!(disposition, RefundDisposition::Declined(_)));

        let record = refunds.find_by_order(&OrderId::new("o1")).await.unwrap().unwrap();
        assert_eq!(record.status, RefundStatus::Failed);
        assert_eq!(bus.published_of_type(REFUND_FAILED).len(), 1);
        assert!(bus.published_of_type(REFUND_PROCESSED).is_empty());
    }

    #[tokio::test]
    async fn gateway_transport_failure_emits_failed_then_errors() {
        let gateway = MockPaymentGateway::approving();
        gateway.set_fail_refunds(true);
        let (compensator, payments, refunds, bus) = compensator(gateway);
        seed_payment(&payments, "o1").await;

        let result = compensator.handle_failure_event(&failure_envelope("o1")).await;
        assert!(matches!(result, Err(FulfillmentError::Gateway(_))));
        assert_eq!(refunds.refund_count(), 0);
        assert_eq!(bus.published_of_type(REFUND_FAILED).len(), 1);
    }

    #[tokio::test]
    async fn unrelated_detail_type_is_rejected() {
        let (compensator, _payments, _refunds, _bus) = compensator(MockPaymentGateway::approving());
        let envelope = EventEnvelope::new(
            "storefront.order-service",
            "order.placed",
            &serde_json::json!({"orderId": "o1"}),
        )
        .unwrap();

        let result = compensator.handle_failure_event(&envelope).await;
        assert!(matches!(result, Err(FulfillmentError::InvalidPayload(_))));
    }
}
