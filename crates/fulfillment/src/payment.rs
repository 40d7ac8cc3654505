//! Payment processor.

use chrono::Utc;
use common::{CustomerId, Money, OrderId, PaymentId};
use event_bus::{EventBus, EventBusError, EventEnvelope};
use serde::{Deserialize, Serialize};
use store::{PaymentRecord, PaymentStatus, PaymentStore, StoreError};

use crate::error::{FulfillmentError, Result};
use crate::events::{
    self, INVENTORY_RESERVED, ORDER_PLACED, PAYMENT_FAILED, PAYMENT_SUCCEEDED, PaymentOutcomeEvent,
};
use crate::gateway::{ChargeOutcome, PaymentGateway};

const EVENT_SOURCE: &str = "storefront.payment-service";
const CURRENCY: &str = "USD";

/// The fields the processor needs from a triggering event.
///
/// Parses from either `order.placed` or `inventory.reserved`; reservation
/// events carry no monetary total, so `totalCents` defaults to zero.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    pub order_id: OrderId,
    #[serde(default = "unknown_customer", alias = "userId")]
    pub customer_id: CustomerId,
    #[serde(default)]
    pub total_cents: i64,
}

fn unknown_customer() -> CustomerId {
    CustomerId::new("unknown")
}

impl ChargeRequest {
    /// Extracts a charge request from a triggering envelope.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self> {
        match envelope.detail_type.as_str() {
            ORDER_PLACED | INVENTORY_RESERVED => events::decode(envelope),
            other => Err(FulfillmentError::InvalidPayload(format!(
                "payment processor does not consume '{other}'"
            ))),
        }
    }
}

/// How a charge request was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeDisposition {
    /// The gateway approved and the payment record was persisted.
    Charged(PaymentId),
    /// The gateway declined; a failed record was persisted. A business
    /// outcome, not an error.
    Declined(PaymentId),
    /// A succeeded payment already exists for this order; the duplicate
    /// delivery was skipped without charging.
    AlreadyProcessed,
}

/// Charges orders and persists the outcome, emitting exactly one terminal
/// event per processed request.
pub struct PaymentProcessor<P, G, B> {
    payments: P,
    gateway: G,
    bus: B,
}

impl<P, G, B> PaymentProcessor<P, G, B>
where
    P: PaymentStore,
    G: PaymentGateway,
    B: EventBus,
{
    /// Creates a new processor.
    pub fn new(payments: P, gateway: G, bus: B) -> Self {
        Self {
            payments,
            gateway,
            bus,
        }
    }

    /// Processes one charge request.
    ///
    /// Failure semantics: if persisting the record fails or the charge call
    /// fails at the transport level, `payment.failed` is still published
    /// best-effort before the error is surfaced; a failure of that publish
    /// itself is logged and swallowed so the caller's delivery
    /// acknowledgement is never blocked on it.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn handle_charge(&self, request: &ChargeRequest) -> Result<ChargeDisposition> {
        // Duplicate delivery must not double-charge: the order id is the
        // idempotency key, enforced again by the store's conditional create.
        if let Some(existing) = self.payments.find_by_order(&request.order_id).await?
            && existing.status == PaymentStatus::Succeeded
        {
            tracing::info!(payment_id = %existing.payment_id, "payment already processed, skipping duplicate");
            return Ok(ChargeDisposition::AlreadyProcessed);
        }

        let payment_id = PaymentId::new();
        let amount = Money::from_cents(request.total_cents);

        let outcome = match self.gateway.charge(amount, CURRENCY, &request.customer_id).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(%error, "charge call failed");
                self.publish_failed_best_effort(payment_id, request, amount).await;
                return Err(error.into());
            }
        };

        match outcome {
            ChargeOutcome::Approved { transaction_id } => {
                let record = PaymentRecord::new(
                    payment_id,
                    request.order_id.clone(),
                    request.customer_id.clone(),
                    amount,
                    PaymentStatus::Succeeded,
                    Some(transaction_id),
                );
                match self.payments.create(record).await {
                    Ok(()) => {}
                    Err(StoreError::DuplicatePayment(_)) => {
                        // A concurrent duplicate delivery won the
                        // conditional create between our pre-check and now.
                        tracing::warn!("concurrent duplicate charge detected, keeping first record");
                        return Ok(ChargeDisposition::AlreadyProcessed);
                    }
                    Err(error) => {
                        tracing::error!(%error, "failed to persist payment record");
                        self.publish_failed_best_effort(payment_id, request, amount).await;
                        return Err(error.into());
                    }
                }

                self.publish(PAYMENT_SUCCEEDED, &self.outcome_event(payment_id, request, amount))
                    .await?;
                metrics::counter!("payments_succeeded").increment(1);
                tracing::info!(%payment_id, "payment succeeded");
                Ok(ChargeDisposition::Charged(payment_id))
            }
            ChargeOutcome::Declined { error_code } => {
                let record = PaymentRecord::new(
                    payment_id,
                    request.order_id.clone(),
                    request.customer_id.clone(),
                    amount,
                    PaymentStatus::Failed,
                    None,
                );
                if let Err(error) = self.payments.create(record).await {
                    tracing::error!(%error, "failed to persist declined payment record");
                    self.publish_failed_best_effort(payment_id, request, amount).await;
                    return Err(error.into());
                }

                self.publish_failed_best_effort(payment_id, request, amount).await;
                metrics::counter!("payments_failed").increment(1);
                tracing::info!(%payment_id, error_code, "payment declined");
                Ok(ChargeDisposition::Declined(payment_id))
            }
        }
    }

    fn outcome_event(
        &self,
        payment_id: PaymentId,
        request: &ChargeRequest,
        amount: Money,
    ) -> PaymentOutcomeEvent {
        PaymentOutcomeEvent {
            payment_id,
            order_id: request.order_id.clone(),
            user_id: request.customer_id.clone(),
            amount_cents: amount.cents(),
            timestamp: Utc::now(),
        }
    }

    /// Publishes `payment.failed`, logging and swallowing a publish failure
    /// (the double-fault case).
    async fn publish_failed_best_effort(
        &self,
        payment_id: PaymentId,
        request: &ChargeRequest,
        amount: Money,
    ) {
        let event = self.outcome_event(payment_id, request, amount);
        if let Err(error) = self.publish(PAYMENT_FAILED, &event).await {
            tracing::error!(%error, order_id = %request.order_id, "failed to publish payment.failed");
        }
    }

    async fn publish<T: Serialize>(&self, detail_type: &str, payload: &T) -> Result<()> {
        let envelope = EventEnvelope::new(EVENT_SOURCE, detail_type, payload)
            .map_err(EventBusError::Serialization)?;
        self.bus.publish(envelope).await?;
        Ok(())
    }
}
