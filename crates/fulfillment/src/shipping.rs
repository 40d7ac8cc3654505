//! Shipping orchestrator and the carrier-progress simulation.

use chrono::{DateTime, Duration, Utc};
use common::ShipmentId;
use event_bus::{EventBus, EventBusError, EventEnvelope};
use serde::Serialize;
use store::{
    ScheduledTransition, ShipmentRecord, ShipmentStatus, ShipmentStore, StoreError,
    TransitionSchedule,
};
use uuid::Uuid;

use crate::error::Result;
use crate::events::{PaymentOutcomeEvent, SHIPMENT_CREATED, SHIPMENT_STATUS_UPDATED, ShipmentEvent};

const EVENT_SOURCE: &str = "storefront.shipping-service";
const CARRIER: &str = "FedEx";

/// Timing of the simulated carrier progression.
#[derive(Debug, Clone)]
pub struct ProgressionSchedule {
    /// Offset of the estimated delivery date from shipment creation.
    pub delivery_estimate: Duration,
    /// Delay from creation to `SHIPPED`.
    pub to_shipped: Duration,
    /// Delay from `SHIPPED` to `IN_TRANSIT`.
    pub to_in_transit: Duration,
    /// Delay from `IN_TRANSIT` to `DELIVERED`.
    pub to_delivered: Duration,
}

impl Default for ProgressionSchedule {
    fn default() -> Self {
        Self {
            delivery_estimate: Duration::days(5),
            to_shipped: Duration::seconds(3),
            to_in_transit: Duration::seconds(3),
            to_delivered: Duration::seconds(4),
        }
    }
}

impl ProgressionSchedule {
    fn delay_to(&self, to: ShipmentStatus) -> Duration {
        match to {
            ShipmentStatus::Shipped => self.to_shipped,
            ShipmentStatus::InTransit => self.to_in_transit,
            ShipmentStatus::Delivered => self.to_delivered,
            ShipmentStatus::Pending => Duration::zero(),
        }
    }
}

/// Creates shipments on successful payment and drives them through the
/// delivery state machine.
///
/// Progression is simulated carrier progress, not real tracking: each
/// transition is a task in a durable schedule, so pending transitions
/// survive a process restart instead of dying with in-process timers.
pub struct ShippingOrchestrator<S, T, B> {
    shipments: S,
    schedule: T,
    bus: B,
    progression: ProgressionSchedule,
}

impl<S, T, B> ShippingOrchestrator<S, T, B>
where
    S: ShipmentStore,
    T: TransitionSchedule,
    B: EventBus,
{
    /// Creates an orchestrator with the default progression timing.
    pub fn new(shipments: S, schedule: T, bus: B) -> Self {
        Self::with_progression(shipments, schedule, bus, ProgressionSchedule::default())
    }

    /// Creates an orchestrator with explicit progression timing.
    pub fn with_progression(
        shipments: S,
        schedule: T,
        bus: B,
        progression: ProgressionSchedule,
    ) -> Self {
        Self {
            shipments,
            schedule,
            bus,
            progression,
        }
    }

    /// Creates a `PENDING` shipment for a paid order and schedules the
    /// first carrier transition.
    #[tracing::instrument(skip(self, payment), fields(order_id = %payment.order_id))]
    pub async fn handle_payment_succeeded(
        &self,
        payment: &PaymentOutcomeEvent,
        now: DateTime<Utc>,
    ) -> Result<ShipmentRecord> {
        let shipment_id = ShipmentId::new();
        let record = ShipmentRecord {
            shipment_id,
            order_id: payment.order_id.clone(),
            tracking_number: synthesize_tracking_number(),
            carrier: CARRIER.to_string(),
            status: ShipmentStatus::Pending,
            estimated_delivery: now + self.progression.delivery_estimate,
            created_at: now,
            updated_at: now,
        };

        self.shipments.create(record.clone()).await?;
        self.publish(SHIPMENT_CREATED, &shipment_event(&record)).await?;

        self.schedule
            .schedule(ScheduledTransition::new(
                shipment_id,
                ShipmentStatus::Shipped,
                now + self.progression.to_shipped,
            ))
            .await?;

        metrics::counter!("shipments_created").increment(1);
        tracing::info!(%shipment_id, tracking_number = %record.tracking_number, "shipment created");
        Ok(record)
    }

    /// Applies every transition due at `now`: advances the shipment,
    /// publishes the status update, and schedules the next leg. Returns the
    /// number of transitions applied.
    ///
    /// A task that no longer matches the stored state (duplicate delivery,
    /// stale schedule) is skipped; the machine is forward-only and the
    /// store's conditional write is what enforces it.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.schedule.due(now).await?;
        let mut applied = 0;

        for task in due {
            match self.shipments.advance(&task.shipment_id, task.to, now).await {
                Ok(record) => {
                    self.publish(SHIPMENT_STATUS_UPDATED, &shipment_event(&record)).await?;
                    metrics::counter!("shipment_transitions").increment(1);
                    tracing::info!(shipment_id = %record.shipment_id, status = %record.status, "shipment advanced");

                    if let Some(next) = record.status.next() {
                        self.schedule
                            .schedule(ScheduledTransition::new(
                                record.shipment_id,
                                next,
                                now + self.progression.delay_to(next),
                            ))
                            .await?;
                    }
                    applied += 1;
                }
                Err(StoreError::InvalidTransition { from, to, .. }) => {
                    tracing::warn!(shipment_id = %task.shipment_id, %from, %to, "skipping stale shipment transition");
                }
                Err(StoreError::RecordNotFound(_)) => {
                    tracing::warn!(shipment_id = %task.shipment_id, "skipping transition for unknown shipment");
                }
                Err(error) => return Err(error.into()),
            }
        }

        Ok(applied)
    }

    /// Polls the transition schedule indefinitely. Errors are logged and
    /// the driver keeps going; a restart resumes from the durable schedule.
    pub async fn run_progression(&self, poll_interval: std::time::Duration) {
        tracing::info!(?poll_interval, "shipment progression driver started");
        loop {
            if let Err(error) = self.run_due(Utc::now()).await {
                tracing::error!(%error, "shipment progression pass failed");
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn publish<P: Serialize>(&self, detail_type: &str, payload: &P) -> Result<()> {
        let envelope = EventEnvelope::new(EVENT_SOURCE, detail_type, payload)
            .map_err(EventBusError::Serialization)?;
        self.bus.publish(envelope).await?;
        Ok(())
    }
}

fn shipment_event(record: &ShipmentRecord) -> ShipmentEvent {
    ShipmentEvent {
        shipment_id: record.shipment_id,
        order_id: record.order_id.clone(),
        status: record.status,
        tracking_number: record.tracking_number.clone(),
        estimated_delivery: record.estimated_delivery,
    }
}

fn synthesize_tracking_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("TRK{}", &suffix[..12].to_uppercase())
}
