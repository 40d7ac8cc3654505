//! Shipment records and the forward-only delivery state machine.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ShipmentId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Delivery progress of a shipment.
///
/// Progression is forward-only:
/// ```text
/// PENDING ──► SHIPPED ──► IN_TRANSIT ──► DELIVERED
/// ```
/// There is no transition out of `DELIVERED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Pending,
    Shipped,
    InTransit,
    Delivered,
}

impl ShipmentStatus {
    /// Returns the next state in the progression, or `None` from the
    /// terminal state.
    pub fn next(&self) -> Option<ShipmentStatus> {
        match self {
            ShipmentStatus::Pending => Some(ShipmentStatus::Shipped),
            ShipmentStatus::Shipped => Some(ShipmentStatus::InTransit),
            ShipmentStatus::InTransit => Some(ShipmentStatus::Delivered),
            ShipmentStatus::Delivered => None,
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentStatus::Delivered)
    }

    /// Returns the wire form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Pending => "PENDING",
            ShipmentStatus::Shipped => "SHIPPED",
            ShipmentStatus::InTransit => "IN_TRANSIT",
            ShipmentStatus::Delivered => "DELIVERED",
        }
    }
}

impl std::fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted shipment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub shipment_id: ShipmentId,
    pub order_id: OrderId,
    pub tracking_number: String,
    pub carrier: String,
    pub status: ShipmentStatus,
    pub estimated_delivery: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Trait for shipment record persistence.
#[async_trait]
pub trait ShipmentStore: Send + Sync {
    /// Persists a new shipment.
    async fn create(&self, record: ShipmentRecord) -> Result<()>;

    /// Reads a shipment by id.
    async fn get(&self, shipment_id: &ShipmentId) -> Result<Option<ShipmentRecord>>;

    /// Conditionally advances a shipment to `to`, succeeding only if `to`
    /// is the immediate successor of the stored status. Bumps `updated_at`
    /// and returns the updated record.
    async fn advance(
        &self,
        shipment_id: &ShipmentId,
        to: ShipmentStatus,
        now: DateTime<Utc>,
    ) -> Result<ShipmentRecord>;
}

#[derive(Debug, Default)]
struct InMemoryShipmentState {
    shipments: HashMap<ShipmentId, ShipmentRecord>,
    fail_on_write: bool,
}

/// In-memory shipment store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShipmentStore {
    state: Arc<RwLock<InMemoryShipmentState>>,
}

impl InMemoryShipmentStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures writes to fail, simulating an unreachable backend.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.state.write().unwrap().fail_on_write = fail;
    }

    /// Returns the number of stored shipments.
    pub fn shipment_count(&self) -> usize {
        self.state.read().unwrap().shipments.len()
    }

    /// Returns the shipment for an order, for assertions.
    pub fn find_by_order(&self, order_id: &OrderId) -> Option<ShipmentRecord> {
        self.state
            .read()
            .unwrap()
            .shipments
            .values()
            .find(|s| s.order_id == *order_id)
            .cloned()
    }
}

#[async_trait]
impl ShipmentStore for InMemoryShipmentStore {
    async fn create(&self, record: ShipmentRecord) -> Result<()> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_write {
            return Err(StoreError::Unavailable("shipment store".to_string()));
        }

        state.shipments.insert(record.shipment_id, record);
        Ok(())
    }

    async fn get(&self, shipment_id: &ShipmentId) -> Result<Option<ShipmentRecord>> {
        let state = self.state.read().unwrap();
        Ok(state.shipments.get(shipment_id).cloned())
    }

    async fn advance(
        &self,
        shipment_id: &ShipmentId,
        to: ShipmentStatus,
        now: DateTime<Utc>,
    ) -> Result<ShipmentRecord> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_write {
            return Err(StoreError::Unavailable("shipment store".to_string()));
        }

        let record = state
            .shipments
            .get_mut(shipment_id)
            .ok_or_else(|| StoreError::RecordNotFound(shipment_id.to_string()))?;

        if record.status.next() != Some(to) {
            return Err(StoreError::InvalidTransition {
                shipment_id: *shipment_id,
                from: record.status,
                to,
            });
        }

        record.status = to;
        record.updated_at = now;
        tracing::debug!(%shipment_id, status = %to, "shipment status advanced");
        Ok(record.clone())
    }
}
