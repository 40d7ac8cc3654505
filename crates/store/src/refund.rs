//! Refund records: the compensating-transaction audit trail.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, PaymentId, RefundId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Why a refund was issued, derived from the triggering event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    InsufficientInventory,
    OrderCancelled,
}

impl RefundReason {
    /// Returns the wire form of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundReason::InsufficientInventory => "insufficient_inventory",
            RefundReason::OrderCancelled => "order_cancelled",
        }
    }
}

impl std::fmt::Display for RefundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal status of a refund attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Processed,
    Failed,
}

/// Reference to the payment a refund reverses.
///
/// Not every failure path has a prior charge, but a refund record is written
/// regardless; the `not_found` sentinel marks the no-payment case on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PaymentRef {
    Payment(PaymentId),
    NotFound,
}

impl PaymentRef {
    /// Wire sentinel for the no-payment case.
    pub const NOT_FOUND: &'static str = "not_found";
}

impl From<PaymentRef> for String {
    fn from(value: PaymentRef) -> Self {
        match value {
            PaymentRef::Payment(id) => id.to_string(),
            PaymentRef::NotFound => PaymentRef::NOT_FOUND.to_string(),
        }
    }
}

impl TryFrom<String> for PaymentRef {
    type Error = uuid::Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        if value == PaymentRef::NOT_FOUND {
            return Ok(PaymentRef::NotFound);
        }
        Ok(PaymentRef::Payment(PaymentId::from_uuid(value.parse::<Uuid>()?)))
    }
}

impl std::fmt::Display for PaymentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentRef::Payment(id) => write!(f, "{id}"),
            PaymentRef::NotFound => write!(f, "{}", PaymentRef::NOT_FOUND),
        }
    }
}

/// A persisted refund. Created even when no payment was found, because the
/// compensator's job is to leave an audit trail regardless of whether money
/// actually moved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRecord {
    pub refund_id: RefundId,
    pub order_id: OrderId,
    pub payment_id: PaymentRef,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub reason: RefundReason,
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefundRecord {
    /// Creates a record stamped with the current time.
    pub fn new(
        refund_id: RefundId,
        order_id: OrderId,
        payment_id: PaymentRef,
        customer_id: CustomerId,
        amount: Money,
        reason: RefundReason,
        status: RefundStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            refund_id,
            order_id,
            payment_id,
            customer_id,
            amount,
            reason,
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Trait for refund record persistence.
#[async_trait]
pub trait RefundStore: Send + Sync {
    /// Persists a refund record. Conditional create: rejected with
    /// `DuplicateRefund` if a processed refund already exists for the same
    /// order, so duplicate delivery cannot double-refund.
    async fn create(&self, record: RefundRecord) -> Result<()>;

    /// Looks up the refund for an order, preferring a processed one.
    async fn find_by_order(&self, order_id: &OrderId) -> Result<Option<RefundRecord>>;
}

#[derive(Debug, Default)]
struct InMemoryRefundState {
    refunds: HashMap<RefundId, RefundRecord>,
    fail_on_write: bool,
}

/// In-memory refund store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRefundStore {
    state: Arc<RwLock<InMemoryRefundState>>,
}

impl InMemoryRefundStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures writes to fail, simulating an unreachable backend.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.state.write().unwrap().fail_on_write = fail;
    }

    /// Returns the number of stored refund records.
    pub fn refund_count(&self) -> usize {
        self.state.read().unwrap().refunds.len()
    }
}

#[async_trait]
impl RefundStore for InMemoryRefundStore {
    async fn create(&self, record: RefundRecord) -> Result<()> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_write {
            return Err(StoreError::Unavailable("refund store".to_string()));
        }

        let duplicate = state
            .refunds
            .values()
            .any(|r| r.order_id == record.order_id && r.status == RefundStatus::Processed);
        if duplicate {
            return Err(StoreError::DuplicateRefund(record.order_id));
        }

        state.refunds.insert(record.refund_id, record);
        Ok(())
    }

    async fn find_by_order(&self, order_id: &OrderId) -> Result<Option<RefundRecord>> {
        let state = self.state.read().unwrap();

        let mut found: Option<RefundRecord> = None;
        for refund in state.refunds.values().filter(|r| r.order_id == *order_id) {
            if refund.status == RefundStatus::Processed {
                return Ok(Some(refund.clone()));
            }
            found.get_or_insert_with(|| refund.clone());
        }
        Ok(found)
    }
}
