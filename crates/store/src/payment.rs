//! Payment records, indexed by order for refund reverse lookup.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Terminal status of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
}

impl PaymentStatus {
    /// Returns the wire form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted payment attempt. An order has at most one succeeded payment,
/// enforced by the store's conditional create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub status: PaymentStatus,
    /// Gateway transaction id, present only for succeeded charges. Needed
    /// by the refund compensator to reverse the charge.
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Creates a record stamped with the current time.
    pub fn new(
        payment_id: PaymentId,
        order_id: OrderId,
        customer_id: CustomerId,
        amount: Money,
        status: PaymentStatus,
        transaction_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            payment_id,
            order_id,
            customer_id,
            amount,
            status,
            transaction_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Trait for payment record persistence.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Persists a payment record. Conditional create: rejected with
    /// `DuplicatePayment` if a succeeded payment already exists for the
    /// same order. A failed attempt does not block a retry.
    async fn create(&self, record: PaymentRecord) -> Result<()>;

    /// Reverse lookup by order id. When both failed and succeeded attempts
    /// exist for an order, the succeeded one is returned.
    async fn find_by_order(&self, order_id: &OrderId) -> Result<Option<PaymentRecord>>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<PaymentId, PaymentRecord>,
    fail_on_write: bool,
}

/// In-memory payment store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures writes to fail, simulating an unreachable backend.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.state.write().unwrap().fail_on_write = fail;
    }

    /// Returns the number of stored payment records.
    pub fn payment_count(&self) -> usize {
        self.state.read().unwrap().payments.len()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, record: PaymentRecord) -> Result<()> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_write {
            return Err(StoreError::Unavailable("payment store".to_string()));
        }

        let duplicate = state.payments.values().any(|p| {
            p.order_id == record.order_id && p.status == PaymentStatus::Succeeded
        });
        if duplicate {
            return Err(StoreError::DuplicatePayment(record.order_id));
        }

        state.payments.insert(record.payment_id, record);
        Ok(())
    }

    async fn find_by_order(&self, order_id: &OrderId) -> Result<Option<PaymentRecord>> {
        let state = self.state.read().unwrap();

        let mut found: Option<PaymentRecord> = None;
        for payment in state.payments.values().filter(|p| p.order_id == *order_id) {
            if payment.status == PaymentStatus::Succeeded {
                return Ok(Some(payment.clone()));
            }
            found.get_or_insert_with(|| payment.clone());
        }
        Ok(found)
    }
}
