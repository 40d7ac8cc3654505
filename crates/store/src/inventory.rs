//! Inventory store: per-product stock levels with atomic compare-and-decrement.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Stock level for one product. The available quantity can never go
/// negative: a decrement that would violate that is rejected atomically by
/// the store, not checked client-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_id: ProductId,
    pub available: u32,
}

impl InventoryRecord {
    /// Creates a record with the given stock level.
    pub fn new(product_id: impl Into<ProductId>, available: u32) -> Self {
        Self {
            product_id: product_id.into(),
            available,
        }
    }
}

/// Trait for inventory stock operations.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Reads the current record for a product.
    async fn get(&self, product_id: &ProductId) -> Result<Option<InventoryRecord>>;

    /// Atomically decrements stock, succeeding only if the record exists
    /// and `available >= quantity`. Returns the new quantity.
    ///
    /// Under concurrent duplicate delivery this guard is what keeps stock
    /// non-negative: of two racing decrements that together exceed the
    /// available quantity, exactly one succeeds.
    async fn conditional_decrement(&self, product_id: &ProductId, quantity: u32) -> Result<u32>;

    /// Creates or replaces a record (seeding and restock).
    async fn put(&self, record: InventoryRecord) -> Result<()>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    records: HashMap<ProductId, u32>,
    fail_on_write: bool,
}

/// In-memory inventory store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures writes to fail, simulating an unreachable backend.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.state.write().unwrap().fail_on_write = fail;
    }

    /// Returns the current available quantity, for assertions.
    pub fn available(&self, product_id: &ProductId) -> Option<u32> {
        self.state.read().unwrap().records.get(product_id).copied()
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn get(&self, product_id: &ProductId) -> Result<Option<InventoryRecord>> {
        let state = self.state.read().unwrap();
        Ok(state
            .records
            .get(product_id)
            .map(|available| InventoryRecord::new(product_id.clone(), *available)))
    }

    async fn conditional_decrement(&self, product_id: &ProductId, quantity: u32) -> Result<u32> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_write {
            return Err(StoreError::Unavailable("inventory store".to_string()));
        }

        let available = state
            .records
            .get_mut(product_id)
            .ok_or_else(|| StoreError::RecordNotFound(product_id.to_string()))?;

        if *available < quantity {
            return Err(StoreError::InsufficientStock {
                product_id: product_id.clone(),
                requested: quantity,
                available: *available,
            });
        }

        *available -= quantity;
        tracing::debug!(%product_id, quantity, remaining = *available, "stock decremented");
        Ok(*available)
    }

    async fn put(&self, record: InventoryRecord) -> Result<()> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_write {
            return Err(StoreError::Unavailable("inventory store".to_string()));
        }

        state.records.insert(record.product_id, record.available);
        Ok(())
    }
}
