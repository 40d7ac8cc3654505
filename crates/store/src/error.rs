//! Store error types.

use common::{OrderId, ProductId, ShipmentId};
use thiserror::Error;

use crate::shipment::ShipmentStatus;

/// Errors that can occur when interacting with the record stores.
///
/// The conditional-write rejections (`InsufficientStock`,
/// `DuplicatePayment`, `DuplicateRefund`, `InvalidTransition`) are expected
/// outcomes the handlers branch on; only `Unavailable` represents a real
/// infrastructure fault.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional decrement was rejected: the available quantity did not
    /// cover the request at write time.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The keyed record does not exist.
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// A succeeded payment already exists for this order (conditional
    /// create rejected).
    #[error("A succeeded payment already exists for order {0}")]
    DuplicatePayment(OrderId),

    /// A processed refund already exists for this order (conditional
    /// create rejected).
    #[error("A processed refund already exists for order {0}")]
    DuplicateRefund(OrderId),

    /// A shipment status write was rejected because the target state is not
    /// the immediate successor of the stored state.
    #[error("Invalid shipment transition for {shipment_id}: {from} -> {to}")]
    InvalidTransition {
        shipment_id: ShipmentId,
        from: ShipmentStatus,
        to: ShipmentStatus,
    },

    /// The store backend is unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
