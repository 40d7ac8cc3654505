//! Shared types used across the fulfillment services.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{CustomerId, OrderId, PaymentId, ProductId, RefundId, ShipmentId};
