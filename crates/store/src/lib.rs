//! Record stores for the fulfillment saga.
//!
//! Every table is keyed for single-writer-at-a-time semantics per key via
//! conditional writes; there are no multi-key transactions. The one
//! concurrency-correctness primitive the whole saga depends on is the
//! inventory compare-and-decrement: a write that only succeeds if the
//! precondition on current state holds, enforced atomically by the store.

pub mod error;
pub mod inventory;
pub mod payment;
pub mod refund;
pub mod schedule;
pub mod shipment;

pub use error::{Result, StoreError};
pub use inventory::{InMemoryInventoryStore, InventoryRecord, InventoryStore};
pub use payment::{InMemoryPaymentStore, PaymentRecord, PaymentStatus, PaymentStore};
pub use refund::{InMemoryRefundStore, PaymentRef, RefundReason, RefundRecord, RefundStatus, RefundStore};
pub use schedule::{InMemoryTransitionSchedule, ScheduledTransition, TransitionSchedule};
pub use shipment::{InMemoryShipmentStore, ShipmentRecord, ShipmentStatus, ShipmentStore};
