//! The order-fulfillment saga.
//!
//! A choreography of four handlers coordinated entirely through events on
//! the bus, with compensating refunds instead of a global transaction:
//!
//! ```text
//! order.placed ──► inventory engine ──┬──► inventory.reserved ──► payment processor
//!                                     └──► inventory.reservation_failed ──► refund compensator
//! payment.succeeded ──► shipping orchestrator
//! payment.failed / order.cancelled ──► refund compensator
//! ```
//!
//! Delivery is at-least-once and unordered, so every handler either
//! tolerates duplicates (conditional creates keyed by order id) or relies on
//! the storage layer's conditional decrement to stay safe under races.
//! Business outcomes (stock shortfall, gateway decline) are never errors:
//! they surface as emitted events, and the handler invocation itself
//! succeeds.

pub mod error;
pub mod events;
pub mod gateway;
pub mod inventory;
pub mod payment;
pub mod refund;
pub mod shipping;

pub use error::FulfillmentError;
pub use events::FulfillmentEvent;
pub use gateway::{ChargeOutcome, GatewayError, MockPaymentGateway, PaymentGateway, RefundOutcome};
pub use inventory::{InventoryReservationEngine, ReservationOutcome};
pub use payment::{ChargeDisposition, ChargeRequest, PaymentProcessor};
pub use refund::{RefundCompensator, RefundDisposition};
pub use shipping::{ProgressionSchedule, ShippingOrchestrator};
