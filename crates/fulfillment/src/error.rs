//! Fulfillment error types.

use event_bus::EventBusError;
use store::StoreError;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors that can occur in the saga handlers.
///
/// Business outcomes (stock shortfall, gateway decline) are never
/// represented here; they flow through emitted events. These errors are
/// infrastructure faults (let redelivery retry the whole message) or
/// contract violations (poison, drop without retry).
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// A recognized event whose payload does not validate. Poison: the
    /// message is dropped, not retried.
    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),

    /// Event bus error.
    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    /// Record store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Payment gateway transport error.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
