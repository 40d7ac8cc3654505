//! Bus and queue error types.

use thiserror::Error;

/// Errors that can occur when publishing to the event bus.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The bus rejected the publish (broker unreachable, topic gone).
    #[error("Failed to publish event: {0}")]
    PublishFailed(String),

    /// The event detail could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that can occur when interacting with a message queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No queue is registered under the given name.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// The receipt handle does not match an in-flight message.
    /// Stale handles (visibility timeout already elapsed) land here too.
    #[error("Receipt handle not found: {0}")]
    ReceiptNotFound(String),

    /// The queue backend is unreachable.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}
