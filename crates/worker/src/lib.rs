//! Queue worker for the inventory reservation engine.
//!
//! Long-polls the queue bound to the `order.placed` topic, dispatches each
//! message through the engine, and acknowledges per message: a handler
//! failure leaves its message un-acknowledged for redelivery, without
//! blocking its batch siblings.

pub mod config;
pub mod worker;

pub use config::WorkerConfig;
pub use worker::{MessageOutcome, QueueWorker};
