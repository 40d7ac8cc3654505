//! Event bus and message queue plumbing for the fulfillment saga.
//!
//! Delivery contract, which every consumer must tolerate:
//! - at-least-once: an envelope may be delivered and processed more than once
//! - unordered across producers; ordered only within a single
//!   producer-to-consumer send
//!
//! The bus is broadcast: every subscriber sees every matching published
//! event independently. Queues bound to the bus receive JSON-serialized
//! envelopes as message bodies and add visibility-timeout redelivery on top.

pub mod broker;
pub mod bus;
pub mod envelope;
pub mod error;
pub mod queue;

pub use broker::{QueueBroker, bind_queue};
pub use bus::{EventBus, InMemoryEventBus, Subscription, SubscriptionFilter};
pub use envelope::EventEnvelope;
pub use error::{EventBusError, QueueError};
pub use queue::{InMemoryQueue, Message, MessageQueue, ReceiveOptions};
