//! AMQP job queue consumer.
//!
//! This crate provides:
//! - The `Delivery` handle with exactly-once ack/nack
//! - The `Broker`/`BrokerSession` connection abstraction
//! - An AMQP implementation with bounded prefetch and manual acknowledgement
//! - In-memory doubles for tests (`test-util` feature)

pub mod amqp;
pub mod broker;
pub mod delivery;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use amqp::{AmqpBroker, QueueConfig, DEFAULT_QUEUE_NAME};
pub use broker::{Broker, BrokerSession};
pub use delivery::{BoxedDelivery, Delivery};
pub use error::{QueueError, QueueResult};
