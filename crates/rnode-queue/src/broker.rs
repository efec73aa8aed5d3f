//! Broker connection abstraction.

use std::time::Duration;

use async_trait::async_trait;

use crate::delivery::BoxedDelivery;
use crate::error::QueueResult;

/// Opens subscriptions on a message broker.
///
/// Each call is one all-or-nothing attempt: connect, attach to the queue,
/// apply the prefetch limit and start consuming.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> QueueResult<Box<dyn BrokerSession>>;
}

/// A live connection with an active consumer.
#[async_trait]
pub trait BrokerSession: Send {
    /// Wait for the next delivery.
    ///
    /// `Ok(None)` means the broker ended the subscription.
    async fn next_delivery(&mut self) -> QueueResult<Option<BoxedDelivery>>;

    /// True while the underlying connection is usable.
    fn is_open(&self) -> bool;

    /// Close the connection, giving up after `grace`.
    async fn close(self: Box<Self>, grace: Duration);
}
