//! Queue delivery handle.

use async_trait::async_trait;

use crate::error::QueueResult;

/// One message pulled from the queue.
///
/// `ack` and `nack` consume the handle, so a delivery is resolved at most once.
/// Whoever holds the handle must resolve it before dropping it; a dropped
/// handle is only redelivered once the broker notices the channel is gone.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Raw message body.
    fn body(&self) -> &[u8];

    /// Broker-assigned tag, unique per channel.
    fn delivery_tag(&self) -> u64;

    /// True if the broker has handed this message out before.
    fn redelivered(&self) -> bool {
        false
    }

    /// True while the channel the message arrived on is still open.
    fn channel_open(&self) -> bool;

    /// Acknowledge the message; the broker forgets it.
    async fn ack(self: Box<Self>) -> QueueResult<()>;

    /// Reject the message, optionally putting it back on the queue.
    async fn nack(self: Box<Self>, requeue: bool) -> QueueResult<()>;
}

pub type BoxedDelivery = Box<dyn Delivery>;
