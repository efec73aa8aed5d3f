//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription ended by broker")]
    SubscriptionEnded,

    #[error("Channel is closed")]
    ChannelClosed,

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// True if the underlying channel can no longer carry ack/nack frames.
    pub fn is_channel_closed(&self) -> bool {
        matches!(
            self,
            QueueError::ChannelClosed
                | QueueError::Amqp(lapin::Error::InvalidChannelState(_))
                | QueueError::Amqp(lapin::Error::InvalidConnectionState(_))
        )
    }
}
