//! Error types for the signaling transport layer

use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur while talking to the signaling service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Subscribing to a channel failed.
    #[error("subscribe failed for channel {channel}: {reason}")]
    SubscribeFailed { channel: String, reason: String },

    /// Publishing a message failed. Delivery is best-effort even on success,
    /// so this only reports failures the transport could observe locally.
    #[error("publish failed on channel {channel}: {reason}")]
    PublishFailed { channel: String, reason: String },

    /// The channel is gone (service shutdown or already unsubscribed).
    #[error("signaling channel {channel} is closed")]
    ChannelClosed { channel: String },

    /// A message could not be encoded or decoded.
    #[error("signaling codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl TransportError {
    /// Create a subscribe failure.
    pub fn subscribe_failed(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SubscribeFailed {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create a publish failure.
    pub fn publish_failed(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PublishFailed {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create a channel-closed error.
    pub fn channel_closed(channel: impl Into<String>) -> Self {
        Self::ChannelClosed {
            channel: channel.into(),
        }
    }
}
