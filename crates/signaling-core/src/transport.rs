//! The signaling transport contract
//!
//! The realtime messaging service is an external collaborator. The call
//! engine only depends on the three operations below, and on these delivery
//! semantics:
//!
//! - publish is best-effort with no delivery acknowledgment; stalled
//!   signaling is detected with timeouts, never with acks
//! - delivery order across distinct kinds is not guaranteed, but messages
//!   from a single sender are expected to preserve send order
//! - subscribers see their own publishes echoed back and filter on
//!   [`SignalMessage::sender_id`]

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::channel::ChannelKey;
use crate::error::TransportResult;
use crate::message::SignalMessage;

/// Owned stream of inbound messages for one subscribed channel.
///
/// Dropping the stream stops delivery but does not release the subscription;
/// call [`SignalingTransport::unsubscribe`] for that, exactly once per
/// session, on teardown.
pub struct SignalStream {
    inner: mpsc::Receiver<SignalMessage>,
}

impl SignalStream {
    /// Wrap a receiver produced by a transport implementation.
    pub fn new(inner: mpsc::Receiver<SignalMessage>) -> Self {
        Self { inner }
    }

    /// Receive the next message, or `None` once the subscription is gone.
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        self.inner.recv().await
    }
}

/// Send/subscribe contract of the signaling service.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Register for inbound messages scoped to one logical channel.
    async fn subscribe(&self, key: &ChannelKey) -> TransportResult<SignalStream>;

    /// Best-effort send to everyone subscribed to the channel.
    async fn publish(&self, key: &ChannelKey, message: SignalMessage) -> TransportResult<()>;

    /// Release this client's subscription to the channel.
    async fn unsubscribe(&self, key: &ChannelKey) -> TransportResult<()>;
}
