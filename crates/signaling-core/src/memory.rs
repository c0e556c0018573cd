//! In-memory signaling hub for tests and local loopback
//!
//! Models the hosted pub/sub service: every client subscribed to a channel
//! receives every publish on that channel, including echoes of its own.
//! Publishing to a channel nobody is subscribed to silently drops the
//! message, matching the best-effort contract.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::ChannelKey;
use crate::error::{TransportError, TransportResult};
use crate::message::SignalMessage;
use crate::transport::{SignalStream, SignalingTransport};

const SUBSCRIBER_BUFFER: usize = 64;

struct HubState {
    /// Per-channel subscriber senders, keyed by the owning client.
    channels: DashMap<ChannelKey, Mutex<Vec<(u64, mpsc::Sender<SignalMessage>)>>>,
    next_client: AtomicU64,
}

/// Shared in-memory signaling service. Cheap to clone; all clones observe
/// the same channels.
#[derive(Clone)]
pub struct InMemoryHub {
    state: Arc<HubState>,
}

impl InMemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            state: Arc::new(HubState {
                channels: DashMap::new(),
                next_client: AtomicU64::new(0),
            }),
        }
    }

    /// Create a client handle. Each peer in a test gets its own client so
    /// that unsubscribing releases only that peer's subscription.
    pub fn client(&self) -> InMemoryTransport {
        InMemoryTransport {
            state: Arc::clone(&self.state),
            client_id: self.state.next_client.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Default for InMemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One client's view of an [`InMemoryHub`].
pub struct InMemoryTransport {
    state: Arc<HubState>,
    client_id: u64,
}

#[async_trait]
impl SignalingTransport for InMemoryTransport {
    async fn subscribe(&self, key: &ChannelKey) -> TransportResult<SignalStream> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let entry = self
            .state
            .channels
            .entry(key.clone())
            .or_insert_with(|| Mutex::new(Vec::new()));
        entry.lock().push((self.client_id, tx));
        debug!(channel = %key, client = self.client_id, "subscribed");
        Ok(SignalStream::new(rx))
    }

    async fn publish(&self, key: &ChannelKey, message: SignalMessage) -> TransportResult<()> {
        // Exercise the wire shape even in-memory so codec breakage shows up
        // in tests, not in production transports.
        let raw = message.encode()?;
        let message = SignalMessage::decode(&raw)?;

        let Some(entry) = self.state.channels.get(key) else {
            debug!(channel = %key, kind = message.kind_name(), "no subscribers, dropping");
            return Ok(());
        };

        let mut subscribers = entry.lock();
        subscribers.retain(|(client, tx)| {
            let delivered = tx.try_send(message.clone()).is_ok();
            if !delivered {
                debug!(channel = %key, client, "subscriber gone or full, pruning");
            }
            delivered
        });
        Ok(())
    }

    async fn unsubscribe(&self, key: &ChannelKey) -> TransportResult<()> {
        let entry = self
            .state
            .channels
            .get(key)
            .ok_or_else(|| TransportError::channel_closed(key.as_str()))?;
        entry.lock().retain(|(client, _)| *client != self.client_id);
        debug!(channel = %key, client = self.client_id, "unsubscribed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MediaKind, ParticipantId, SessionId};

    fn offer(sender: &str) -> SignalMessage {
        SignalMessage::offer(
            SessionId::new(),
            ParticipantId::from(sender),
            "v=0".into(),
            MediaKind::Voice,
        )
    }

    #[tokio::test]
    async fn delivers_to_all_subscribers_including_sender() {
        let hub = InMemoryHub::new();
        let alice = hub.client();
        let bob = hub.client();
        let key = ChannelKey::for_conversation("chat-1");

        let mut alice_rx = alice.subscribe(&key).await.unwrap();
        let mut bob_rx = bob.subscribe(&key).await.unwrap();

        alice.publish(&key, offer("alice")).await.unwrap();

        assert_eq!(bob_rx.recv().await.unwrap().kind_name(), "call-offer");
        // The hub echoes publishes back to the sender's own subscription.
        assert_eq!(alice_rx.recv().await.unwrap().kind_name(), "call-offer");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silently_dropped() {
        let hub = InMemoryHub::new();
        let alice = hub.client();
        let key = ChannelKey::for_conversation("chat-2");

        assert!(alice.publish(&key, offer("alice")).await.is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_releases_only_the_calling_client() {
        let hub = InMemoryHub::new();
        let alice = hub.client();
        let bob = hub.client();
        let key = ChannelKey::for_conversation("chat-3");

        let mut alice_rx = alice.subscribe(&key).await.unwrap();
        let mut bob_rx = bob.subscribe(&key).await.unwrap();

        bob.unsubscribe(&key).await.unwrap();
        alice.publish(&key, offer("alice")).await.unwrap();

        assert!(alice_rx.recv().await.is_some());
        assert!(bob_rx.recv().await.is_none());
    }
}
