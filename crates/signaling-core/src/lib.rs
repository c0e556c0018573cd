//! Signaling transport contract and wire model for UnityNets realtime calls
//!
//! This crate defines everything two peers need to exchange before and while
//! a direct media session exists: the wire message model (offer, answer, ICE
//! candidates, teardown notices), the channel-key derivation both peers use to
//! land on the same pub/sub channel, and the [`SignalingTransport`] contract
//! the call engine programs against.
//!
//! The transport itself is an external collaborator (the hosted realtime
//! messaging service). This crate only pins down its contract:
//!
//! - `subscribe` hands back an owned stream of inbound messages for one channel
//! - `publish` is best-effort: there is no delivery acknowledgment, so callers
//!   detect stalled signaling with timeouts, never with acks
//! - `unsubscribe` releases the subscription, called exactly once per session
//!
//! An [`InMemoryHub`] implementation is included for tests and local loopback.
//!
//! # Example
//!
//! ```rust
//! use unitynets_signaling_core::{
//!     ChannelKey, InMemoryHub, MediaKind, ParticipantId, SessionId, SignalMessage,
//!     SignalingTransport,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = InMemoryHub::new();
//! let alice = hub.client();
//! let bob = hub.client();
//!
//! let alice_id = ParticipantId::from("alice");
//! let bob_id = ParticipantId::from("bob");
//! let key = ChannelKey::for_pair(&alice_id, &bob_id);
//!
//! let mut inbound = bob.subscribe(&key).await?;
//! let offer = SignalMessage::offer(
//!     SessionId::new(),
//!     alice_id,
//!     "v=0...".to_string(),
//!     MediaKind::Voice,
//! );
//! alice.publish(&key, offer).await?;
//!
//! let received = inbound.recv().await.expect("message delivered");
//! assert_eq!(received.kind_name(), "call-offer");
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod error;
pub mod memory;
pub mod message;
pub mod transport;
pub mod types;

pub use channel::ChannelKey;
pub use error::{TransportError, TransportResult};
pub use memory::{InMemoryHub, InMemoryTransport};
pub use message::{AnswerPayload, CandidatePayload, OfferPayload, SignalBody, SignalMessage};
pub use transport::{SignalStream, SignalingTransport};
pub use types::{MediaKind, ParticipantId, SessionId};
