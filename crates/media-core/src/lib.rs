//! Peer connection and media capture ports for UnityNets realtime calls
//!
//! The platform's peer-to-peer media capability (offer/answer negotiation,
//! ICE, tracks) and the local capture devices are external collaborators.
//! This crate pins down the contracts the call engine orchestrates them
//! through:
//!
//! - [`MediaSource`] — opens camera/microphone capture and hands back an
//!   exclusively owned [`MediaHandle`] whose release is idempotent
//! - [`PeerConnection`] / [`PeerConnectionFactory`] — one negotiation
//!   primitive per call attempt, with connection events delivered as an
//!   owned stream
//!
//! Scriptable mock implementations live behind the `mock-media` feature.

pub mod error;
pub mod handle;
pub mod peer;
pub mod types;

#[cfg(feature = "mock-media")]
pub mod mock;

pub use error::{MediaError, MediaResult};
pub use handle::{MediaHandle, MediaHandleProbe};
pub use peer::{MediaSource, PeerConnection, PeerConnectionFactory, PeerEvent};
pub use types::{IceCandidate, SdpKind, SessionDescription};
