//! Ports to the platform's peer-to-peer media capability
//!
//! The call engine orchestrates a peer connection per call attempt; it never
//! reimplements negotiation. Implementations adapt the platform primitive
//! (browser WebRTC via wasm bindings, a native stack, or the mocks behind
//! the `mock-media` feature) to the traits below.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use unitynets_signaling_core::MediaKind;

use crate::error::MediaResult;
use crate::handle::MediaHandle;
use crate::types::{IceCandidate, SessionDescription};

/// Events a peer connection reports back to its orchestrator.
#[derive(Debug)]
pub enum PeerEvent {
    /// A locally gathered connectivity candidate to relay to the remote peer.
    LocalCandidate(IceCandidate),
    /// The remote party's media arrived. The receiver takes ownership of the
    /// handle for the rest of the session.
    RemoteMedia(MediaHandle),
    /// The direct media path is up.
    Connected,
    /// Negotiation or the established path failed irrecoverably.
    ConnectionFailed { reason: String },
    /// The established path dropped.
    Disconnected,
}

/// One peer-to-peer negotiation primitive, created per call attempt.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Produce the local session-description offer (caller side).
    async fn create_offer(&self) -> MediaResult<SessionDescription>;

    /// Apply the remote offer and produce the local answer (callee side).
    async fn accept_offer(&self, offer: SessionDescription) -> MediaResult<SessionDescription>;

    /// Apply the remote answer to a previously created offer (caller side).
    async fn apply_answer(&self, answer: SessionDescription) -> MediaResult<()>;

    /// Feed a remote connectivity candidate. Callers buffer candidates that
    /// arrive before the connection is ready and flush them afterwards.
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> MediaResult<()>;

    /// Take the connection's event stream. Yields `None` once per
    /// connection; the stream ends after [`PeerConnection::close`].
    fn take_events(&self) -> Option<mpsc::Receiver<PeerEvent>>;

    /// Tear down the connection and stop event delivery. Idempotent.
    async fn close(&self);
}

/// Creates one [`PeerConnection`] per call attempt.
pub trait PeerConnectionFactory: Send + Sync {
    /// Build a fresh connection configured for the given media kind.
    fn create(&self, media_kind: MediaKind) -> MediaResult<Arc<dyn PeerConnection>>;
}

/// Opens the local capture devices (the permission-prompt suspension point).
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Open camera/microphone capture for the given media kind.
    ///
    /// May take arbitrarily long (the platform can be showing a permission
    /// dialog); callers re-validate that the owning session is still active
    /// before using the result.
    async fn capture(&self, media_kind: MediaKind) -> MediaResult<MediaHandle>;
}
