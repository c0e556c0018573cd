//! Event system for call lifecycle notifications
//!
//! UI surfaces subscribe to a broadcast stream; the engine emits and never
//! blocks on slow consumers. Emitting with no receivers is fine — events are
//! advisory, the authoritative view is the snapshot watch channel.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::types::{CallOutcome, CallState, IncomingCallInfo, ParticipantId, SessionId};

/// Events emitted by the call engine.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// An incoming call is ringing locally.
    IncomingCall {
        /// Who is calling, with what media.
        info: IncomingCallInfo,
    },

    /// The session moved to a new state.
    StateChanged {
        session_id: SessionId,
        previous: CallState,
        new_state: CallState,
    },

    /// The media session is established.
    Connected {
        session_id: SessionId,
        connected_at: DateTime<Utc>,
    },

    /// The remote party's media arrived and can be rendered.
    RemoteMediaArrived { session_id: SessionId },

    /// The session ended, on any path.
    Ended {
        session_id: SessionId,
        outcome: CallOutcome,
        /// Human-readable reason for UI display.
        reason: String,
        duration_seconds: u64,
    },

    /// A second offer arrived while a session was active and was
    /// auto-rejected to protect the active call.
    OfferRefused {
        session_id: SessionId,
        from: ParticipantId,
    },
}

/// Stream of call events for one subscriber.
pub type EventStream = BroadcastStream<CallEvent>;

/// Broadcast emitter owned by the engine, cloned into the client.
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<CallEvent>,
}

impl EventEmitter {
    /// Create an emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event. Send errors (no receivers) are ignored.
    pub fn emit(&self, event: CallEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events from this point on.
    pub fn subscribe(&self) -> EventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
