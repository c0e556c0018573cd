//! Call-level types
//!
//! The state enum, the direction/outcome vocabulary, and the read-only views
//! the engine hands to its consumers: [`CallSnapshot`] (what the UI renders)
//! and [`CallHistoryRecord`] (what the persistence collaborator receives).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use unitynets_signaling_core::{MediaKind, ParticipantId, SessionId};

/// Lifecycle state of a call session.
///
/// `Ended` is terminal for the session instance: a fresh session is created
/// for any subsequent call, never a reset of an ended one, so stale handles
/// and timers cannot leak across attempts.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// Session created, setup not yet committed.
    Idle,
    /// Outgoing, offer published, awaiting the remote answer.
    Calling,
    /// Incoming, offer received, awaiting the local accept/reject.
    Ringing,
    /// Media session established.
    Connected,
    /// Terminal.
    Ended,
}

impl CallState {
    /// Whether this is the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended)
    }

    /// Whether a session in this state counts as the one active call.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::Calling => "calling",
            CallState::Ringing => "ringing",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
        };
        write!(f, "{}", name)
    }
}

/// Which side initiated the session. Set at creation, immutable.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Outgoing => write!(f, "outgoing"),
            CallDirection::Incoming => write!(f, "incoming"),
        }
    }
}

/// Why a session ended. Written exactly once — the first writer wins and
/// later end paths keep the original tag.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallOutcome {
    /// The call connected and one side hung up.
    Completed,
    /// The attempt was abandoned before an answer (either side).
    Canceled,
    /// The callee declined, or a busy peer auto-rejected.
    Rejected,
    /// The callee never answered (their own ring timer ended it).
    Missed,
    /// The caller's ring timer elapsed without an answer.
    Timeout,
    /// Camera/microphone permission was denied or the device failed.
    MediaDenied,
    /// Signaling could not be delivered even after retrying.
    ConnectionFailed,
    /// Peer negotiation failed or the media path broke down.
    NegotiationFailed,
}

impl CallOutcome {
    /// Stable string form used in history records and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Completed => "completed",
            CallOutcome::Canceled => "canceled",
            CallOutcome::Rejected => "rejected",
            CallOutcome::Missed => "missed",
            CallOutcome::Timeout => "timeout",
            CallOutcome::MediaDenied => "media-denied",
            CallOutcome::ConnectionFailed => "connection-failed",
            CallOutcome::NegotiationFailed => "negotiation-failed",
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only view of the active session, published through a watch channel.
///
/// UI surfaces render from this and issue commands; they never mutate call
/// state directly.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub session_id: SessionId,
    pub direction: CallDirection,
    pub media_kind: MediaKind,
    pub state: CallState,
    pub local_participant: ParticipantId,
    pub remote_participant: ParticipantId,
    /// Local audio muted (media-level, no signaling involved).
    pub muted: bool,
    /// Local video track disabled.
    pub video_suppressed: bool,
    /// Whole seconds since `connected_at`; 0 before connect, frozen at end.
    pub duration_seconds: u64,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<CallOutcome>,
}

/// What the engine reports to the external call-history collaborator when a
/// session ends.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryRecord {
    pub session_id: SessionId,
    pub caller_id: ParticipantId,
    pub receiver_id: ParticipantId,
    pub media_kind: MediaKind,
    pub outcome: CallOutcome,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: u64,
}

/// Details of an incoming call surfaced to the UI (and to the push
/// collaborator for offline delivery).
#[derive(Debug, Clone)]
pub struct IncomingCallInfo {
    pub session_id: SessionId,
    pub from: ParticipantId,
    pub media_kind: MediaKind,
}

/// Format a duration in whole seconds as `MM:SS`. Minutes keep growing past
/// an hour; the UI decides whether to re-bucket.
pub fn format_duration(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_pads_and_grows() {
        assert_eq!(format_duration(0), "00:00");
        assert_eq!(format_duration(9), "00:09");
        assert_eq!(format_duration(65), "01:05");
        assert_eq!(format_duration(3600), "60:00");
        assert_eq!(format_duration(6000), "100:00");
    }

    #[test]
    fn only_ended_is_terminal() {
        for state in [
            CallState::Idle,
            CallState::Calling,
            CallState::Ringing,
            CallState::Connected,
        ] {
            assert!(state.is_active(), "{state} should be active");
        }
        assert!(CallState::Ended.is_terminal());
    }

    #[test]
    fn outcome_strings_are_wire_stable() {
        assert_eq!(CallOutcome::MediaDenied.as_str(), "media-denied");
        assert_eq!(
            serde_json::to_string(&CallOutcome::ConnectionFailed).unwrap(),
            "\"connection-failed\""
        );
    }
}
