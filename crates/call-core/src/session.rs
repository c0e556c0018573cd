//! The mutable call session record
//!
//! One `CallSession` exists per call attempt and is owned exclusively by the
//! engine task; everything else sees snapshots. The record carries the
//! identifiers, the timestamps (each set exactly once), the media handles,
//! the candidate buffer, and the spawned task handles that must die with the
//! session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

use unitynets_media_core::{IceCandidate, MediaHandle, PeerConnection, SessionDescription};
use unitynets_signaling_core::ChannelKey;

use crate::types::{
    CallDirection, CallOutcome, CallSnapshot, CallState, MediaKind, ParticipantId, SessionId,
};

pub(crate) struct CallSession {
    pub session_id: SessionId,
    pub direction: CallDirection,
    pub media_kind: MediaKind,
    pub state: CallState,
    pub remote: ParticipantId,
    pub channel: ChannelKey,

    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    /// First writer wins; never overwritten once set.
    pub outcome: Option<CallOutcome>,
    pub end_reason: Option<String>,

    pub muted: bool,
    pub video_suppressed: bool,

    pub local_media: Option<MediaHandle>,
    pub remote_media: Option<MediaHandle>,

    pub peer: Option<Arc<dyn PeerConnection>>,
    /// Whether the peer connection can accept remote candidates yet.
    pub peer_ready: bool,
    /// The remote offer, held until the local user accepts.
    pub pending_offer: Option<SessionDescription>,
    /// Remote candidates that arrived before the peer was ready.
    pub pending_candidates: Vec<IceCandidate>,

    /// Advanced by the duration clock while connected; frozen at end.
    pub duration_seconds: u64,

    pub ring_timer: Option<JoinHandle<()>>,
    pub duration_clock: Option<JoinHandle<()>>,
    pub peer_pump: Option<JoinHandle<()>>,
}

impl CallSession {
    /// Session for a locally initiated call. Starts in `Idle`; it becomes
    /// `Calling` only once the offer is actually published.
    pub fn outgoing(remote: ParticipantId, media_kind: MediaKind, channel: ChannelKey) -> Self {
        Self::new(SessionId::new(), CallDirection::Outgoing, remote, media_kind, channel)
    }

    /// Session for a remotely initiated call, adopting the offer's session
    /// id so both sides correlate on the same attempt.
    pub fn incoming(
        session_id: SessionId,
        remote: ParticipantId,
        media_kind: MediaKind,
        channel: ChannelKey,
        offer: SessionDescription,
    ) -> Self {
        let mut session = Self::new(session_id, CallDirection::Incoming, remote, media_kind, channel);
        session.pending_offer = Some(offer);
        session
    }

    fn new(
        session_id: SessionId,
        direction: CallDirection,
        remote: ParticipantId,
        media_kind: MediaKind,
        channel: ChannelKey,
    ) -> Self {
        Self {
            session_id,
            direction,
            media_kind,
            state: CallState::Idle,
            remote,
            channel,
            started_at: Utc::now(),
            connected_at: None,
            ended_at: None,
            outcome: None,
            end_reason: None,
            muted: false,
            video_suppressed: false,
            local_media: None,
            remote_media: None,
            peer: None,
            peer_ready: false,
            pending_offer: None,
            pending_candidates: Vec::new(),
            duration_seconds: 0,
            ring_timer: None,
            duration_clock: None,
            peer_pump: None,
        }
    }

    /// Set the end-of-call outcome. The first writer wins; later end paths
    /// keep the original tag.
    pub fn set_outcome(&mut self, outcome: CallOutcome, reason: impl Into<String>) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
            self.end_reason = Some(reason.into());
        } else {
            debug!(
                session_id = %self.session_id,
                kept = ?self.outcome,
                dropped = ?outcome,
                "outcome already set, keeping first writer"
            );
        }
    }

    /// Stamp `connected_at`, exactly once.
    pub fn mark_connected(&mut self, now: DateTime<Utc>) {
        if self.connected_at.is_none() {
            self.connected_at = Some(now);
        }
    }

    /// Stamp `ended_at`, exactly once.
    pub fn mark_ended(&mut self, now: DateTime<Utc>) {
        if self.ended_at.is_none() {
            self.ended_at = Some(now);
        }
    }

    /// Release both media handles. Idempotent per handle.
    pub fn release_media(&mut self) {
        if let Some(handle) = &self.local_media {
            handle.release();
        }
        if let Some(handle) = &self.remote_media {
            handle.release();
        }
    }

    /// Abort every task spawned for this session.
    pub fn cancel_tasks(&mut self) {
        for task in [
            self.ring_timer.take(),
            self.duration_clock.take(),
            self.peer_pump.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }

    /// Disarm the ring timer only.
    pub fn cancel_ring_timer(&mut self) {
        if let Some(timer) = self.ring_timer.take() {
            timer.abort();
        }
    }

    /// Read-only view for the UI.
    pub fn snapshot(&self, local: &ParticipantId) -> CallSnapshot {
        CallSnapshot {
            session_id: self.session_id,
            direction: self.direction,
            media_kind: self.media_kind,
            state: self.state,
            local_participant: local.clone(),
            remote_participant: self.remote.clone(),
            muted: self.muted,
            video_suppressed: self.video_suppressed,
            duration_seconds: self.duration_seconds,
            started_at: self.started_at,
            connected_at: self.connected_at,
            ended_at: self.ended_at,
            outcome: self.outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CallSession {
        CallSession::outgoing(
            ParticipantId::from("bob"),
            MediaKind::Voice,
            ChannelKey::for_conversation("chat-1"),
        )
    }

    #[test]
    fn outcome_first_writer_wins() {
        let mut session = session();
        session.set_outcome(CallOutcome::Timeout, "no answer");
        session.set_outcome(CallOutcome::Completed, "remote hung up");

        assert_eq!(session.outcome, Some(CallOutcome::Timeout));
        assert_eq!(session.end_reason.as_deref(), Some("no answer"));
    }

    #[test]
    fn timestamps_are_set_exactly_once() {
        let mut session = session();
        let first = Utc::now();
        session.mark_connected(first);
        session.mark_ended(first);

        let later = first + chrono::Duration::seconds(10);
        session.mark_connected(later);
        session.mark_ended(later);

        assert_eq!(session.connected_at, Some(first));
        assert_eq!(session.ended_at, Some(first));
    }

    #[test]
    fn release_media_tolerates_missing_and_double_release() {
        let mut session = session();
        session.release_media();

        let handle = MediaHandle::new("mic", MediaKind::Voice);
        let probe = handle.probe();
        session.local_media = Some(handle);
        session.release_media();
        session.release_media();

        assert!(probe.is_released());
    }
}
