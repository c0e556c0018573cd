//! The rows of the master transition table

use super::{Action, DirectionKey, EndPublish, EventKind, StateTable, Transition};
use crate::types::{CallOutcome, CallState};

/// Rows for sessions this participant initiated.
pub(super) fn add_outgoing_transitions(table: &mut StateTable) {
    // Idle: start a call. Capture + peer setup run off the event loop; the
    // session only becomes Calling once the offer is actually published.
    table.insert(
        DirectionKey::Outgoing,
        CallState::Idle,
        EventKind::StartCall,
        Transition::stay(&[Action::AcquireLocalMedia]),
    );
    table.insert(
        DirectionKey::Outgoing,
        CallState::Idle,
        EventKind::OutgoingSetupReady,
        Transition::to(
            CallState::Calling,
            &[Action::PublishOffer, Action::StartRingTimer, Action::RequestPush],
        ),
    );
    // Capture or offer creation failed: nothing was ever signaled, so end
    // silently. The outcome comes from the error (media-denied vs
    // negotiation-failed).
    table.insert(
        DirectionKey::Outgoing,
        CallState::Idle,
        EventKind::SetupFailed,
        Transition::end(None, EndPublish::None),
    );
    // The user bailed out while the permission prompt was still open. The
    // offer never went out, so nothing is published; the late setup result
    // is discarded by the session-id staleness check.
    table.insert(
        DirectionKey::Outgoing,
        CallState::Idle,
        EventKind::EndCall,
        Transition::end(Some(CallOutcome::Canceled), EndPublish::None),
    );

    // Calling: the remote answered. The timer stops at receipt; Connected
    // commits once the answer has been applied to the peer connection.
    table.insert(
        DirectionKey::Outgoing,
        CallState::Calling,
        EventKind::AnswerReceived,
        Transition::stay(&[Action::CancelRingTimer, Action::ApplyAnswer]),
    );
    table.insert(
        DirectionKey::Outgoing,
        CallState::Calling,
        EventKind::AnswerApplied,
        Transition::to(
            CallState::Connected,
            &[
                Action::RecordConnectedAt,
                Action::FlushCandidates,
                Action::StartDurationClock,
            ],
        ),
    );
    table.insert(
        DirectionKey::Outgoing,
        CallState::Calling,
        EventKind::SetupFailed,
        Transition::end(None, EndPublish::End),
    );

    // Calling: the attempt dies before an answer.
    table.insert(
        DirectionKey::Outgoing,
        CallState::Calling,
        EventKind::RejectReceived,
        Transition::end(Some(CallOutcome::Rejected), EndPublish::None),
    );
    table.insert(
        DirectionKey::Outgoing,
        CallState::Calling,
        EventKind::RingTimeout,
        Transition::end(Some(CallOutcome::Timeout), EndPublish::Timeout),
    );
    table.insert(
        DirectionKey::Outgoing,
        CallState::Calling,
        EventKind::EndCall,
        Transition::end(Some(CallOutcome::Canceled), EndPublish::End),
    );
    // The remote side aborted its half of the attempt (e.g. its media setup
    // failed after accepting).
    table.insert(
        DirectionKey::Outgoing,
        CallState::Calling,
        EventKind::EndReceived,
        Transition::end(Some(CallOutcome::Canceled), EndPublish::None),
    );
}

/// Rows for sessions initiated by the remote participant.
pub(super) fn add_incoming_transitions(table: &mut StateTable) {
    // A fresh offer. The engine creates the session in Idle, then this row
    // moves it straight to Ringing.
    table.insert(
        DirectionKey::Incoming,
        CallState::Idle,
        EventKind::OfferReceived,
        Transition::to(
            CallState::Ringing,
            &[Action::StartRingTimer, Action::NotifyIncoming],
        ),
    );

    // Ringing: local accept. Capture + answer negotiation run off the event
    // loop; Connected commits once the answer is published.
    table.insert(
        DirectionKey::Incoming,
        CallState::Ringing,
        EventKind::AcceptCall,
        Transition::stay(&[Action::AcquireLocalMedia]),
    );
    table.insert(
        DirectionKey::Incoming,
        CallState::Ringing,
        EventKind::IncomingSetupReady,
        Transition::to(
            CallState::Connected,
            &[
                Action::PublishAnswer,
                Action::CancelRingTimer,
                Action::RecordConnectedAt,
                Action::FlushCandidates,
                Action::StartDurationClock,
            ],
        ),
    );
    // Accept failed mid-setup. The caller still believes we are ringing, so
    // tell them it is over.
    table.insert(
        DirectionKey::Incoming,
        CallState::Ringing,
        EventKind::SetupFailed,
        Transition::end(None, EndPublish::End),
    );

    // Ringing: local decline. Hanging up while ringing means the same thing.
    table.insert(
        DirectionKey::Incoming,
        CallState::Ringing,
        EventKind::RejectCall,
        Transition::end(Some(CallOutcome::Rejected), EndPublish::Reject),
    );
    table.insert(
        DirectionKey::Incoming,
        CallState::Ringing,
        EventKind::EndCall,
        Transition::end(Some(CallOutcome::Rejected), EndPublish::Reject),
    );

    // Ringing: nobody picked up. The caller's own timer ends their side, so
    // nothing is published here.
    table.insert(
        DirectionKey::Incoming,
        CallState::Ringing,
        EventKind::RingTimeout,
        Transition::end(Some(CallOutcome::Missed), EndPublish::None),
    );
    // The caller gave up (cancel) or their timer fired first.
    table.insert(
        DirectionKey::Incoming,
        CallState::Ringing,
        EventKind::EndReceived,
        Transition::end(Some(CallOutcome::Canceled), EndPublish::None),
    );
    table.insert(
        DirectionKey::Incoming,
        CallState::Ringing,
        EventKind::TimeoutReceived,
        Transition::end(Some(CallOutcome::Missed), EndPublish::None),
    );
}

/// Rows that apply to both directions.
pub(super) fn add_shared_transitions(table: &mut StateTable) {
    // Connected: normal teardown from either side.
    table.insert(
        DirectionKey::Both,
        CallState::Connected,
        EventKind::EndCall,
        Transition::end(Some(CallOutcome::Completed), EndPublish::End),
    );
    table.insert(
        DirectionKey::Both,
        CallState::Connected,
        EventKind::EndReceived,
        Transition::end(Some(CallOutcome::Completed), EndPublish::None),
    );

    // Connected: the media path broke down. Best-effort call-end so the
    // remote does not sit on a dead call.
    table.insert(
        DirectionKey::Both,
        CallState::Connected,
        EventKind::PeerFailed,
        Transition::end(Some(CallOutcome::ConnectionFailed), EndPublish::End),
    );
    table.insert(
        DirectionKey::Both,
        CallState::Connected,
        EventKind::PeerDisconnected,
        Transition::end(Some(CallOutcome::ConnectionFailed), EndPublish::End),
    );

    // The peer connection can also fail while the caller is still awaiting
    // an answer (negotiation underway in the background).
    table.insert(
        DirectionKey::Both,
        CallState::Calling,
        EventKind::PeerFailed,
        Transition::end(Some(CallOutcome::NegotiationFailed), EndPublish::End),
    );
    table.insert(
        DirectionKey::Both,
        CallState::Calling,
        EventKind::PeerDisconnected,
        Transition::end(Some(CallOutcome::NegotiationFailed), EndPublish::End),
    );

    // Candidates are forwarded in any live state and never change state.
    table.insert_wildcard(
        DirectionKey::Both,
        EventKind::CandidateReceived,
        Transition::stay(&[Action::ForwardCandidate]),
    );
}
