//! Table-driven call lifecycle
//!
//! Every legal transition of a call session is a row in a static master
//! table keyed by (direction, state, event). The engine looks rows up to
//! decide legality, the next state, and which actions to run; an event with
//! no row is ignored where the protocol says so (stale answers, duplicate
//! signals) or rejected at the command layer. Keeping the lifecycle as data
//! makes the "no surprise transitions" property checkable in one place.

mod tables;

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

use crate::types::{CallDirection, CallOutcome, CallState};

/// Direction scope of a table row.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum DirectionKey {
    /// Row applies to outgoing sessions only.
    Outgoing,
    /// Row applies to incoming sessions only.
    Incoming,
    /// Row applies to both directions.
    Both,
}

impl From<CallDirection> for DirectionKey {
    fn from(direction: CallDirection) -> Self {
        match direction {
            CallDirection::Outgoing => DirectionKey::Outgoing,
            CallDirection::Incoming => DirectionKey::Incoming,
        }
    }
}

/// Normalized event discriminant used for table lookups.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventKind {
    // User commands
    StartCall,
    AcceptCall,
    RejectCall,
    EndCall,

    // Inbound signaling
    OfferReceived,
    AnswerReceived,
    CandidateReceived,
    RejectReceived,
    EndReceived,
    TimeoutReceived,

    // Local timers
    RingTimeout,

    // Peer connection adapter
    PeerFailed,
    PeerDisconnected,

    // Internal completions of spawned setup work
    OutgoingSetupReady,
    IncomingSetupReady,
    AnswerApplied,
    SetupFailed,
}

/// What, if anything, to publish while ending a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndPublish {
    /// Nothing; the remote already knows or was never told.
    None,
    /// `call-end`.
    End,
    /// `call-reject`.
    Reject,
    /// `call-timeout`.
    Timeout,
}

/// Side effects of a transition, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Spawn local capture + peer setup; the continuation reports back as an
    /// internal event tagged with the session id.
    AcquireLocalMedia,
    /// Publish the pending offer (retried at most once).
    PublishOffer,
    /// Publish the negotiated answer (retried at most once).
    PublishAnswer,
    /// Spawn applying the remote answer to the peer connection.
    ApplyAnswer,
    /// Arm the ring timeout timer.
    StartRingTimer,
    /// Disarm the ring timeout timer.
    CancelRingTimer,
    /// Stamp `connected_at` (exactly once).
    RecordConnectedAt,
    /// Start the once-per-second duration clock.
    StartDurationClock,
    /// Feed buffered remote candidates to the now-ready peer connection.
    FlushCandidates,
    /// Surface the incoming-call UI notification.
    NotifyIncoming,
    /// Fire-and-forget push dispatch towards the remote participant.
    RequestPush,
    /// Forward (or buffer) one remote candidate; not a state change.
    ForwardCandidate,
    /// Run the full teardown path: publish per [`Transition::end_publish`],
    /// release both media handles, close the peer, cancel timers,
    /// unsubscribe, report history, notify the UI.
    EndSession,
}

/// One row of the master table.
#[derive(Debug, Clone)]
pub struct Transition {
    /// State to commit after the actions, if the row changes state.
    pub next_state: Option<CallState>,
    /// Side effects, in order.
    pub actions: &'static [Action],
    /// Outcome tag for rows that end the session with a fixed cause. Rows
    /// ending for a dynamic cause (setup failures) leave this `None` and the
    /// engine derives the tag from the triggering error.
    pub outcome: Option<CallOutcome>,
    /// What to publish while ending. Only meaningful with
    /// [`Action::EndSession`].
    pub end_publish: EndPublish,
}

impl Transition {
    fn to(next_state: CallState, actions: &'static [Action]) -> Self {
        Self {
            next_state: Some(next_state),
            actions,
            outcome: None,
            end_publish: EndPublish::None,
        }
    }

    fn stay(actions: &'static [Action]) -> Self {
        Self {
            next_state: None,
            actions,
            outcome: None,
            end_publish: EndPublish::None,
        }
    }

    fn end(outcome: Option<CallOutcome>, publish: EndPublish) -> Self {
        Self {
            next_state: Some(CallState::Ended),
            actions: &[Action::EndSession],
            outcome,
            end_publish: publish,
        }
    }
}

/// Lookup key of the master table.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct StateKey {
    pub direction: DirectionKey,
    pub state: CallState,
    pub event: EventKind,
}

/// The master transition table.
pub struct StateTable {
    rows: HashMap<StateKey, Transition>,
    /// Rows that apply in every non-terminal state (candidate forwarding).
    wildcard_rows: HashMap<(DirectionKey, EventKind), Transition>,
}

impl StateTable {
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
            wildcard_rows: HashMap::new(),
        }
    }

    fn insert(
        &mut self,
        direction: DirectionKey,
        state: CallState,
        event: EventKind,
        transition: Transition,
    ) {
        let key = StateKey {
            direction,
            state,
            event,
        };
        debug_assert!(
            !self.rows.contains_key(&key),
            "duplicate state table row: {key:?}"
        );
        self.rows.insert(key, transition);
    }

    fn insert_wildcard(&mut self, direction: DirectionKey, event: EventKind, transition: Transition) {
        self.wildcard_rows.insert((direction, event), transition);
    }

    /// Look up the transition for a session's direction/state and an event.
    ///
    /// Direction-specific rows win over `Both` rows; exact-state rows win
    /// over wildcards. Wildcards never apply in the terminal state.
    pub fn get(&self, direction: CallDirection, state: CallState, event: EventKind) -> Option<&Transition> {
        let specific: DirectionKey = direction.into();
        for dir in [specific, DirectionKey::Both] {
            let key = StateKey {
                direction: dir,
                state,
                event,
            };
            if let Some(row) = self.rows.get(&key) {
                return Some(row);
            }
        }
        if state.is_terminal() {
            return None;
        }
        for dir in [specific, DirectionKey::Both] {
            if let Some(row) = self.wildcard_rows.get(&(dir, event)) {
                return Some(row);
            }
        }
        None
    }

    /// Number of rows, wildcards included.
    pub fn len(&self) -> usize {
        self.rows.len() + self.wildcard_rows.len()
    }

    /// Whether the table is empty. It never is; this exists for symmetry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check structural soundness: every reachable non-terminal state has at
    /// least one exit, and every row ends in a known state.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let mut reachable: HashSet<CallState> = HashSet::new();
        reachable.insert(CallState::Idle);
        for row in self.rows.values() {
            if let Some(next) = row.next_state {
                reachable.insert(next);
            }
        }

        for state in reachable {
            if state.is_terminal() {
                continue;
            }
            let has_exit = self.rows.iter().any(|(key, row)| {
                key.state == state && row.next_state.map(|next| next != state).unwrap_or(false)
            });
            if !has_exit {
                errors.push(format!("state {state} has no exit transition"));
            }
        }

        for (key, row) in &self.rows {
            if matches!(row.actions.last(), Some(Action::EndSession))
                && row.next_state != Some(CallState::Ended)
            {
                errors.push(format!("row {key:?} ends the session but not in the terminal state"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// The one table every engine instance consults.
pub static MASTER_TABLE: Lazy<StateTable> = Lazy::new(|| {
    let mut table = StateTable::new();
    tables::add_outgoing_transitions(&mut table);
    tables::add_incoming_transitions(&mut table);
    tables::add_shared_transitions(&mut table);
    table
});
