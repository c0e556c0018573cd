//! The call engine event loop
//!
//! One tokio task owns the single `CallSession` and reacts to everything:
//! user commands, inbound signaling, peer connection events, timers, and the
//! completions of spawned setup work. No two transitions run concurrently —
//! every handler runs to completion before the next event is taken, so the
//! transition table can assume exclusive access to the session.
//!
//! Slow work (opening capture devices while a permission prompt is up,
//! offer/answer negotiation) never blocks the loop: it is spawned, tagged
//! with the owning session id, and reports back as an internal event. On
//! arrival the engine re-validates that the session is still the active one
//! and discards stale results, releasing any resources they carried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use unitynets_media_core::{
    IceCandidate, MediaError, MediaHandle, MediaSource, PeerConnection, PeerConnectionFactory,
    PeerEvent, SessionDescription,
};
use unitynets_signaling_core::{
    ChannelKey, OfferPayload, SignalBody, SignalMessage, SignalingTransport, TransportError,
};

use crate::adapters::{CallHistorySink, PushNotifier};
use crate::config::CallConfig;
use crate::errors::{CallError, CallResult};
use crate::events::{CallEvent, EventEmitter};
use crate::recovery::retry_with_backoff;
use crate::session::CallSession;
use crate::state_table::{Action, EndPublish, EventKind, Transition, MASTER_TABLE};
use crate::types::{
    CallDirection, CallHistoryRecord, CallOutcome, CallSnapshot, CallState, IncomingCallInfo,
    MediaKind, ParticipantId, SessionId,
};

const ENGINE_QUEUE_CAPACITY: usize = 128;

/// Commands issued by the client facade.
pub(crate) enum CallCommand {
    Start {
        remote: ParticipantId,
        media_kind: MediaKind,
        reply: oneshot::Sender<CallResult<SessionId>>,
    },
    Accept {
        reply: oneshot::Sender<CallResult<()>>,
    },
    Reject {
        reply: oneshot::Sender<CallResult<()>>,
    },
    End {
        reply: oneshot::Sender<CallResult<()>>,
    },
    ToggleMute {
        reply: oneshot::Sender<CallResult<bool>>,
    },
    ToggleVideo {
        reply: oneshot::Sender<CallResult<bool>>,
    },
    Listen {
        channel: ChannelKey,
        reply: oneshot::Sender<CallResult<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Completions of spawned setup work, tagged with the owning session.
pub(crate) enum InternalEvent {
    OutgoingSetupReady {
        session_id: SessionId,
        local_media: MediaHandle,
        peer: Arc<dyn PeerConnection>,
        offer: SessionDescription,
    },
    IncomingSetupReady {
        session_id: SessionId,
        local_media: MediaHandle,
        peer: Arc<dyn PeerConnection>,
        answer: SessionDescription,
    },
    AnswerApplied {
        session_id: SessionId,
    },
    SetupFailed {
        session_id: SessionId,
        error: MediaError,
    },
}

/// Everything that can wake the engine.
pub(crate) enum EngineEvent {
    Command(CallCommand),
    Signal {
        channel: ChannelKey,
        message: SignalMessage,
    },
    Peer {
        session_id: SessionId,
        event: PeerEvent,
    },
    Internal(InternalEvent),
    RingTimeout {
        session_id: SessionId,
    },
    DurationTick {
        session_id: SessionId,
    },
}

/// External collaborators the engine is wired to.
pub(crate) struct EngineContext {
    pub config: CallConfig,
    pub transport: Arc<dyn SignalingTransport>,
    pub media: Arc<dyn MediaSource>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub history: Arc<dyn CallHistorySink>,
    pub push: Arc<dyn PushNotifier>,
}

/// Everything the client facade needs to talk to a running engine.
pub(crate) struct EngineHandles {
    pub tx: mpsc::Sender<EngineEvent>,
    pub events: EventEmitter,
    pub snapshots: watch::Receiver<Option<CallSnapshot>>,
    pub join: JoinHandle<()>,
}

/// Spawn the engine task and return its handles.
pub(crate) fn spawn_engine(ctx: EngineContext) -> EngineHandles {
    let (tx, rx) = mpsc::channel(ENGINE_QUEUE_CAPACITY);
    let events = EventEmitter::new(ctx.config.event_capacity);
    let (snapshot_tx, snapshots) = watch::channel(None);

    let engine = CallEngine {
        ctx,
        events: events.clone(),
        snapshot_tx,
        self_tx: tx.clone(),
        rx,
        active: None,
        channels: HashMap::new(),
    };
    let join = tokio::spawn(engine.run());

    EngineHandles {
        tx,
        events,
        snapshots,
        join,
    }
}

struct ChannelSub {
    pump: JoinHandle<()>,
    /// Persistent subscriptions (registered via `listen`) outlive sessions;
    /// session-owned ones are released exactly once, on teardown.
    persistent: bool,
}

/// Payload handed through a transition's actions.
#[derive(Default)]
struct ActionContext {
    offer: Option<SessionDescription>,
    answer: Option<SessionDescription>,
    candidate: Option<IceCandidate>,
    failure: Option<MediaError>,
    reason: Option<String>,
}

impl ActionContext {
    fn with_offer(offer: SessionDescription) -> Self {
        Self {
            offer: Some(offer),
            ..Default::default()
        }
    }

    fn with_answer(answer: SessionDescription) -> Self {
        Self {
            answer: Some(answer),
            ..Default::default()
        }
    }

    fn with_candidate(candidate: IceCandidate) -> Self {
        Self {
            candidate: Some(candidate),
            ..Default::default()
        }
    }

    fn with_failure(failure: MediaError) -> Self {
        Self {
            failure: Some(failure),
            ..Default::default()
        }
    }

    fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

struct CallEngine {
    ctx: EngineContext,
    events: EventEmitter,
    snapshot_tx: watch::Sender<Option<CallSnapshot>>,
    self_tx: mpsc::Sender<EngineEvent>,
    rx: mpsc::Receiver<EngineEvent>,
    /// At most one non-ended session exists at a time.
    active: Option<CallSession>,
    channels: HashMap<ChannelKey, ChannelSub>,
}

impl CallEngine {
    async fn run(mut self) {
        debug!(local = %self.ctx.config.local_participant, "call engine started");
        while let Some(event) = self.rx.recv().await {
            match event {
                EngineEvent::Command(command) => {
                    if self.handle_command(command).await {
                        break;
                    }
                }
                EngineEvent::Signal { channel, message } => {
                    self.handle_signal(channel, message).await;
                }
                EngineEvent::Peer { session_id, event } => {
                    self.handle_peer_event(session_id, event).await;
                }
                EngineEvent::Internal(internal) => self.handle_internal(internal).await,
                EngineEvent::RingTimeout { session_id } => {
                    if let Some(row) = self.lookup_active(session_id, EventKind::RingTimeout) {
                        self.run_transition(row, ActionContext::default()).await;
                    }
                }
                EngineEvent::DurationTick { session_id } => self.handle_duration_tick(session_id),
            }
        }
        debug!("call engine stopped");
    }

    // ===== Commands =====

    /// Returns `true` when the engine should stop.
    async fn handle_command(&mut self, command: CallCommand) -> bool {
        match command {
            CallCommand::Start {
                remote,
                media_kind,
                reply,
            } => {
                let result = self.start_call(remote, media_kind).await;
                let _ = reply.send(result);
            }
            CallCommand::Accept { reply } => {
                let result = self.command_event(EventKind::AcceptCall, "ringing").await;
                let _ = reply.send(result);
            }
            CallCommand::Reject { reply } => {
                let result = self.command_event(EventKind::RejectCall, "ringing").await;
                let _ = reply.send(result);
            }
            CallCommand::End { reply } => {
                let result = self.command_event(EventKind::EndCall, "an active call").await;
                let _ = reply.send(result);
            }
            CallCommand::ToggleMute { reply } => {
                let _ = reply.send(self.toggle_mute());
            }
            CallCommand::ToggleVideo { reply } => {
                let _ = reply.send(self.toggle_video());
            }
            CallCommand::Listen { channel, reply } => {
                let result = self.ensure_subscribed(&channel, true).await;
                let _ = reply.send(result);
            }
            CallCommand::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    async fn start_call(
        &mut self,
        remote: ParticipantId,
        media_kind: MediaKind,
    ) -> CallResult<SessionId> {
        if self.active.is_some() {
            return Err(CallError::AlreadyInCall);
        }
        if remote == self.ctx.config.local_participant {
            return Err(CallError::configuration("cannot call yourself"));
        }

        let channel = ChannelKey::for_pair(&self.ctx.config.local_participant, &remote);
        self.ensure_subscribed(&channel, false).await?;

        let session = CallSession::outgoing(remote, media_kind, channel);
        let session_id = session.session_id;
        info!(%session_id, remote = %session.remote, %media_kind, "starting outgoing call");
        self.active = Some(session);
        self.publish_snapshot();

        if let Some(row) =
            MASTER_TABLE.get(CallDirection::Outgoing, CallState::Idle, EventKind::StartCall)
        {
            self.run_transition(row, ActionContext::default()).await;
        }
        Ok(session_id)
    }

    /// Run a user command through the table, mapping a missing row to an
    /// invalid-state error.
    async fn command_event(&mut self, event: EventKind, expected: &str) -> CallResult<()> {
        let Some(session) = self.active.as_ref() else {
            return Err(CallError::NoActiveCall);
        };
        let (direction, state, session_id) = (session.direction, session.state, session.session_id);
        let Some(row) = MASTER_TABLE.get(direction, state, event) else {
            return Err(CallError::invalid_state(expected, state));
        };
        debug!(%session_id, ?event, %state, "command accepted");
        self.run_transition(row, ActionContext::default()).await;
        Ok(())
    }

    fn toggle_mute(&mut self) -> CallResult<bool> {
        let Some(session) = self.active.as_mut() else {
            return Err(CallError::NoActiveCall);
        };
        if !matches!(session.state, CallState::Calling | CallState::Connected) {
            return Err(CallError::invalid_state("calling or connected", session.state));
        }
        session.muted = !session.muted;
        if let Some(handle) = &session.local_media {
            handle.set_audio_enabled(!session.muted);
        }
        let muted = session.muted;
        self.publish_snapshot();
        Ok(muted)
    }

    fn toggle_video(&mut self) -> CallResult<bool> {
        let Some(session) = self.active.as_mut() else {
            return Err(CallError::NoActiveCall);
        };
        if !matches!(session.state, CallState::Calling | CallState::Connected) {
            return Err(CallError::invalid_state("calling or connected", session.state));
        }
        session.video_suppressed = !session.video_suppressed;
        if let Some(handle) = &session.local_media {
            handle.set_video_enabled(!session.video_suppressed);
        }
        let suppressed = session.video_suppressed;
        self.publish_snapshot();
        Ok(suppressed)
    }

    async fn shutdown(&mut self) {
        if let Some(session) = self.active.as_ref() {
            let (direction, state) = (session.direction, session.state);
            match MASTER_TABLE.get(direction, state, EventKind::EndCall) {
                Some(row) => {
                    self.run_transition(row, ActionContext::with_reason("client shut down"))
                        .await;
                }
                None => {
                    self.end_active_session(
                        EndPublish::None,
                        CallOutcome::Canceled,
                        "client shut down",
                    )
                    .await;
                }
            }
        }
        for (key, sub) in self.channels.drain() {
            sub.pump.abort();
            let transport = Arc::clone(&self.ctx.transport);
            tokio::spawn(async move {
                if let Err(error) = transport.unsubscribe(&key).await {
                    debug!(channel = %key, %error, "unsubscribe on shutdown failed");
                }
            });
        }
        info!("call engine shutting down");
    }

    // ===== Inbound signaling =====

    async fn handle_signal(&mut self, channel: ChannelKey, message: SignalMessage) {
        let session_id = message.session_id;
        let sender = message.sender_id.clone();
        match message.body {
            SignalBody::CallOffer(payload) => {
                self.handle_offer(channel, session_id, sender, payload).await;
            }
            SignalBody::CallAnswer(payload) => {
                let Some(row) = self.lookup_active(session_id, EventKind::AnswerReceived) else {
                    return;
                };
                self.run_transition(
                    row,
                    ActionContext::with_answer(SessionDescription::answer(payload.sdp)),
                )
                .await;
            }
            SignalBody::IceCandidate(payload) => {
                let Some(row) = self.lookup_active(session_id, EventKind::CandidateReceived) else {
                    return;
                };
                self.run_transition(row, ActionContext::with_candidate(payload.into()))
                    .await;
            }
            SignalBody::CallReject => {
                if let Some(row) = self.lookup_active(session_id, EventKind::RejectReceived) {
                    self.run_transition(row, ActionContext::default()).await;
                }
            }
            SignalBody::CallEnd => {
                if let Some(row) = self.lookup_active(session_id, EventKind::EndReceived) {
                    self.run_transition(row, ActionContext::default()).await;
                }
            }
            SignalBody::CallTimeout => {
                if let Some(row) = self.lookup_active(session_id, EventKind::TimeoutReceived) {
                    self.run_transition(row, ActionContext::default()).await;
                }
            }
            SignalBody::Unknown => {
                debug!(%session_id, "ignoring signaling message of unknown kind");
            }
        }
    }

    async fn handle_offer(
        &mut self,
        channel: ChannelKey,
        session_id: SessionId,
        from: ParticipantId,
        payload: OfferPayload,
    ) {
        if let Some(active) = &self.active {
            if active.session_id == session_id {
                debug!(%session_id, "duplicate call-offer for the active session, ignoring");
            } else {
                self.auto_reject_busy(channel, session_id, from, payload.media_kind);
            }
            return;
        }

        let media_kind = payload.media_kind;
        let session = CallSession::incoming(
            session_id,
            from.clone(),
            media_kind,
            channel,
            SessionDescription::offer(payload.sdp),
        );
        info!(%session_id, from = %from, %media_kind, "incoming call");
        self.active = Some(session);

        if let Some(row) = MASTER_TABLE.get(
            CallDirection::Incoming,
            CallState::Idle,
            EventKind::OfferReceived,
        ) {
            self.run_transition(row, ActionContext::default()).await;
        }
    }

    /// A second offer while a session is active: reject it without touching
    /// the active session.
    fn auto_reject_busy(
        &mut self,
        channel: ChannelKey,
        session_id: SessionId,
        from: ParticipantId,
        media_kind: MediaKind,
    ) {
        warn!(%session_id, from = %from, "call-offer received while busy, auto-rejecting");

        let message = SignalMessage::reject(session_id, self.ctx.config.local_participant.clone());
        let transport = Arc::clone(&self.ctx.transport);
        let retry = self.ctx.config.publish_retry.clone();
        tokio::spawn(async move {
            let result = retry_with_backoff("call-reject", &retry, || {
                let transport = Arc::clone(&transport);
                let message = message.clone();
                let channel = channel.clone();
                async move { transport.publish(&channel, message).await }
            })
            .await;
            if let Err(error) = result {
                warn!(%error, "busy auto-reject not delivered");
            }
        });

        self.events.emit(CallEvent::OfferRefused {
            session_id,
            from: from.clone(),
        });

        if self.ctx.config.report_history {
            let now = Utc::now();
            let record = CallHistoryRecord {
                session_id,
                caller_id: from,
                receiver_id: self.ctx.config.local_participant.clone(),
                media_kind,
                outcome: CallOutcome::Rejected,
                started_at: now,
                connected_at: None,
                ended_at: now,
                duration_seconds: 0,
            };
            let history = Arc::clone(&self.ctx.history);
            tokio::spawn(async move {
                if let Err(error) = history.record(record).await {
                    warn!(%error, "failed to record auto-rejected call");
                }
            });
        }
    }

    // ===== Peer connection events =====

    async fn handle_peer_event(&mut self, session_id: SessionId, event: PeerEvent) {
        if self.active_matching(session_id).is_none() {
            // A late remote-media handle would leak if simply dropped.
            if let PeerEvent::RemoteMedia(handle) = event {
                handle.release();
            }
            debug!(%session_id, "peer event for inactive session, dropping");
            return;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.publish_local_candidate(session_id, candidate);
            }
            PeerEvent::RemoteMedia(handle) => {
                if let Some(session) = self.active_matching(session_id) {
                    // Renegotiation can replace the remote tracks; the old
                    // handle must not leak.
                    if let Some(previous) = session.remote_media.replace(handle) {
                        previous.release();
                    }
                }
                self.events.emit(CallEvent::RemoteMediaArrived { session_id });
                self.publish_snapshot();
            }
            PeerEvent::Connected => {
                debug!(%session_id, "peer media path established");
            }
            PeerEvent::ConnectionFailed { reason } => {
                if let Some(row) = self.lookup_active(session_id, EventKind::PeerFailed) {
                    self.run_transition(
                        row,
                        ActionContext::with_reason(format!("media path failed: {reason}")),
                    )
                    .await;
                }
            }
            PeerEvent::Disconnected => {
                if let Some(row) = self.lookup_active(session_id, EventKind::PeerDisconnected) {
                    self.run_transition(row, ActionContext::with_reason("media path disconnected"))
                        .await;
                }
            }
        }
    }

    /// Candidates are redundant with each other; a lost one degrades path
    /// selection but never aborts the call, so failures only log.
    fn publish_local_candidate(&self, session_id: SessionId, candidate: IceCandidate) {
        let Some(session) = self
            .active
            .as_ref()
            .filter(|session| session.session_id == session_id)
        else {
            return;
        };
        let message = SignalMessage::candidate(
            session_id,
            self.ctx.config.local_participant.clone(),
            candidate.into(),
        );
        let channel = session.channel.clone();
        let transport = Arc::clone(&self.ctx.transport);
        let retry = self.ctx.config.publish_retry.clone();
        tokio::spawn(async move {
            let result = retry_with_backoff("ice-candidate", &retry, || {
                let transport = Arc::clone(&transport);
                let message = message.clone();
                let channel = channel.clone();
                async move { transport.publish(&channel, message).await }
            })
            .await;
            if let Err(error) = result {
                warn!(%error, "local candidate not delivered");
            }
        });
    }

    // ===== Internal completions =====

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::OutgoingSetupReady {
                session_id,
                local_media,
                peer,
                offer,
            } => {
                if self.active_matching(session_id).is_none() {
                    debug!(%session_id, "setup finished for inactive session, discarding");
                    local_media.release();
                    tokio::spawn(async move { peer.close().await });
                    return;
                }
                self.adopt_peer(session_id, local_media, peer);
                if let Some(row) = self.lookup_active(session_id, EventKind::OutgoingSetupReady) {
                    self.run_transition(row, ActionContext::with_offer(offer)).await;
                }
            }
            InternalEvent::IncomingSetupReady {
                session_id,
                local_media,
                peer,
                answer,
            } => {
                if self.active_matching(session_id).is_none() {
                    debug!(%session_id, "accept setup finished for inactive session, discarding");
                    local_media.release();
                    tokio::spawn(async move { peer.close().await });
                    return;
                }
                self.adopt_peer(session_id, local_media, peer);
                if let Some(row) = self.lookup_active(session_id, EventKind::IncomingSetupReady) {
                    self.run_transition(row, ActionContext::with_answer(answer)).await;
                }
            }
            InternalEvent::AnswerApplied { session_id } => {
                if let Some(row) = self.lookup_active(session_id, EventKind::AnswerApplied) {
                    self.run_transition(row, ActionContext::default()).await;
                }
            }
            InternalEvent::SetupFailed { session_id, error } => {
                if let Some(row) = self.lookup_active(session_id, EventKind::SetupFailed) {
                    self.run_transition(row, ActionContext::with_failure(error)).await;
                }
            }
        }
    }

    /// Store the setup results on the session and start pumping peer events
    /// into the engine queue.
    fn adopt_peer(
        &mut self,
        session_id: SessionId,
        local_media: MediaHandle,
        peer: Arc<dyn PeerConnection>,
    ) {
        let tx = self.self_tx.clone();
        let Some(session) = self.active_matching(session_id) else {
            local_media.release();
            return;
        };
        local_media.set_audio_enabled(!session.muted);
        local_media.set_video_enabled(!session.video_suppressed);
        session.local_media = Some(local_media);

        if let Some(mut events) = peer.take_events() {
            session.peer_pump = Some(tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if tx.send(EngineEvent::Peer { session_id, event }).await.is_err() {
                        break;
                    }
                }
            }));
        }
        session.peer = Some(peer);
    }

    fn handle_duration_tick(&mut self, session_id: SessionId) {
        let Some(session) = self.active_matching(session_id) else {
            return;
        };
        if session.state != CallState::Connected {
            return;
        }
        session.duration_seconds += 1;
        self.publish_snapshot();
    }

    // ===== Transition execution =====

    /// Transition for the active session matching `session_id`, or `None`
    /// (logged) when the session is gone or the table has no row.
    fn lookup_active(
        &mut self,
        session_id: SessionId,
        event: EventKind,
    ) -> Option<&'static Transition> {
        let (direction, state) = {
            let session = self.active_matching(session_id)?;
            (session.direction, session.state)
        };
        let row = MASTER_TABLE.get(direction, state, event);
        if row.is_none() {
            debug!(%session_id, ?event, %state, "no transition for event, ignoring");
        }
        row
    }

    fn active_matching(&mut self, session_id: SessionId) -> Option<&mut CallSession> {
        match self.active.as_mut() {
            Some(session) if session.session_id == session_id => Some(session),
            _ => None,
        }
    }

    async fn run_transition(&mut self, row: &'static Transition, mut ctx: ActionContext) {
        for action in row.actions {
            if !self.run_action(*action, row, &mut ctx).await {
                return;
            }
        }
        if let Some(next) = row.next_state {
            if next != CallState::Ended {
                self.commit_state(next);
            }
        }
        self.publish_snapshot();
    }

    /// Execute one action. Returns `false` when the transition must stop
    /// (the session ended or the needed context is gone).
    async fn run_action(
        &mut self,
        action: Action,
        row: &'static Transition,
        ctx: &mut ActionContext,
    ) -> bool {
        match action {
            Action::AcquireLocalMedia => {
                let Some(session) = self.active.as_ref() else {
                    return false;
                };
                match session.direction {
                    CallDirection::Outgoing => {
                        self.spawn_outgoing_setup(session.session_id, session.media_kind);
                    }
                    CallDirection::Incoming => {
                        let Some(offer) = session.pending_offer.clone() else {
                            warn!(session_id = %session.session_id, "accept without a stored offer");
                            return false;
                        };
                        self.spawn_incoming_setup(session.session_id, session.media_kind, offer);
                    }
                }
                true
            }
            Action::PublishOffer => {
                let Some(offer) = ctx.offer.take() else {
                    warn!("publish-offer action without an offer");
                    return false;
                };
                let Some(session) = self.active.as_ref() else {
                    return false;
                };
                let message = SignalMessage::offer(
                    session.session_id,
                    self.ctx.config.local_participant.clone(),
                    offer.sdp,
                    session.media_kind,
                );
                let channel = session.channel.clone();
                match self.publish_with_retry(&channel, message).await {
                    Ok(()) => true,
                    Err(error) => {
                        self.end_active_session(
                            EndPublish::None,
                            CallOutcome::ConnectionFailed,
                            format!("could not deliver call-offer: {error}"),
                        )
                        .await;
                        false
                    }
                }
            }
            Action::PublishAnswer => {
                let Some(answer) = ctx.answer.take() else {
                    warn!("publish-answer action without an answer");
                    return false;
                };
                let Some(session) = self.active.as_ref() else {
                    return false;
                };
                let message = SignalMessage::answer(
                    session.session_id,
                    self.ctx.config.local_participant.clone(),
                    answer.sdp,
                );
                let channel = session.channel.clone();
                match self.publish_with_retry(&channel, message).await {
                    Ok(()) => true,
                    Err(error) => {
                        self.end_active_session(
                            EndPublish::None,
                            CallOutcome::ConnectionFailed,
                            format!("could not deliver call-answer: {error}"),
                        )
                        .await;
                        false
                    }
                }
            }
            Action::ApplyAnswer => {
                let Some(answer) = ctx.answer.take() else {
                    return true;
                };
                let Some(session) = self.active.as_ref() else {
                    return false;
                };
                let Some(peer) = session.peer.clone() else {
                    warn!(session_id = %session.session_id, "answer received before peer setup");
                    return true;
                };
                let session_id = session.session_id;
                let tx = self.self_tx.clone();
                tokio::spawn(async move {
                    let event = match peer.apply_answer(answer).await {
                        Ok(()) => InternalEvent::AnswerApplied { session_id },
                        Err(error) => InternalEvent::SetupFailed { session_id, error },
                    };
                    let _ = tx.send(EngineEvent::Internal(event)).await;
                });
                true
            }
            Action::StartRingTimer => {
                let timeout = self.ctx.config.ring_timeout;
                let tx = self.self_tx.clone();
                let Some(session) = self.active.as_mut() else {
                    return false;
                };
                let session_id = session.session_id;
                session.cancel_ring_timer();
                session.ring_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = tx.send(EngineEvent::RingTimeout { session_id }).await;
                }));
                true
            }
            Action::CancelRingTimer => {
                if let Some(session) = self.active.as_mut() {
                    session.cancel_ring_timer();
                }
                true
            }
            Action::RecordConnectedAt => {
                let now = Utc::now();
                let Some(session) = self.active.as_mut() else {
                    return false;
                };
                session.mark_connected(now);
                let session_id = session.session_id;
                let connected_at = session.connected_at.unwrap_or(now);
                self.events.emit(CallEvent::Connected {
                    session_id,
                    connected_at,
                });
                true
            }
            Action::StartDurationClock => {
                let tx = self.self_tx.clone();
                let Some(session) = self.active.as_mut() else {
                    return false;
                };
                let session_id = session.session_id;
                session.duration_clock = Some(tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        if tx.send(EngineEvent::DurationTick { session_id }).await.is_err() {
                            break;
                        }
                    }
                }));
                true
            }
            Action::FlushCandidates => {
                let Some(session) = self.active.as_mut() else {
                    return false;
                };
                session.peer_ready = true;
                if session.pending_candidates.is_empty() {
                    return true;
                }
                let Some(peer) = session.peer.clone() else {
                    return true;
                };
                let pending = std::mem::take(&mut session.pending_candidates);
                debug!(
                    session_id = %session.session_id,
                    count = pending.len(),
                    "flushing buffered candidates"
                );
                tokio::spawn(async move {
                    for candidate in pending {
                        if let Err(error) = peer.add_remote_candidate(candidate).await {
                            warn!(%error, "buffered candidate rejected by peer connection");
                        }
                    }
                });
                true
            }
            Action::ForwardCandidate => {
                let Some(candidate) = ctx.candidate.take() else {
                    return true;
                };
                let Some(session) = self.active.as_mut() else {
                    return false;
                };
                if session.peer_ready {
                    if let Some(peer) = session.peer.clone() {
                        tokio::spawn(async move {
                            if let Err(error) = peer.add_remote_candidate(candidate).await {
                                warn!(%error, "candidate rejected by peer connection");
                            }
                        });
                        return true;
                    }
                }
                session.pending_candidates.push(candidate);
                true
            }
            Action::NotifyIncoming => {
                let Some(session) = self.active.as_ref() else {
                    return false;
                };
                let info = IncomingCallInfo {
                    session_id: session.session_id,
                    from: session.remote.clone(),
                    media_kind: session.media_kind,
                };
                self.events.emit(CallEvent::IncomingCall { info });
                true
            }
            Action::RequestPush => {
                if !self.ctx.config.push_on_calling {
                    return true;
                }
                let Some(session) = self.active.as_ref() else {
                    return false;
                };
                let info = IncomingCallInfo {
                    session_id: session.session_id,
                    from: self.ctx.config.local_participant.clone(),
                    media_kind: session.media_kind,
                };
                let to = session.remote.clone();
                let push = Arc::clone(&self.ctx.push);
                tokio::spawn(async move {
                    if let Err(error) = push.notify_incoming(&to, &info).await {
                        debug!(%error, "push dispatch request failed");
                    }
                });
                true
            }
            Action::EndSession => {
                let outcome = row.outcome.unwrap_or_else(|| match &ctx.failure {
                    Some(MediaError::PermissionDenied { .. })
                    | Some(MediaError::DeviceUnavailable { .. }) => CallOutcome::MediaDenied,
                    _ => CallOutcome::NegotiationFailed,
                });
                let reason = ctx
                    .reason
                    .take()
                    .or_else(|| ctx.failure.as_ref().map(|error| error.to_string()))
                    .unwrap_or_else(|| default_reason(outcome).to_string());
                self.end_active_session(row.end_publish, outcome, reason).await;
                false
            }
        }
    }

    fn commit_state(&mut self, next: CallState) {
        let Some(session) = self.active.as_mut() else {
            return;
        };
        let previous = session.state;
        if previous == next {
            return;
        }
        session.state = next;
        info!(
            session_id = %session.session_id,
            %previous,
            new_state = %next,
            "call state changed"
        );
        let session_id = session.session_id;
        self.events.emit(CallEvent::StateChanged {
            session_id,
            previous,
            new_state: next,
        });
    }

    /// The one teardown path. Publishes the required notice, releases both
    /// media handles (idempotent), closes the peer connection, cancels
    /// timers, releases the session-owned subscription, reports history, and
    /// notifies the UI — regardless of which event got us here.
    async fn end_active_session(
        &mut self,
        publish: EndPublish,
        outcome: CallOutcome,
        reason: impl Into<String>,
    ) {
        let Some(mut session) = self.active.take() else {
            return;
        };
        let reason = reason.into();
        session.set_outcome(outcome, reason.clone());
        session.cancel_tasks();

        let local = self.ctx.config.local_participant.clone();
        let notice = match publish {
            EndPublish::None => None,
            EndPublish::End => Some(SignalMessage::end(session.session_id, local.clone())),
            EndPublish::Reject => Some(SignalMessage::reject(session.session_id, local.clone())),
            EndPublish::Timeout => Some(SignalMessage::timeout(session.session_id, local.clone())),
        };
        if let Some(message) = notice {
            if let Err(error) = self.publish_with_retry(&session.channel, message).await {
                warn!(
                    session_id = %session.session_id,
                    %error,
                    "teardown notice not delivered"
                );
            }
        }

        session.release_media();
        if let Some(peer) = session.peer.take() {
            tokio::spawn(async move { peer.close().await });
        }

        let previous = session.state;
        session.state = CallState::Ended;
        session.mark_ended(Utc::now());
        self.release_channel(&session.channel);

        let final_outcome = session.outcome.unwrap_or(outcome);
        let final_reason = session.end_reason.clone().unwrap_or(reason);
        info!(
            session_id = %session.session_id,
            outcome = %final_outcome,
            reason = %final_reason,
            duration = session.duration_seconds,
            "call ended"
        );

        if self.ctx.config.report_history {
            let record = history_record(&session, &local);
            let history = Arc::clone(&self.ctx.history);
            tokio::spawn(async move {
                if let Err(error) = history.record(record).await {
                    warn!(%error, "failed to report call history");
                }
            });
        }

        if previous != CallState::Ended {
            self.events.emit(CallEvent::StateChanged {
                session_id: session.session_id,
                previous,
                new_state: CallState::Ended,
            });
        }
        self.events.emit(CallEvent::Ended {
            session_id: session.session_id,
            outcome: final_outcome,
            reason: final_reason,
            duration_seconds: session.duration_seconds,
        });

        let _ = self.snapshot_tx.send(Some(session.snapshot(&local)));
    }

    // ===== Setup tasks =====

    fn spawn_outgoing_setup(&self, session_id: SessionId, media_kind: MediaKind) {
        let media = Arc::clone(&self.ctx.media);
        let peers = Arc::clone(&self.ctx.peers);
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = async {
                let local_media = media.capture(media_kind).await?;
                let peer = match peers.create(media_kind) {
                    Ok(peer) => peer,
                    Err(error) => {
                        local_media.release();
                        return Err(error);
                    }
                };
                match peer.create_offer().await {
                    Ok(offer) => Ok((local_media, peer, offer)),
                    Err(error) => {
                        local_media.release();
                        peer.close().await;
                        Err(error)
                    }
                }
            }
            .await;

            let event = match result {
                Ok((local_media, peer, offer)) => InternalEvent::OutgoingSetupReady {
                    session_id,
                    local_media,
                    peer,
                    offer,
                },
                Err(error) => InternalEvent::SetupFailed { session_id, error },
            };
            let _ = tx.send(EngineEvent::Internal(event)).await;
        });
    }

    fn spawn_incoming_setup(
        &self,
        session_id: SessionId,
        media_kind: MediaKind,
        offer: SessionDescription,
    ) {
        let media = Arc::clone(&self.ctx.media);
        let peers = Arc::clone(&self.ctx.peers);
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = async {
                let local_media = media.capture(media_kind).await?;
                let peer = match peers.create(media_kind) {
                    Ok(peer) => peer,
                    Err(error) => {
                        local_media.release();
                        return Err(error);
                    }
                };
                match peer.accept_offer(offer).await {
                    Ok(answer) => Ok((local_media, peer, answer)),
                    Err(error) => {
                        local_media.release();
                        peer.close().await;
                        Err(error)
                    }
                }
            }
            .await;

            let event = match result {
                Ok((local_media, peer, answer)) => InternalEvent::IncomingSetupReady {
                    session_id,
                    local_media,
                    peer,
                    answer,
                },
                Err(error) => InternalEvent::SetupFailed { session_id, error },
            };
            let _ = tx.send(EngineEvent::Internal(event)).await;
        });
    }

    // ===== Transport plumbing =====

    async fn ensure_subscribed(&mut self, channel: &ChannelKey, persistent: bool) -> CallResult<()> {
        if let Some(sub) = self.channels.get_mut(channel) {
            sub.persistent = sub.persistent || persistent;
            return Ok(());
        }
        let stream = self.ctx.transport.subscribe(channel).await?;
        let local = self.ctx.config.local_participant.clone();
        let tx = self.self_tx.clone();
        let key = channel.clone();
        let pump = tokio::spawn(async move {
            let mut stream = stream;
            while let Some(message) = stream.recv().await {
                // Own publishes are echoed back; drop them here.
                if message.sender_id == local {
                    continue;
                }
                let event = EngineEvent::Signal {
                    channel: key.clone(),
                    message,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        self.channels.insert(
            channel.clone(),
            ChannelSub { pump, persistent },
        );
        debug!(channel = %channel, persistent, "subscribed to signaling channel");
        Ok(())
    }

    /// Release a session-owned subscription. Persistent listeners survive
    /// session teardown so later offers still ring.
    fn release_channel(&mut self, channel: &ChannelKey) {
        let persistent = self
            .channels
            .get(channel)
            .map(|sub| sub.persistent)
            .unwrap_or(true);
        if persistent {
            return;
        }
        if let Some(sub) = self.channels.remove(channel) {
            sub.pump.abort();
        }
        let transport = Arc::clone(&self.ctx.transport);
        let key = channel.clone();
        tokio::spawn(async move {
            if let Err(error) = transport.unsubscribe(&key).await {
                warn!(channel = %key, %error, "unsubscribe failed");
            }
        });
    }

    async fn publish_with_retry(
        &self,
        channel: &ChannelKey,
        message: SignalMessage,
    ) -> Result<(), TransportError> {
        let transport = Arc::clone(&self.ctx.transport);
        retry_with_backoff(message.kind_name(), &self.ctx.config.publish_retry, || {
            let transport = Arc::clone(&transport);
            let message = message.clone();
            let channel = channel.clone();
            async move { transport.publish(&channel, message).await }
        })
        .await
    }

    fn publish_snapshot(&self) {
        if let Some(session) = self.active.as_ref() {
            let snapshot = session.snapshot(&self.ctx.config.local_participant);
            let _ = self.snapshot_tx.send(Some(snapshot));
        }
    }
}

fn history_record(session: &CallSession, local: &ParticipantId) -> CallHistoryRecord {
    let (caller_id, receiver_id) = match session.direction {
        CallDirection::Outgoing => (local.clone(), session.remote.clone()),
        CallDirection::Incoming => (session.remote.clone(), local.clone()),
    };
    CallHistoryRecord {
        session_id: session.session_id,
        caller_id,
        receiver_id,
        media_kind: session.media_kind,
        outcome: session.outcome.unwrap_or(CallOutcome::Canceled),
        started_at: session.started_at,
        connected_at: session.connected_at,
        ended_at: session.ended_at.unwrap_or_else(Utc::now),
        duration_seconds: session.duration_seconds,
    }
}

fn default_reason(outcome: CallOutcome) -> &'static str {
    match outcome {
        CallOutcome::Completed => "call ended",
        CallOutcome::Canceled => "call canceled",
        CallOutcome::Rejected => "call declined",
        CallOutcome::Missed => "missed call",
        CallOutcome::Timeout => "no answer",
        CallOutcome::MediaDenied => "camera or microphone unavailable",
        CallOutcome::ConnectionFailed => "connection failed",
        CallOutcome::NegotiationFailed => "media negotiation failed",
    }
}
