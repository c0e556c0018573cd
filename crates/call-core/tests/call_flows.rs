//! End-to-end call flow tests
//!
//! Drives the engine through the in-memory signaling hub and the mock media
//! stack: a real `CallClient` on one side, a hand-driven fake remote on the
//! other, so every published message and every media handle can be asserted
//! on.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_stream::StreamExt;

use unitynets_call_core::{
    CallClient, CallConfig, CallEvent, CallOutcome, CallSnapshot, CallState, MediaKind,
    MemoryHistorySink, ParticipantId, SessionId,
};
use unitynets_media_core::mock::{MockMediaSource, MockPeerFactory};
use unitynets_media_core::{MediaError, MediaHandle, PeerEvent};
use unitynets_signaling_core::{
    ChannelKey, InMemoryHub, InMemoryTransport, SignalMessage, SignalStream, SignalingTransport,
};

const WAIT_GUARD: Duration = Duration::from_secs(60);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct ClientUnderTest {
    client: CallClient,
    media: MockMediaSource,
    peers: MockPeerFactory,
    history: Arc<MemoryHistorySink>,
}

fn build_client(hub: &InMemoryHub, name: &str, ring_timeout: Option<Duration>) -> ClientUnderTest {
    let media = MockMediaSource::new();
    let peers = MockPeerFactory::new();
    let history = Arc::new(MemoryHistorySink::new());

    let mut config = CallConfig::new(name);
    if let Some(timeout) = ring_timeout {
        config = config.with_ring_timeout(timeout);
    }

    let client = CallClient::builder(config)
        .transport(Arc::new(hub.client()))
        .media_source(Arc::new(media.clone()))
        .peer_factory(Arc::new(peers.clone()))
        .history_sink(history.clone())
        .build()
        .expect("client builds");

    ClientUnderTest {
        client,
        media,
        peers,
        history,
    }
}

/// A fake remote participant driven directly through the hub.
struct FakeRemote {
    id: ParticipantId,
    transport: InMemoryTransport,
    channel: ChannelKey,
    stream: SignalStream,
}

impl FakeRemote {
    async fn join(hub: &InMemoryHub, id: &str, other: &str) -> Self {
        let id = ParticipantId::from(id);
        let transport = hub.client();
        let channel = ChannelKey::for_pair(&id, &ParticipantId::from(other));
        let stream = transport.subscribe(&channel).await.expect("subscribe");
        Self {
            id,
            transport,
            channel,
            stream,
        }
    }

    async fn publish(&self, message: SignalMessage) {
        self.transport
            .publish(&self.channel, message)
            .await
            .expect("publish");
    }

    /// Next message sent by `sender`, skipping our own echoes.
    async fn next_from(&mut self, sender: &str) -> SignalMessage {
        tokio::time::timeout(WAIT_GUARD, async {
            loop {
                let message = self.stream.recv().await.expect("stream open");
                if message.sender_id.as_str() == sender {
                    return message;
                }
            }
        })
        .await
        .expect("timed out waiting for message")
    }

    /// Everything `sender` has published so far (stops at the first quiet
    /// 200 ms window).
    async fn drain_from(&mut self, sender: &str) -> Vec<SignalMessage> {
        let mut out = Vec::new();
        while let Ok(Some(message)) =
            tokio::time::timeout(Duration::from_millis(200), self.stream.recv()).await
        {
            if message.sender_id.as_str() == sender {
                out.push(message);
            }
        }
        out
    }
}

async fn wait_for_state(client: &CallClient, state: CallState) -> CallSnapshot {
    let mut rx = client.watch_snapshots();
    tokio::time::timeout(WAIT_GUARD, async {
        loop {
            if let Some(snapshot) = rx.borrow_and_update().clone() {
                if snapshot.state == state {
                    return snapshot;
                }
            }
            rx.changed().await.expect("snapshot channel open");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {state}"))
}

fn collect_events(client: &CallClient) -> Arc<Mutex<Vec<CallEvent>>> {
    let mut stream = client.events();
    let sink = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&sink);
    tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            if let Ok(event) = result {
                writer.lock().push(event);
            }
        }
    });
    sink
}

/// Drive the caller side to Connected against a fake remote.
async fn connect_outgoing(
    cut: &ClientUnderTest,
    remote: &mut FakeRemote,
) -> (SessionId, SignalMessage) {
    let session_id = cut
        .client
        .start_call(remote.id.clone(), MediaKind::Voice)
        .await
        .expect("start_call");

    let offer = remote.next_from("alice").await;
    assert_eq!(offer.kind_name(), "call-offer");
    assert_eq!(offer.session_id, session_id);
    wait_for_state(&cut.client, CallState::Calling).await;

    remote
        .publish(SignalMessage::answer(
            session_id,
            remote.id.clone(),
            "v=0 remote-answer".into(),
        ))
        .await;
    wait_for_state(&cut.client, CallState::Connected).await;

    (session_id, offer)
}

// ===== Scenario A: outgoing call, never answered =====

#[tokio::test(start_paused = true)]
async fn outgoing_call_times_out_with_one_offer_and_one_timeout() {
    init_tracing();
    let hub = InMemoryHub::new();
    let cut = build_client(&hub, "alice", Some(Duration::from_secs(5)));
    let mut bob = FakeRemote::join(&hub, "bob", "alice").await;

    cut.client
        .start_call("bob", MediaKind::Voice)
        .await
        .expect("start_call");
    wait_for_state(&cut.client, CallState::Calling).await;

    // Nobody answers; the ring timer ends the attempt.
    let ended = wait_for_state(&cut.client, CallState::Ended).await;
    assert_eq!(ended.outcome, Some(CallOutcome::Timeout));

    let published = bob.drain_from("alice").await;
    let offers = published.iter().filter(|m| m.kind_name() == "call-offer").count();
    let timeouts = published.iter().filter(|m| m.kind_name() == "call-timeout").count();
    assert_eq!(offers, 1, "exactly one call-offer, got {published:#?}");
    assert_eq!(timeouts, 1, "exactly one call-timeout, got {published:#?}");
    assert_eq!(published.len(), 2, "nothing else published");

    // The local capture acquired for the attempt is released.
    let captured = cut.media.captured();
    assert_eq!(captured.len(), 1);
    assert!(captured[0].is_released());

    let records = cut.history.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, CallOutcome::Timeout);
    assert_eq!(records[0].duration_seconds, 0);

    cut.client.shutdown().await.expect("shutdown");
}

// ===== Scenario B: incoming call accepted =====

#[tokio::test]
async fn incoming_call_accept_publishes_one_answer_and_connects() {
    init_tracing();
    let hub = InMemoryHub::new();
    let cut = build_client(&hub, "alice", None);
    let mut bob = FakeRemote::join(&hub, "bob", "alice").await;

    cut.client.listen("bob").await.expect("listen");
    let events = collect_events(&cut.client);

    let session_id = SessionId::new();
    bob.publish(SignalMessage::offer(
        session_id,
        bob.id.clone(),
        "v=0 remote-offer".into(),
        MediaKind::Video,
    ))
    .await;

    let ringing = wait_for_state(&cut.client, CallState::Ringing).await;
    assert_eq!(ringing.session_id, session_id);
    assert_eq!(ringing.media_kind, MediaKind::Video);

    cut.client.accept_call().await.expect("accept");
    let connected = wait_for_state(&cut.client, CallState::Connected).await;
    assert!(connected.connected_at.is_some(), "connected_at is stamped");
    assert_eq!(connected.duration_seconds, 0, "duration clock starts at 0");

    let published = bob.drain_from("alice").await;
    let answers: Vec<_> = published.iter().filter(|m| m.kind_name() == "call-answer").collect();
    assert_eq!(answers.len(), 1, "exactly one call-answer");
    assert_eq!(answers[0].session_id, session_id);

    // The mock peer connection saw the remote offer.
    let peer = cut.peers.last().expect("peer created");
    assert!(peer.accepted_offer().is_some());

    {
        let events = events.lock();
        assert!(events.iter().any(|event| matches!(
            event,
            CallEvent::IncomingCall { info } if info.session_id == session_id
        )));
    }

    cut.client.shutdown().await.expect("shutdown");
}

// ===== Scenario C: remote hangup of a connected call =====

#[tokio::test]
async fn remote_hangup_releases_both_handles_and_publishes_nothing() {
    init_tracing();
    let hub = InMemoryHub::new();
    let cut = build_client(&hub, "alice", None);
    let mut bob = FakeRemote::join(&hub, "bob", "alice").await;

    let (session_id, _) = connect_outgoing(&cut, &mut bob).await;

    // Remote media arrives through the peer connection.
    let remote_handle = MediaHandle::new("remote-tracks", MediaKind::Voice);
    let remote_probe = remote_handle.probe();
    cut.peers
        .last()
        .expect("peer created")
        .emit(PeerEvent::RemoteMedia(remote_handle))
        .await;

    // Remote hangs up.
    bob.publish(SignalMessage::end(session_id, bob.id.clone())).await;
    let ended = wait_for_state(&cut.client, CallState::Ended).await;
    assert_eq!(ended.outcome, Some(CallOutcome::Completed));
    assert!(ended.ended_at.is_some());

    let local_probes = cut.media.captured();
    assert_eq!(local_probes.len(), 1);
    assert!(local_probes[0].is_released(), "local capture released");
    assert!(remote_probe.is_released(), "remote handle released");
    assert_eq!(local_probes[0].release_calls(), 1, "released exactly once");

    // The local side publishes nothing in response to the remote hangup.
    let published = bob.drain_from("alice").await;
    assert_eq!(
        published.iter().filter(|m| m.kind_name() != "call-offer").count(),
        0,
        "only the original offer was ever published, got {published:#?}"
    );

    cut.client.shutdown().await.expect("shutdown");
}

// ===== Scenario D: capture denied on an outgoing attempt =====

#[tokio::test]
async fn denied_capture_aborts_without_publishing_or_entering_calling() {
    init_tracing();
    let hub = InMemoryHub::new();
    let cut = build_client(&hub, "alice", None);
    let mut bob = FakeRemote::join(&hub, "bob", "alice").await;

    let events = collect_events(&cut.client);
    cut.media
        .fail_next(MediaError::permission_denied("microphone"));

    cut.client
        .start_call("bob", MediaKind::Voice)
        .await
        .expect("start_call accepts the command");

    let ended = wait_for_state(&cut.client, CallState::Ended).await;
    assert_eq!(ended.outcome, Some(CallOutcome::MediaDenied));

    // No signaling ever went out.
    assert!(bob.drain_from("alice").await.is_empty());

    // The session never passed through Calling.
    let events = events.lock();
    assert!(
        !events.iter().any(|event| matches!(
            event,
            CallEvent::StateChanged { new_state: CallState::Calling, .. }
        )),
        "must not enter calling on capture failure"
    );
    assert!(events.iter().any(|event| matches!(
        event,
        CallEvent::Ended { outcome: CallOutcome::MediaDenied, .. }
    )));

    cut.client.shutdown().await.expect("shutdown");
}

// ===== Single-active-session invariant =====

#[tokio::test]
async fn second_offer_while_busy_is_auto_rejected_and_active_call_untouched() {
    init_tracing();
    let hub = InMemoryHub::new();
    let cut = build_client(&hub, "alice", None);
    let mut bob = FakeRemote::join(&hub, "bob", "alice").await;
    let mut carol = FakeRemote::join(&hub, "carol", "alice").await;

    cut.client.listen("carol").await.expect("listen");
    let (active_id, _) = connect_outgoing(&cut, &mut bob).await;

    let intruder_id = SessionId::new();
    carol
        .publish(SignalMessage::offer(
            intruder_id,
            carol.id.clone(),
            "v=0 intruder".into(),
            MediaKind::Voice,
        ))
        .await;

    let reject = carol.next_from("alice").await;
    assert_eq!(reject.kind_name(), "call-reject");
    assert_eq!(reject.session_id, intruder_id);

    // The active session is untouched.
    let snapshot = cut.client.snapshot().expect("snapshot");
    assert_eq!(snapshot.session_id, active_id);
    assert_eq!(snapshot.state, CallState::Connected);

    // The refused attempt lands in history as rejected.
    tokio::time::timeout(WAIT_GUARD, async {
        loop {
            if cut
                .history
                .records()
                .iter()
                .any(|r| r.session_id == intruder_id && r.outcome == CallOutcome::Rejected)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("busy rejection recorded");

    cut.client.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn stale_answer_outside_calling_is_a_no_op() {
    init_tracing();
    let hub = InMemoryHub::new();
    let cut = build_client(&hub, "alice", None);
    let mut bob = FakeRemote::join(&hub, "bob", "alice").await;

    cut.client.listen("bob").await.expect("listen");

    // An answer with no session at all: ignored.
    bob.publish(SignalMessage::answer(SessionId::new(), bob.id.clone(), "v=0".into()))
        .await;

    // An answer while ringing: ignored, state unchanged.
    let session_id = SessionId::new();
    bob.publish(SignalMessage::offer(
        session_id,
        bob.id.clone(),
        "v=0 offer".into(),
        MediaKind::Voice,
    ))
    .await;
    wait_for_state(&cut.client, CallState::Ringing).await;

    bob.publish(SignalMessage::answer(session_id, bob.id.clone(), "v=0 stale".into()))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = cut.client.snapshot().expect("snapshot");
    assert_eq!(snapshot.state, CallState::Ringing, "answer must not move ringing");
    assert!(cut.media.captured().is_empty(), "no media acquired by a stale answer");

    cut.client.reject_call().await.expect("reject");
    wait_for_state(&cut.client, CallState::Ended).await;
    cut.client.shutdown().await.expect("shutdown");
}

// ===== Candidate buffering =====

#[tokio::test]
async fn candidates_before_accept_are_buffered_and_flushed() {
    init_tracing();
    let hub = InMemoryHub::new();
    let cut = build_client(&hub, "alice", None);
    let mut bob = FakeRemote::join(&hub, "bob", "alice").await;

    cut.client.listen("bob").await.expect("listen");

    let session_id = SessionId::new();
    bob.publish(SignalMessage::offer(
        session_id,
        bob.id.clone(),
        "v=0 offer".into(),
        MediaKind::Voice,
    ))
    .await;
    bob.publish(SignalMessage::candidate(
        session_id,
        bob.id.clone(),
        unitynets_signaling_core::CandidatePayload {
            candidate: "candidate:1 1 UDP 1 198.51.100.7 49152 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        },
    ))
    .await;

    wait_for_state(&cut.client, CallState::Ringing).await;
    cut.client.accept_call().await.expect("accept");
    wait_for_state(&cut.client, CallState::Connected).await;

    let peer = cut.peers.last().expect("peer created");
    tokio::time::timeout(WAIT_GUARD, async {
        loop {
            if !peer.remote_candidates().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("buffered candidate flushed to the peer connection");
    assert_eq!(peer.remote_candidates().len(), 1);

    cut.client.shutdown().await.expect("shutdown");
}

// ===== Cancellation during a pending permission prompt =====

#[tokio::test]
async fn hangup_during_capture_discards_the_late_handle() {
    init_tracing();
    let hub = InMemoryHub::new();
    let cut = build_client(&hub, "alice", None);
    let mut bob = FakeRemote::join(&hub, "bob", "alice").await;

    // Capture blocks until we open the gate, like a permission prompt.
    let (gate_tx, gate_rx) = tokio::sync::watch::channel(false);
    cut.media.hold_until(gate_rx);

    cut.client
        .start_call("bob", MediaKind::Video)
        .await
        .expect("start_call");

    // User gives up while the prompt is still open.
    cut.client.end_call().await.expect("cancel");
    let ended = wait_for_state(&cut.client, CallState::Ended).await;
    assert_eq!(ended.outcome, Some(CallOutcome::Canceled));

    // The prompt resolves late; the stale handle must be released, and no
    // offer may go out for the dead session.
    gate_tx.send(true).expect("open gate");
    tokio::time::timeout(WAIT_GUARD, async {
        loop {
            let captured = cut.media.captured();
            if captured.len() == 1 && captured[0].is_released() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("late capture released");

    assert!(bob.drain_from("alice").await.is_empty(), "no offer after cancel");

    cut.client.shutdown().await.expect("shutdown");
}

// ===== Duration clock =====

#[tokio::test(start_paused = true)]
async fn duration_counts_only_while_connected_and_freezes_at_end() {
    init_tracing();
    let hub = InMemoryHub::new();
    let cut = build_client(&hub, "alice", Some(Duration::from_secs(120)));
    let mut bob = FakeRemote::join(&hub, "bob", "alice").await;

    let events = collect_events(&cut.client);
    let (_session_id, _) = connect_outgoing(&cut, &mut bob).await;

    let connected = cut.client.snapshot().expect("snapshot");
    assert_eq!(connected.duration_seconds, 0);

    tokio::time::sleep(Duration::from_millis(3500)).await;
    tokio::task::yield_now().await;
    let snapshot = cut.client.snapshot().expect("snapshot");
    assert_eq!(snapshot.duration_seconds, 3);

    cut.client.end_call().await.expect("hangup");
    wait_for_state(&cut.client, CallState::Ended).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    let frozen = cut.client.snapshot().expect("snapshot");
    assert_eq!(frozen.duration_seconds, 3, "duration frozen after end");

    let events = events.lock();
    assert!(events.iter().any(|event| matches!(
        event,
        CallEvent::Ended { outcome: CallOutcome::Completed, duration_seconds: 3, .. }
    )));

    cut.client.shutdown().await.expect("shutdown");
}

// ===== Missed incoming call =====

#[tokio::test(start_paused = true)]
async fn unanswered_incoming_call_is_missed_and_publishes_nothing() {
    init_tracing();
    let hub = InMemoryHub::new();
    let cut = build_client(&hub, "alice", Some(Duration::from_secs(5)));
    let mut bob = FakeRemote::join(&hub, "bob", "alice").await;

    cut.client.listen("bob").await.expect("listen");

    let session_id = SessionId::new();
    bob.publish(SignalMessage::offer(
        session_id,
        bob.id.clone(),
        "v=0 offer".into(),
        MediaKind::Voice,
    ))
    .await;
    wait_for_state(&cut.client, CallState::Ringing).await;

    // Let the ring timer run out.
    let ended = wait_for_state(&cut.client, CallState::Ended).await;
    assert_eq!(ended.outcome, Some(CallOutcome::Missed));

    assert!(bob.drain_from("alice").await.is_empty(), "missed call publishes nothing");

    let records = cut.history.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, CallOutcome::Missed);
    assert_eq!(records[0].caller_id.as_str(), "bob");
    assert_eq!(records[0].receiver_id.as_str(), "alice");

    cut.client.shutdown().await.expect("shutdown");
}

// ===== Toggles =====

#[tokio::test]
async fn toggles_apply_to_the_local_handle_and_respect_states() {
    init_tracing();
    let hub = InMemoryHub::new();
    let cut = build_client(&hub, "alice", None);
    let mut bob = FakeRemote::join(&hub, "bob", "alice").await;

    // No call yet.
    assert!(cut.client.toggle_mute().await.is_err());

    connect_outgoing(&cut, &mut bob).await;

    assert!(cut.client.toggle_mute().await.expect("mute"));
    assert!(cut.client.toggle_video().await.expect("suppress video"));

    let probes = cut.media.captured();
    assert_eq!(probes.len(), 1);
    assert!(!probes[0].audio_enabled(), "mute reaches the handle");
    assert!(!probes[0].video_enabled(), "video toggle reaches the handle");

    assert!(!cut.client.toggle_mute().await.expect("unmute"));
    assert!(probes[0].audio_enabled());

    let snapshot = cut.client.snapshot().expect("snapshot");
    assert!(!snapshot.muted);
    assert!(snapshot.video_suppressed);

    cut.client.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn toggles_are_rejected_while_ringing() {
    init_tracing();
    let hub = InMemoryHub::new();
    let cut = build_client(&hub, "alice", None);
    let mut bob = FakeRemote::join(&hub, "bob", "alice").await;

    cut.client.listen("bob").await.expect("listen");
    bob.publish(SignalMessage::offer(
        SessionId::new(),
        bob.id.clone(),
        "v=0 offer".into(),
        MediaKind::Voice,
    ))
    .await;
    wait_for_state(&cut.client, CallState::Ringing).await;

    assert!(cut.client.toggle_mute().await.is_err());
    assert!(cut.client.toggle_video().await.is_err());

    cut.client.reject_call().await.expect("reject");
    let reject = bob.next_from("alice").await;
    assert_eq!(reject.kind_name(), "call-reject");

    cut.client.shutdown().await.expect("shutdown");
}

// ===== Two real clients end to end =====

#[tokio::test]
async fn two_clients_connect_and_hang_up_cleanly() {
    init_tracing();
    let hub = InMemoryHub::new();
    let alice = build_client(&hub, "alice", None);
    let bob = build_client(&hub, "bob", None);

    bob.client.listen("alice").await.expect("listen");

    let session_id = alice
        .client
        .start_call("bob", MediaKind::Video)
        .await
        .expect("start_call");

    let ringing = wait_for_state(&bob.client, CallState::Ringing).await;
    assert_eq!(ringing.session_id, session_id);
    assert_eq!(ringing.remote_participant.as_str(), "alice");

    bob.client.accept_call().await.expect("accept");
    wait_for_state(&bob.client, CallState::Connected).await;
    wait_for_state(&alice.client, CallState::Connected).await;

    alice.client.end_call().await.expect("hangup");
    let alice_ended = wait_for_state(&alice.client, CallState::Ended).await;
    let bob_ended = wait_for_state(&bob.client, CallState::Ended).await;
    assert_eq!(alice_ended.outcome, Some(CallOutcome::Completed));
    assert_eq!(bob_ended.outcome, Some(CallOutcome::Completed));

    // Both captures are released on both sides.
    for cut in [&alice, &bob] {
        let probes = cut.media.captured();
        assert_eq!(probes.len(), 1);
        assert!(probes[0].is_released());
    }

    // Both sides report history with the same caller/receiver orientation.
    for cut in [&alice, &bob] {
        let records = cut.history.records();
        assert_eq!(records.len(), 1, "one record on each side");
        assert_eq!(records[0].session_id, session_id);
        assert_eq!(records[0].caller_id.as_str(), "alice");
        assert_eq!(records[0].receiver_id.as_str(), "bob");
        assert_eq!(records[0].outcome, CallOutcome::Completed);
    }

    alice.client.shutdown().await.expect("shutdown");
    bob.client.shutdown().await.expect("shutdown");
}

// ===== Peer failure mid-call =====

#[tokio::test]
async fn peer_failure_ends_the_call_and_notifies_the_remote() {
    init_tracing();
    let hub = InMemoryHub::new();
    let cut = build_client(&hub, "alice", None);
    let mut bob = FakeRemote::join(&hub, "bob", "alice").await;

    connect_outgoing(&cut, &mut bob).await;

    cut.peers
        .last()
        .expect("peer created")
        .emit(PeerEvent::ConnectionFailed {
            reason: "ice failed".into(),
        })
        .await;

    let ended = wait_for_state(&cut.client, CallState::Ended).await;
    assert_eq!(ended.outcome, Some(CallOutcome::ConnectionFailed));

    // Best-effort call-end so the remote does not sit on a dead call.
    let end_notice = bob.next_from("alice").await;
    assert_eq!(end_notice.kind_name(), "call-end");

    let probes = cut.media.captured();
    assert!(probes[0].is_released());

    cut.client.shutdown().await.expect("shutdown");
}
