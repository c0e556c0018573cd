//! Scriptable mocks for the media ports (feature `mock-media`)
//!
//! Used by the call-core integration tests to drive every exit path of the
//! state machine without real devices: captures can be scripted to fail with
//! a specific [`MediaError`], peer connections record what was applied to
//! them and let the test inject [`PeerEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use unitynets_signaling_core::MediaKind;

use crate::error::{MediaError, MediaResult};
use crate::handle::{MediaHandle, MediaHandleProbe};
use crate::peer::{MediaSource, PeerConnection, PeerConnectionFactory, PeerEvent};
use crate::types::{IceCandidate, SessionDescription};

const MOCK_EVENT_BUFFER: usize = 32;

/// In-process media source. Captures succeed with fresh handles unless a
/// failure has been scripted.
#[derive(Clone, Default)]
pub struct MockMediaSource {
    state: Arc<MockSourceState>,
}

#[derive(Default)]
struct MockSourceState {
    fail_next: Mutex<Option<MediaError>>,
    delay_gate: Mutex<Option<tokio::sync::watch::Receiver<bool>>>,
    captured: Mutex<Vec<MediaHandleProbe>>,
}

impl MockMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next capture fail with `error`.
    pub fn fail_next(&self, error: MediaError) {
        *self.state.fail_next.lock() = Some(error);
    }

    /// Gate the next captures until `release_gate` flips the watch to
    /// `true`, simulating a slow permission prompt.
    pub fn hold_until(&self, gate: tokio::sync::watch::Receiver<bool>) {
        *self.state.delay_gate.lock() = Some(gate);
    }

    /// Probes for every handle this source has handed out, in order.
    pub fn captured(&self) -> Vec<MediaHandleProbe> {
        self.state.captured.lock().clone()
    }
}

#[async_trait]
impl MediaSource for MockMediaSource {
    async fn capture(&self, media_kind: MediaKind) -> MediaResult<MediaHandle> {
        let gate = self.state.delay_gate.lock().clone();
        if let Some(mut gate) = gate {
            while !*gate.borrow() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
        }
        if let Some(error) = self.state.fail_next.lock().take() {
            return Err(error);
        }
        let handle = MediaHandle::new("mock-capture", media_kind);
        self.state.captured.lock().push(handle.probe());
        Ok(handle)
    }
}

/// In-process peer connection that records applied SDP and candidates.
pub struct MockPeerConnection {
    media_kind: MediaKind,
    fail_negotiation: Mutex<Option<MediaError>>,
    accepted_offer: Mutex<Option<SessionDescription>>,
    applied_answer: Mutex<Option<SessionDescription>>,
    remote_candidates: Mutex<Vec<IceCandidate>>,
    events_tx: Mutex<Option<mpsc::Sender<PeerEvent>>>,
    events_rx: Mutex<Option<mpsc::Receiver<PeerEvent>>>,
    closed: AtomicBool,
}

impl MockPeerConnection {
    fn new(media_kind: MediaKind) -> Self {
        let (tx, rx) = mpsc::channel(MOCK_EVENT_BUFFER);
        Self {
            media_kind,
            fail_negotiation: Mutex::new(None),
            accepted_offer: Mutex::new(None),
            applied_answer: Mutex::new(None),
            remote_candidates: Mutex::new(Vec::new()),
            events_tx: Mutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
        }
    }

    /// Make the next negotiation call fail with `error`.
    pub fn fail_negotiation(&self, error: MediaError) {
        *self.fail_negotiation.lock() = Some(error);
    }

    /// Inject a peer event, as the platform stack would.
    pub async fn emit(&self, event: PeerEvent) {
        let tx = self.events_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// The remote offer this connection accepted, if any.
    pub fn accepted_offer(&self) -> Option<SessionDescription> {
        self.accepted_offer.lock().clone()
    }

    /// The remote answer applied to this connection, if any.
    pub fn applied_answer(&self) -> Option<SessionDescription> {
        self.applied_answer.lock().clone()
    }

    /// Remote candidates fed to this connection, in arrival order.
    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.remote_candidates.lock().clone()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn take_scripted_failure(&self) -> MediaResult<()> {
        match self.fail_negotiation.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn create_offer(&self) -> MediaResult<SessionDescription> {
        self.take_scripted_failure()?;
        Ok(SessionDescription::offer(format!(
            "v=0 mock-offer {}",
            self.media_kind
        )))
    }

    async fn accept_offer(&self, offer: SessionDescription) -> MediaResult<SessionDescription> {
        self.take_scripted_failure()?;
        *self.accepted_offer.lock() = Some(offer);
        Ok(SessionDescription::answer(format!(
            "v=0 mock-answer {}",
            self.media_kind
        )))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> MediaResult<()> {
        self.take_scripted_failure()?;
        *self.applied_answer.lock() = Some(answer);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> MediaResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MediaError::Closed);
        }
        self.remote_candidates.lock().push(candidate);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::Receiver<PeerEvent>> {
        self.events_rx.lock().take()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the sender ends the event stream.
        self.events_tx.lock().take();
    }
}

/// Factory handing out [`MockPeerConnection`]s and keeping them reachable
/// for test assertions.
#[derive(Clone, Default)]
pub struct MockPeerFactory {
    state: Arc<MockFactoryState>,
}

#[derive(Default)]
struct MockFactoryState {
    created: Mutex<Vec<Arc<MockPeerConnection>>>,
    fail_create: Mutex<Option<MediaError>>,
}

impl MockPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create` fail with `error`.
    pub fn fail_next(&self, error: MediaError) {
        *self.state.fail_create.lock() = Some(error);
    }

    /// Connections created so far, in creation order.
    pub fn created(&self) -> Vec<Arc<MockPeerConnection>> {
        self.state.created.lock().clone()
    }

    /// The most recently created connection, if any.
    pub fn last(&self) -> Option<Arc<MockPeerConnection>> {
        self.state.created.lock().last().cloned()
    }
}

impl PeerConnectionFactory for MockPeerFactory {
    fn create(&self, media_kind: MediaKind) -> MediaResult<Arc<dyn PeerConnection>> {
        if let Some(error) = self.state.fail_create.lock().take() {
            return Err(error);
        }
        let connection = Arc::new(MockPeerConnection::new(media_kind));
        self.state.created.lock().push(Arc::clone(&connection));
        Ok(connection)
    }
}
