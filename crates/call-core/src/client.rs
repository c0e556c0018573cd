//! Client facade over the call engine
//!
//! `CallClient` is what applications hold: the four call commands, the
//! toggles, the event stream, and the snapshot watch. It owns nothing but
//! channels into the engine task — the session itself lives there.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unitynets_call_core::{CallClient, CallConfig, MediaKind};
//! use unitynets_signaling_core::InMemoryHub;
//! # use unitynets_media_core::{MediaSource, PeerConnectionFactory};
//!
//! # async fn example(
//! #     media: Arc<dyn MediaSource>,
//! #     peers: Arc<dyn PeerConnectionFactory>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let hub = InMemoryHub::new();
//! let client = CallClient::builder(CallConfig::new("alice"))
//!     .transport(Arc::new(hub.client()))
//!     .media_source(media)
//!     .peer_factory(peers)
//!     .build()?;
//!
//! client.listen("bob").await?;
//! let session_id = client.start_call("bob", MediaKind::Voice).await?;
//! println!("calling: {session_id}");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use unitynets_media_core::{MediaSource, PeerConnectionFactory};
use unitynets_signaling_core::{ChannelKey, SignalingTransport};

use crate::adapters::{CallHistorySink, NullHistorySink, NullPushNotifier, PushNotifier};
use crate::config::CallConfig;
use crate::engine::{spawn_engine, CallCommand, EngineContext, EngineEvent};
use crate::errors::{CallError, CallResult};
use crate::events::{EventEmitter, EventStream};
use crate::types::{CallSnapshot, MediaKind, ParticipantId, SessionId};

/// Handle to a running call engine.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Dropping the
/// client aborts the engine task — call [`CallClient::shutdown`] for a clean
/// teardown that hangs up an active call first.
pub struct CallClient {
    local: ParticipantId,
    tx: mpsc::Sender<EngineEvent>,
    events: EventEmitter,
    snapshots: watch::Receiver<Option<CallSnapshot>>,
    engine: Mutex<Option<JoinHandle<()>>>,
}

impl CallClient {
    /// Start building a client for the given configuration.
    pub fn builder(config: CallConfig) -> CallClientBuilder {
        CallClientBuilder::new(config)
    }

    /// The participant this client acts as.
    pub fn local_participant(&self) -> &ParticipantId {
        &self.local
    }

    /// Initiate a call to `remote`. Returns the new session id; progress is
    /// reported through events and snapshots.
    pub async fn start_call(
        &self,
        remote: impl Into<ParticipantId>,
        media_kind: MediaKind,
    ) -> CallResult<SessionId> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineEvent::Command(CallCommand::Start {
            remote: remote.into(),
            media_kind,
            reply,
        }))
        .await?;
        rx.await.map_err(|_| CallError::EngineStopped)?
    }

    /// Accept the ringing incoming call.
    pub async fn accept_call(&self) -> CallResult<()> {
        self.simple_command(|reply| CallCommand::Accept { reply }).await
    }

    /// Decline the ringing incoming call.
    pub async fn reject_call(&self) -> CallResult<()> {
        self.simple_command(|reply| CallCommand::Reject { reply }).await
    }

    /// Hang up the active call (or cancel an attempt that has not been
    /// answered yet).
    pub async fn end_call(&self) -> CallResult<()> {
        self.simple_command(|reply| CallCommand::End { reply }).await
    }

    /// Toggle the local audio mute flag. Returns the new value.
    pub async fn toggle_mute(&self) -> CallResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineEvent::Command(CallCommand::ToggleMute { reply }))
            .await?;
        rx.await.map_err(|_| CallError::EngineStopped)?
    }

    /// Toggle the local video suppression flag. Returns the new value.
    pub async fn toggle_video(&self) -> CallResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineEvent::Command(CallCommand::ToggleVideo { reply }))
            .await?;
        rx.await.map_err(|_| CallError::EngineStopped)?
    }

    /// Listen for incoming calls from `remote`. The subscription persists
    /// across sessions until shutdown.
    pub async fn listen(&self, remote: impl Into<ParticipantId>) -> CallResult<()> {
        let channel = ChannelKey::for_pair(&self.local, &remote.into());
        self.listen_channel(channel).await
    }

    /// Listen for incoming calls on an explicit conversation channel.
    pub async fn listen_conversation(&self, conversation_id: &str) -> CallResult<()> {
        self.listen_channel(ChannelKey::for_conversation(conversation_id))
            .await
    }

    async fn listen_channel(&self, channel: ChannelKey) -> CallResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineEvent::Command(CallCommand::Listen { channel, reply }))
            .await?;
        rx.await.map_err(|_| CallError::EngineStopped)?
    }

    /// Latest snapshot of the current (or just-ended) session.
    pub fn snapshot(&self) -> Option<CallSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Watch snapshots as they change.
    pub fn watch_snapshots(&self) -> watch::Receiver<Option<CallSnapshot>> {
        self.snapshots.clone()
    }

    /// Subscribe to lifecycle events from this point on.
    pub fn events(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Hang up any active call, release all subscriptions, and stop the
    /// engine task.
    pub async fn shutdown(&self) -> CallResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineEvent::Command(CallCommand::Shutdown { reply }))
            .await?;
        rx.await.map_err(|_| CallError::EngineStopped)?;
        if let Some(join) = self.engine.lock().take() {
            let _ = join.await;
        }
        Ok(())
    }

    async fn simple_command(
        &self,
        make: impl FnOnce(oneshot::Sender<CallResult<()>>) -> CallCommand,
    ) -> CallResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineEvent::Command(make(reply))).await?;
        rx.await.map_err(|_| CallError::EngineStopped)?
    }

    async fn send(&self, event: EngineEvent) -> CallResult<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| CallError::EngineStopped)
    }
}

impl Drop for CallClient {
    fn drop(&mut self) {
        if let Some(join) = self.engine.lock().take() {
            join.abort();
        }
    }
}

/// Builder wiring a [`CallClient`] to its collaborators.
pub struct CallClientBuilder {
    config: CallConfig,
    transport: Option<Arc<dyn SignalingTransport>>,
    media: Option<Arc<dyn MediaSource>>,
    peers: Option<Arc<dyn PeerConnectionFactory>>,
    history: Arc<dyn CallHistorySink>,
    push: Arc<dyn PushNotifier>,
}

impl CallClientBuilder {
    /// Builder with the default (no-op) history and push collaborators.
    pub fn new(config: CallConfig) -> Self {
        Self {
            config,
            transport: None,
            media: None,
            peers: None,
            history: Arc::new(NullHistorySink),
            push: Arc::new(NullPushNotifier),
        }
    }

    /// Set the signaling transport. Required.
    pub fn transport(mut self, transport: Arc<dyn SignalingTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the local media source. Required.
    pub fn media_source(mut self, media: Arc<dyn MediaSource>) -> Self {
        self.media = Some(media);
        self
    }

    /// Set the peer connection factory. Required.
    pub fn peer_factory(mut self, peers: Arc<dyn PeerConnectionFactory>) -> Self {
        self.peers = Some(peers);
        self
    }

    /// Set the call history sink. Defaults to a no-op.
    pub fn history_sink(mut self, history: Arc<dyn CallHistorySink>) -> Self {
        self.history = history;
        self
    }

    /// Set the push notifier. Defaults to a no-op.
    pub fn push_notifier(mut self, push: Arc<dyn PushNotifier>) -> Self {
        self.push = push;
        self
    }

    /// Spawn the engine task and return the client. Must be called from
    /// within a tokio runtime.
    pub fn build(self) -> CallResult<CallClient> {
        let transport = self
            .transport
            .ok_or_else(|| CallError::configuration("signaling transport is required"))?;
        let media = self
            .media
            .ok_or_else(|| CallError::configuration("media source is required"))?;
        let peers = self
            .peers
            .ok_or_else(|| CallError::configuration("peer connection factory is required"))?;

        let local = self.config.local_participant.clone();
        let handles = spawn_engine(EngineContext {
            config: self.config,
            transport,
            media,
            peers,
            history: self.history,
            push: self.push,
        });

        Ok(CallClient {
            local,
            tx: handles.tx,
            events: handles.events,
            snapshots: handles.snapshots,
            engine: Mutex::new(Some(handles.join)),
        })
    }
}
