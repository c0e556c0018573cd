//! Offline push fallback port
//!
//! When an outgoing attempt starts ringing the remote participant, they may
//! not be subscribed to the signaling channel at all (app closed). The
//! engine requests a push dispatch towards them and moves on — the dispatch
//! is never awaited and its failure never affects the call flow.

use async_trait::async_trait;

use crate::errors::CallResult;
use crate::types::{IncomingCallInfo, ParticipantId};

/// Requests a push notification towards a participant.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    /// Ask the push service to tell `to` about the incoming call.
    async fn notify_incoming(&self, to: &ParticipantId, info: &IncomingCallInfo) -> CallResult<()>;
}

/// Discards all dispatch requests.
#[derive(Debug, Default)]
pub struct NullPushNotifier;

#[async_trait]
impl PushNotifier for NullPushNotifier {
    async fn notify_incoming(
        &self,
        _to: &ParticipantId,
        _info: &IncomingCallInfo,
    ) -> CallResult<()> {
        Ok(())
    }
}
