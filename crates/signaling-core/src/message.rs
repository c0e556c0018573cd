//! Wire model for call signaling messages
//!
//! Messages are JSON-shaped as `{ kind, sessionId, senderId, payload }`,
//! where `payload` varies by `kind`. The six kinds a peer must understand are
//! modeled as a closed tagged enum; any kind this build does not know
//! deserializes to [`SignalBody::Unknown`] and is ignored by consumers
//! (forward compatibility), never treated as an error.

use serde::{Deserialize, Serialize};

use crate::types::{MediaKind, ParticipantId, SessionId};

/// One signaling message exchanged over a call channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    /// Call attempt this message belongs to.
    pub session_id: SessionId,
    /// Participant that sent the message. Subscribers see their own
    /// publishes echoed back and filter on this field.
    pub sender_id: ParticipantId,
    /// Kind tag plus kind-specific payload.
    #[serde(flatten)]
    pub body: SignalBody,
}

/// Kind-tagged message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum SignalBody {
    /// Session-description offer opening a call attempt.
    CallOffer(OfferPayload),
    /// Session-description answer accepting an offer.
    CallAnswer(AnswerPayload),
    /// A connectivity option for the direct media path.
    IceCandidate(CandidatePayload),
    /// Callee declined (or the offer was auto-rejected while busy).
    CallReject,
    /// Either side hung up.
    CallEnd,
    /// Caller's ring timer elapsed without an answer.
    CallTimeout,
    /// A kind this build does not understand. Logged and ignored.
    #[serde(other)]
    Unknown,
}

/// Payload of a `call-offer` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    /// SDP offer blob.
    pub sdp: String,
    /// Media the caller wants to establish.
    pub media_kind: MediaKind,
}

/// Payload of a `call-answer` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerPayload {
    /// SDP answer blob.
    pub sdp: String,
}

/// Payload of an `ice-candidate` message. Field names follow the browser's
/// `RTCIceCandidateInit` dictionary so payloads pass through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePayload {
    /// Candidate line.
    pub candidate: String,
    /// Media stream identification tag, if known.
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description this candidate applies to, if known.
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u32>,
}

impl SignalMessage {
    /// Build a `call-offer` message.
    pub fn offer(
        session_id: SessionId,
        sender_id: ParticipantId,
        sdp: String,
        media_kind: MediaKind,
    ) -> Self {
        Self {
            session_id,
            sender_id,
            body: SignalBody::CallOffer(OfferPayload { sdp, media_kind }),
        }
    }

    /// Build a `call-answer` message.
    pub fn answer(session_id: SessionId, sender_id: ParticipantId, sdp: String) -> Self {
        Self {
            session_id,
            sender_id,
            body: SignalBody::CallAnswer(AnswerPayload { sdp }),
        }
    }

    /// Build an `ice-candidate` message.
    pub fn candidate(
        session_id: SessionId,
        sender_id: ParticipantId,
        payload: CandidatePayload,
    ) -> Self {
        Self {
            session_id,
            sender_id,
            body: SignalBody::IceCandidate(payload),
        }
    }

    /// Build a `call-reject` message.
    pub fn reject(session_id: SessionId, sender_id: ParticipantId) -> Self {
        Self {
            session_id,
            sender_id,
            body: SignalBody::CallReject,
        }
    }

    /// Build a `call-end` message.
    pub fn end(session_id: SessionId, sender_id: ParticipantId) -> Self {
        Self {
            session_id,
            sender_id,
            body: SignalBody::CallEnd,
        }
    }

    /// Build a `call-timeout` message.
    pub fn timeout(session_id: SessionId, sender_id: ParticipantId) -> Self {
        Self {
            session_id,
            sender_id,
            body: SignalBody::CallTimeout,
        }
    }

    /// Wire name of this message's kind, for logging.
    pub fn kind_name(&self) -> &'static str {
        self.body.kind_name()
    }

    /// Serialize to the JSON wire shape.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from the JSON wire shape.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl SignalBody {
    /// Wire name of this kind, for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SignalBody::CallOffer(_) => "call-offer",
            SignalBody::CallAnswer(_) => "call-answer",
            SignalBody::IceCandidate(_) => "ice-candidate",
            SignalBody::CallReject => "call-reject",
            SignalBody::CallEnd => "call-end",
            SignalBody::CallTimeout => "call-timeout",
            SignalBody::Unknown => "unknown",
        }
    }
}
