//! Error types for the call engine

use thiserror::Error;

use crate::types::CallState;
use unitynets_media_core::MediaError;
use unitynets_signaling_core::TransportError;

/// Result type for call operations.
pub type CallResult<T> = Result<T, CallError>;

/// Errors surfaced by the call engine and client.
///
/// Protocol-level problems (malformed or unexpected signaling) never show up
/// here: the engine logs and ignores them. What does surface is what the
/// caller of a command can act on.
#[derive(Debug, Error)]
pub enum CallError {
    /// The signaling transport failed locally (subscribe or publish).
    #[error("signaling transport error: {0}")]
    Transport(#[from] TransportError),

    /// Media capture or negotiation failed.
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    /// The command is not valid in the session's current state.
    #[error("invalid call state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: CallState },

    /// A non-ended session already exists; one active call at a time.
    #[error("another call is already active")]
    AlreadyInCall,

    /// The command needs an active session and there is none.
    #[error("no active call")]
    NoActiveCall,

    /// The client was misconfigured (missing collaborator, bad parameter).
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The engine task is gone (shut down or crashed).
    #[error("call engine stopped")]
    EngineStopped,

    /// Unexpected internal failure.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CallError {
    /// Create an invalid-state error.
    pub fn invalid_state(expected: impl Into<String>, actual: CallState) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual,
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
