//! Error types for media capture and peer negotiation

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while acquiring media or negotiating a peer
/// connection.
///
/// Permission denial is kept distinct from other device failures because the
/// UI surfaces it with its own wording (open the browser/OS settings) rather
/// than a generic "call failed".
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    /// The user (or platform policy) denied access to a capture device.
    #[error("media permission denied for {device}")]
    PermissionDenied { device: String },

    /// The device exists but could not be opened.
    #[error("media device unavailable: {device}")]
    DeviceUnavailable { device: String },

    /// Offer/answer negotiation failed or produced an unusable session.
    #[error("negotiation failed: {reason}")]
    NegotiationFailed { reason: String },

    /// The peer connection was already closed.
    #[error("peer connection closed")]
    Closed,

    /// Unexpected internal failure.
    #[error("internal media error: {message}")]
    Internal { message: String },
}

impl MediaError {
    /// Create a permission-denied error.
    pub fn permission_denied(device: impl Into<String>) -> Self {
        Self::PermissionDenied {
            device: device.into(),
        }
    }

    /// Create a device-unavailable error.
    pub fn device_unavailable(device: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
        }
    }

    /// Create a negotiation failure.
    pub fn negotiation_failed(reason: impl Into<String>) -> Self {
        Self::NegotiationFailed {
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is the permission-denied case the UI words
    /// differently.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, MediaError::PermissionDenied { .. })
    }
}
