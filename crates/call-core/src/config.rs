//! Call engine configuration

use std::time::Duration;

use crate::recovery::RetryConfig;
use crate::types::ParticipantId;

/// Default time an unanswered attempt may ring before it is treated as
/// missed. A policy constant, not a correctness constraint.
pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(30);

/// Default capacity of the broadcast event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for a [`CallClient`](crate::client::CallClient).
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use unitynets_call_core::config::CallConfig;
///
/// let config = CallConfig::new("alice")
///     .with_ring_timeout(Duration::from_secs(45))
///     .with_event_capacity(64);
///
/// assert_eq!(config.ring_timeout, Duration::from_secs(45));
/// assert_eq!(config.local_participant.as_str(), "alice");
/// ```
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// The local participant all sessions belong to.
    pub local_participant: ParticipantId,

    /// How long an outgoing or incoming attempt may stay unanswered.
    pub ring_timeout: Duration,

    /// Capacity of the broadcast event channel handed to UI surfaces.
    pub event_capacity: usize,

    /// Retry policy for signaling publishes. Publish failures are retried at
    /// most once before the attempt is aborted.
    pub publish_retry: RetryConfig,

    /// Whether to report a history record to the persistence collaborator
    /// when a session ends.
    pub report_history: bool,

    /// Whether to request a push dispatch towards the remote participant
    /// when an outgoing attempt starts ringing them.
    pub push_on_calling: bool,
}

impl CallConfig {
    /// Configuration with defaults for the given local participant.
    pub fn new(local_participant: impl Into<ParticipantId>) -> Self {
        Self {
            local_participant: local_participant.into(),
            ring_timeout: DEFAULT_RING_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            publish_retry: RetryConfig::publish(),
            report_history: true,
            push_on_calling: true,
        }
    }

    /// Set the ring timeout.
    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout = timeout;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the publish retry policy.
    pub fn with_publish_retry(mut self, retry: RetryConfig) -> Self {
        self.publish_retry = retry;
        self
    }

    /// Enable or disable history reporting.
    pub fn with_report_history(mut self, report: bool) -> Self {
        self.report_history = report;
        self
    }

    /// Enable or disable the offline push fallback.
    pub fn with_push_on_calling(mut self, push: bool) -> Self {
        self.push_on_calling = push;
        self
    }
}
