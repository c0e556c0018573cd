//! Call signaling state machine for UnityNets realtime calls
//!
//! This crate coordinates two peers establishing, maintaining, and tearing
//! down an audio/video session over an unreliable, asynchronous signaling
//! channel. It owns the single source of truth for the call lifecycle —
//! idle, calling, ringing, connected, ended — and mediates between the
//! signaling transport and the platform's peer connection primitive, both of
//! which are external collaborators reached through ports.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────┐
//! │      UI surfaces        │  snapshots + events in, commands out
//! └───────────┬─────────────┘
//!             │ CallClient
//! ┌───────────▼─────────────┐
//! │       CallEngine        │  one task, owns the CallSession
//! │  ┌───────────────────┐  │
//! │  │   MASTER_TABLE    │  │  (direction, state, event) → transition
//! │  └───────────────────┘  │
//! └───┬───────────────┬─────┘
//!     │               │
//! ┌───▼──────────┐ ┌──▼──────────────┐
//! │  signaling   │ │ peer connection │  external collaborators
//! │  transport   │ │ + media source  │
//! └──────────────┘ └─────────────────┘
//! ```
//!
//! Guarantees the engine enforces on every path:
//!
//! - at most one non-ended session per local participant
//! - `Ended` is terminal; every new attempt is a fresh session
//! - both media handles are released exactly once when a session ends
//! - async continuations are tagged with their session id and discarded if
//!   the session is no longer the active one
//! - protocol garbage (unknown kinds, stale answers, duplicate offers) is
//!   logged and ignored, never a crash or a surprise transition

pub mod adapters;
pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod recovery;
pub mod state_table;
pub mod types;

mod engine;
mod session;

pub use adapters::{
    CallHistorySink, MemoryHistorySink, NullHistorySink, NullPushNotifier, PushNotifier,
};
pub use client::{CallClient, CallClientBuilder};
pub use config::CallConfig;
pub use errors::{CallError, CallResult};
pub use events::{CallEvent, EventStream};
pub use types::{
    format_duration, CallDirection, CallHistoryRecord, CallOutcome, CallSnapshot, CallState,
    IncomingCallInfo, MediaKind, ParticipantId, SessionId,
};
