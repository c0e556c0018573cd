//! Channel-key derivation
//!
//! Both peers must subscribe to the same pub/sub channel to exchange
//! signaling. The key is therefore derived from data both sides already
//! share: the unordered pair of participant ids, or an explicit conversation
//! id when the call is anchored to an existing chat.

use std::fmt;

use crate::types::ParticipantId;

/// Stable identifier of one logical signaling channel.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ChannelKey(String);

impl ChannelKey {
    /// Derive the key for a pair of participants.
    ///
    /// The pair is sorted lexicographically, so both peers arrive at the
    /// same key regardless of who initiates.
    pub fn for_pair(a: &ParticipantId, b: &ParticipantId) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("call:{}:{}", lo, hi))
    }

    /// Derive the key from an explicit conversation (chat) id.
    pub fn for_conversation(conversation_id: &str) -> Self {
        Self(format!("call:conv:{}", conversation_id))
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
