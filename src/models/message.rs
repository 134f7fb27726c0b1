//! Message-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Opaque identifier assigned by the document store; the dedup key.
pub type MessageId = String;

/// Unordered {sender, receiver} pair scoping a message to exactly one
/// two-party conversation. Normalized on construction so `{a, b}` and
/// `{b, a}` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantsPair {
    first: UserId,
    second: UserId,
}

impl ParticipantsPair {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }
}

/// A delivered chat message.
///
/// Immutable except the `read` flag, which transitions false -> true exactly
/// once, performed by the receiver's synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    /// Server-assigned on write, monotonic per store.
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl Message {
    /// The conversation this message belongs to, invariant for its lifetime.
    pub fn participants(&self) -> ParticipantsPair {
        ParticipantsPair::new(self.sender_id.clone(), self.receiver_id.clone())
    }
}

/// Client-side message payload; the store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participants_pair_is_unordered() {
        let ab = ParticipantsPair::new("a".into(), "b".into());
        let ba = ParticipantsPair::new("b".into(), "a".into());
        assert_eq!(ab, ba);
        assert_ne!(ab, ParticipantsPair::new("a".into(), "c".into()));
    }
}
