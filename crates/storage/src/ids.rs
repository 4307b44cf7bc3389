use std::fmt;
use std::str::FromStr;

use snafu::{ResultExt, ensure};
use uuid::Uuid;

use super::error::{
    InvalidConversationIdSnafu, InvalidIdSnafu, InvalidParticipantSnafu, StorageError,
    StorageResult,
};

/// Joins the sorted participant pair. Participant ids must never contain it.
pub const CONVERSATION_ID_SEPARATOR: char = '_';

/// Store-assigned message identifier. UUIDv7 keeps ids roughly creation-ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new(raw: Uuid) -> Self {
        Self(raw)
    }

    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn parse(raw: &str) -> StorageResult<Self> {
        let parsed = Uuid::parse_str(raw).context(InvalidIdSnafu {
            stage: "parse-message-id",
            id_type: "message-id",
            raw: raw.to_string(),
        })?;
        Ok(Self(parsed))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(value: Uuid) -> Self {
        Self::new(value)
    }
}

impl FromStr for MessageId {
    type Err = StorageError;

    fn from_str(raw: &str) -> StorageResult<Self> {
        Self::parse(raw)
    }
}

/// Deterministic key for the conversation between two participants.
///
/// Both sides compute the same key without a lookup: the pair is sorted and joined
/// with [`CONVERSATION_ID_SEPARATOR`], so `from_participants(a, b)` and
/// `from_participants(b, a)` are always equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn from_participants(first: &str, second: &str) -> StorageResult<Self> {
        validate_participant(first, "conversation-id-first-participant")?;
        validate_participant(second, "conversation-id-second-participant")?;
        ensure!(
            first != second,
            InvalidParticipantSnafu {
                stage: "conversation-id-distinct-participants",
                raw: first.to_string(),
                reason: "a conversation needs two distinct participants",
            }
        );

        let (low, high) = if first <= second {
            (first, second)
        } else {
            (second, first)
        };
        Ok(Self(format!("{low}{CONVERSATION_ID_SEPARATOR}{high}")))
    }

    pub fn parse(raw: &str) -> StorageResult<Self> {
        let Some((first, second)) = raw.split_once(CONVERSATION_ID_SEPARATOR) else {
            return InvalidConversationIdSnafu {
                stage: "parse-conversation-id-separator",
                raw: raw.to_string(),
            }
            .fail();
        };

        let parsed = Self::from_participants(first, second).map_err(|_| {
            StorageError::InvalidConversationId {
                stage: "parse-conversation-id-participants",
                raw: raw.to_string(),
            }
        })?;

        // A re-sorted key means the raw form was not canonical.
        ensure!(
            parsed.0 == raw,
            InvalidConversationIdSnafu {
                stage: "parse-conversation-id-canonical",
                raw: raw.to_string(),
            }
        );

        Ok(parsed)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the sorted participant pair encoded in the key.
    pub fn participants(&self) -> (&str, &str) {
        self.0
            .split_once(CONVERSATION_ID_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""))
    }

    pub fn includes(&self, user_id: &str) -> bool {
        let (first, second) = self.participants();
        first == user_id || second == user_id
    }

    /// The participant that is not `user_id`, if `user_id` takes part at all.
    pub fn counterpart(&self, user_id: &str) -> Option<&str> {
        let (first, second) = self.participants();
        if first == user_id {
            Some(second)
        } else if second == user_id {
            Some(first)
        } else {
            None
        }
    }

    pub fn messages_path(&self) -> String {
        format!("conversations/{}/messages", self.0)
    }

    pub fn message_path(&self, message_id: MessageId) -> String {
        format!("conversations/{}/messages/{message_id}", self.0)
    }

    pub fn document_path(&self) -> String {
        format!("conversations/{}", self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl FromStr for ConversationId {
    type Err = StorageError;

    fn from_str(raw: &str) -> StorageResult<Self> {
        Self::parse(raw)
    }
}

fn validate_participant(raw: &str, stage: &'static str) -> StorageResult<()> {
    ensure!(
        !raw.is_empty(),
        InvalidParticipantSnafu {
            stage,
            raw: raw.to_string(),
            reason: "participant id is empty",
        }
    );
    ensure!(
        !raw.contains(CONVERSATION_ID_SEPARATOR),
        InvalidParticipantSnafu {
            stage,
            raw: raw.to_string(),
            reason: "participant id contains the conversation separator",
        }
    );
    Ok(())
}
