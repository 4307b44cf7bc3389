use std::fmt;

use super::ids::{ConversationId, MessageId};

/// Operation kinds named in access-rule denials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Get,
    List,
    Create,
    Update,
}

impl StoreOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub participants: [String; 2],
    pub last_message: Option<String>,
    pub updated_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: String,
    pub text: String,
    /// Assigned by the store; strictly increasing within one conversation.
    pub timestamp_ms: u64,
    pub translated_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: String,
    pub text: String,
}

impl NewMessage {
    pub fn new(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            text: text.into(),
        }
    }
}

/// Field names written by a message create, reported instead of the payload itself.
pub const MESSAGE_CREATE_SHAPE: &[&str] = &["senderId", "text", "timestamp"];

/// Field names written by the one-time translation enrichment.
pub const MESSAGE_TRANSLATION_SHAPE: &[&str] = &["translatedText"];
