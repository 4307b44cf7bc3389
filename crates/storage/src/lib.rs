pub mod error;
pub mod ids;
pub mod sqlite;
pub mod types;

use futures::future::BoxFuture;
use tokio::sync::watch;

pub use error::{StorageError, StorageResult};
pub use ids::{CONVERSATION_ID_SEPARATOR, ConversationId, MessageId};
pub use sqlite::SqliteStorage;
pub use types::{
    ConversationRecord, MESSAGE_CREATE_SHAPE, MESSAGE_TRANSLATION_SHAPE, MessageRecord,
    NewMessage, StoreOperation,
};

/// Conversation documents plus the change feed that live subscriptions hang off.
///
/// Every read takes the acting user so the store can apply its access rules: only the
/// two participants encoded in a [`ConversationId`] may touch that conversation.
pub trait ConversationStore: Send + Sync {
    fn get_conversation<'a>(
        &'a self,
        actor: &'a str,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, StorageResult<Option<ConversationRecord>>>;
    fn list_conversations<'a>(
        &'a self,
        actor: &'a str,
    ) -> BoxFuture<'a, StorageResult<Vec<ConversationRecord>>>;
    /// Version counter bumped after every committed write to the conversation.
    fn watch_conversation(&self, conversation_id: &ConversationId) -> watch::Receiver<u64>;
}

pub trait MessageStore: Send + Sync {
    /// Inserts the message and merge-upserts the parent conversation in one transaction.
    /// The sender is the acting user.
    fn append_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>>;
    /// Most recent `limit` messages, returned in ascending timestamp order.
    fn recent_messages<'a>(
        &'a self,
        actor: &'a str,
        conversation_id: &'a ConversationId,
        limit: u32,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>>;
    fn get_message<'a>(
        &'a self,
        actor: &'a str,
        conversation_id: &'a ConversationId,
        message_id: MessageId,
    ) -> BoxFuture<'a, StorageResult<Option<MessageRecord>>>;
    /// Writes `translated_text` and nothing else.
    fn set_translation<'a>(
        &'a self,
        actor: &'a str,
        conversation_id: &'a ConversationId,
        message_id: MessageId,
        translated_text: String,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>>;
}

pub trait Storage: ConversationStore + MessageStore {}

impl<T> Storage for T where T: ConversationStore + MessageStore {}
