use std::time::Duration;

use lucknow_llm::FlowError;
use lucknow_storage::{MessageId, StorageError};
use snafu::Snafu;

pub type ChatResult<T> = Result<T, ChatError>;

/// Guard failures of the chat session. Store and translation failures never show up
/// here; they travel through the error sink or the session's event stream.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("cannot open a conversation with '{recipient}': {source}"))]
    InvalidRecipient {
        stage: &'static str,
        recipient: String,
        source: StorageError,
    },
    #[snafu(display("no recipient is selected"))]
    NoActiveConversation { stage: &'static str },
    #[snafu(display("message text is empty"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("message {message_id} is not in the current conversation"))]
    UnknownMessage {
        stage: &'static str,
        message_id: MessageId,
    },
    #[snafu(display("message {message_id} was sent by the local user"))]
    OwnMessage {
        stage: &'static str,
        message_id: MessageId,
    },
    #[snafu(display("message {message_id} is already translated"))]
    AlreadyTranslated {
        stage: &'static str,
        message_id: MessageId,
    },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TranslationError {
    #[snafu(display("translation failed: message text is empty"))]
    EmptyInput { stage: &'static str },
    #[snafu(display("translation failed: no answer within {}ms", timeout.as_millis()))]
    TimedOut {
        stage: &'static str,
        timeout: Duration,
    },
    #[snafu(display("translation failed: {source}"))]
    Generation {
        stage: &'static str,
        source: FlowError,
    },
    #[snafu(display("translation failed: model returned a blank translation"))]
    BlankResult { stage: &'static str },
}
