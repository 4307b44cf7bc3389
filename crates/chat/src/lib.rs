#![deny(unsafe_code)]

/// Command line surface of the chat binary.
pub mod cli;
pub mod error;
/// Structured store error events and where they are published.
pub mod events;
pub mod overlay;
pub mod profile;
/// Conversation state machine driving a chat view.
pub mod session;
pub mod settings;
/// Access-checked message store operations and live subscriptions.
pub mod store;
pub mod translation;

pub use error::{ChatError, ChatResult, TranslationError};
pub use events::{ChannelErrorSink, ErrorSink, StoreErrorEvent, StoreErrorKind};
pub use overlay::{PendingId, PendingMessage, PendingOverlay};
pub use profile::{ProfileDirectory, ProfileError, UserProfile, UserRole};
pub use session::{
    ChatSession, DisplayMessage, MessageKey, RequestOutcome, SessionConfig, SessionEvent,
    SessionState, TranslationStatus,
};
pub use settings::{ChatSettings, SettingsError, SettingsStore};
pub use store::{MessageSnapshot, MessageStoreAdapter, MessageSubscription, SubscriptionItem};
pub use translation::TranslationService;
