use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use lucknow_storage::{ConversationId, MessageId, MessageRecord};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::sync::mpsc;

use super::error::{
    AlreadyTranslatedSnafu, ChatResult, EmptyMessageSnafu, InvalidRecipientSnafu,
    NoActiveConversationSnafu, OwnMessageSnafu, TranslationError, UnknownMessageSnafu,
};
use super::overlay::{PendingId, PendingOverlay};
use super::store::{MessageStoreAdapter, MessageSubscription, SubscriptionItem};
use super::translation::{DEFAULT_TARGET_LANGUAGE, TranslationService};

pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub local_user: String,
    pub target_language: String,
    pub history_limit: u32,
}

impl SessionConfig {
    pub fn new(local_user: impl Into<String>) -> Self {
        Self {
            local_user: local_user.into(),
            target_language: DEFAULT_TARGET_LANGUAGE.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_target_language(mut self, target_language: impl Into<String>) -> Self {
        self.target_language = target_language.into();
        self
    }

    pub fn with_history_limit(mut self, history_limit: u32) -> Self {
        self.history_limit = history_limit;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No recipient selected.
    Idle,
    /// Subscribed, first snapshot not in yet.
    Loading,
    Live,
    /// The live query failed and will not resume on its own.
    Disconnected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationStatus {
    Translating,
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Started,
    /// A translation for the message is already running; nothing new was started.
    AlreadyInFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Snapshot { message_count: usize },
    SubscriptionEnded { reason: String },
    MessageSent { message_id: MessageId },
    SendFailed { text: String },
    TranslationReady { message_id: MessageId },
    TranslationFailed { message_id: MessageId, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKey {
    Confirmed(MessageId),
    Pending(PendingId),
}

/// One row of the conversation view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub key: MessageKey,
    pub sender_id: String,
    pub text: String,
    pub translated_text: Option<String>,
    pub timestamp_ms: Option<u64>,
    pub is_own: bool,
    pub translation: Option<TranslationStatus>,
    /// Whether the translate affordance is offered for this row.
    pub can_translate: bool,
}

impl DisplayMessage {
    pub fn is_pending(&self) -> bool {
        matches!(self.key, MessageKey::Pending(_))
    }
}

enum TaskOutcome {
    Sent {
        conversation_id: ConversationId,
        pending: PendingId,
        text: String,
        message_id: Option<MessageId>,
    },
    Translated {
        conversation_id: ConversationId,
        message_id: MessageId,
        result: Result<String, TranslationError>,
        stored: bool,
    },
}

enum Incoming {
    Item(Option<SubscriptionItem>),
    Task(TaskOutcome),
}

/// Drives one open chat view: recipient selection, sends with an optimistic overlay,
/// and guarded per-message translation. All I/O runs in background tasks; their
/// results are applied in [`ChatSession::next_event`].
pub struct ChatSession {
    config: SessionConfig,
    adapter: MessageStoreAdapter,
    translator: TranslationService,
    state: SessionState,
    recipient: Option<String>,
    conversation_id: Option<ConversationId>,
    subscription: Option<MessageSubscription>,
    confirmed: Vec<MessageRecord>,
    overlay: PendingOverlay,
    translations: HashMap<MessageId, TranslationStatus>,
    /// Messages with a translation task running. Survives recipient switches so a
    /// message is never translated twice at once.
    translating: HashSet<MessageId>,
    draft: String,
    tasks_tx: mpsc::UnboundedSender<TaskOutcome>,
    tasks_rx: mpsc::UnboundedReceiver<TaskOutcome>,
    in_flight: usize,
}

impl ChatSession {
    pub fn new(
        config: SessionConfig,
        adapter: MessageStoreAdapter,
        translator: TranslationService,
    ) -> Self {
        let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();
        Self {
            config,
            adapter,
            translator,
            state: SessionState::Idle,
            recipient: None,
            conversation_id: None,
            subscription: None,
            confirmed: Vec::new(),
            overlay: PendingOverlay::new(),
            translations: HashMap::new(),
            translating: HashSet::new(),
            draft: String::new(),
            tasks_tx,
            tasks_rx,
            in_flight: 0,
        }
    }

    pub fn local_user(&self) -> &str {
        &self.config.local_user
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn target_language(&self) -> &str {
        &self.config.target_language
    }

    pub fn set_target_language(&mut self, target_language: impl Into<String>) {
        self.config.target_language = target_language.into();
    }

    pub fn pending_count(&self) -> usize {
        self.overlay.len()
    }

    pub fn translation_status(&self, message_id: MessageId) -> Option<TranslationStatus> {
        if self.translating.contains(&message_id) {
            return Some(TranslationStatus::Translating);
        }
        self.translations.get(&message_id).cloned()
    }

    /// Switches the view to the conversation with `recipient`. The previous
    /// subscription is cancelled before the new one starts.
    pub fn select_recipient(&mut self, recipient: &str) -> ChatResult<ConversationId> {
        let conversation_id = ConversationId::from_participants(&self.config.local_user, recipient)
            .context(InvalidRecipientSnafu {
                stage: "select-recipient",
                recipient,
            })?;

        self.release_conversation();
        let subscription = self.adapter.subscribe(
            &self.config.local_user,
            conversation_id.clone(),
            self.config.history_limit,
        );

        tracing::info!(
            local_user = %self.config.local_user,
            recipient,
            conversation_id = %conversation_id,
            "conversation opened"
        );
        self.subscription = Some(subscription);
        self.recipient = Some(recipient.to_string());
        self.conversation_id = Some(conversation_id.clone());
        self.state = SessionState::Loading;
        Ok(conversation_id)
    }

    pub fn clear_recipient(&mut self) {
        self.release_conversation();
        self.state = SessionState::Idle;
    }

    fn release_conversation(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
            tracing::debug!(
                conversation_id = %subscription.conversation_id(),
                "conversation released"
            );
        }
        self.recipient = None;
        self.conversation_id = None;
        self.confirmed.clear();
        self.overlay.clear();
        self.translations.clear();
    }

    /// Sends the current draft, clearing it before the write settles.
    pub fn submit(&mut self) -> ChatResult<PendingId> {
        ensure!(
            !self.draft.trim().is_empty(),
            EmptyMessageSnafu {
                stage: "submit-draft",
            }
        );
        ensure!(
            self.conversation_id.is_some(),
            NoActiveConversationSnafu {
                stage: "submit-draft",
            }
        );
        let text = std::mem::take(&mut self.draft);
        self.send(&text)
    }

    /// Starts an append in the background and shows the text as pending right away.
    /// Further sends are accepted while earlier ones are still in flight.
    pub fn send(&mut self, text: &str) -> ChatResult<PendingId> {
        let text = text.trim();
        ensure!(!text.is_empty(), EmptyMessageSnafu { stage: "send" });
        let conversation_id = self
            .conversation_id
            .clone()
            .context(NoActiveConversationSnafu { stage: "send" })?;

        let pending = self
            .overlay
            .push(&self.config.local_user, text, unix_timestamp_millis());

        let adapter = self.adapter.clone();
        let tasks = self.tasks_tx.clone();
        let sender_id = self.config.local_user.clone();
        let text = text.to_string();
        self.in_flight += 1;
        tokio::spawn(async move {
            let message_id = adapter.append(&conversation_id, &sender_id, &text).await;
            let _ = tasks.send(TaskOutcome::Sent {
                conversation_id,
                pending,
                text,
                message_id,
            });
        });

        Ok(pending)
    }

    /// Translates a message from the other participant into the session's target
    /// language and stores the result on the message.
    pub fn request_translation(&mut self, message_id: MessageId) -> ChatResult<RequestOutcome> {
        let conversation_id = self
            .conversation_id
            .clone()
            .context(NoActiveConversationSnafu {
                stage: "request-translation",
            })?;
        let message = self
            .confirmed
            .iter()
            .find(|message| message.id == message_id)
            .context(UnknownMessageSnafu {
                stage: "request-translation",
                message_id,
            })?;
        ensure!(
            message.sender_id != self.config.local_user,
            OwnMessageSnafu {
                stage: "request-translation",
                message_id,
            }
        );
        ensure!(
            message.translated_text.is_none(),
            AlreadyTranslatedSnafu {
                stage: "request-translation",
                message_id,
            }
        );
        if self.translating.contains(&message_id) {
            tracing::debug!(message_id = %message_id, "translation already in flight");
            return Ok(RequestOutcome::AlreadyInFlight);
        }

        let body = message.text.clone();
        self.translations.remove(&message_id);
        self.translating.insert(message_id);

        let adapter = self.adapter.clone();
        let translator = self.translator.clone();
        let tasks = self.tasks_tx.clone();
        let actor = self.config.local_user.clone();
        let target_language = self.config.target_language.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = translator.translate(&body, &target_language).await;
            let stored = match &result {
                Ok(translated) => {
                    adapter
                        .set_translation(&actor, &conversation_id, message_id, translated.clone())
                        .await
                }
                Err(_) => false,
            };
            let _ = tasks.send(TaskOutcome::Translated {
                conversation_id,
                message_id,
                result,
                stored,
            });
        });

        Ok(RequestOutcome::Started)
    }

    /// Waits for the next subscription item or background result and applies it.
    /// Returns `None` when there is no subscription and nothing in flight.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if self.subscription.is_none() && self.in_flight == 0 {
                return None;
            }

            let incoming = tokio::select! {
                item = next_subscription_item(self.subscription.as_mut()) => Incoming::Item(item),
                Some(outcome) = self.tasks_rx.recv() => Incoming::Task(outcome),
            };

            let event = match incoming {
                Incoming::Item(item) => self.apply_item(item),
                Incoming::Task(outcome) => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    self.apply_outcome(outcome)
                }
            };
            if let Some(event) = event {
                return Some(event);
            }
        }
    }

    fn apply_item(&mut self, item: Option<SubscriptionItem>) -> Option<SessionEvent> {
        match item {
            Some(SubscriptionItem::Snapshot(snapshot)) => {
                if self.conversation_id.as_ref() != Some(&snapshot.conversation_id) {
                    tracing::debug!(
                        conversation_id = %snapshot.conversation_id,
                        "discarding snapshot of an inactive conversation"
                    );
                    return None;
                }

                self.confirmed = snapshot.messages;
                self.overlay.reconcile(&self.confirmed);
                for message in &self.confirmed {
                    if message.translated_text.is_some() {
                        self.translations.remove(&message.id);
                    }
                }
                self.state = SessionState::Live;
                Some(SessionEvent::Snapshot {
                    message_count: self.confirmed.len(),
                })
            }
            Some(SubscriptionItem::Failed {
                conversation_id,
                reason,
            }) => {
                if self.conversation_id.as_ref() != Some(&conversation_id) {
                    return None;
                }
                self.subscription = None;
                self.state = SessionState::Disconnected {
                    reason: reason.clone(),
                };
                Some(SessionEvent::SubscriptionEnded { reason })
            }
            None => {
                self.subscription = None;
                if self.conversation_id.is_none() {
                    return None;
                }
                let reason = "subscription closed".to_string();
                self.state = SessionState::Disconnected {
                    reason: reason.clone(),
                };
                Some(SessionEvent::SubscriptionEnded { reason })
            }
        }
    }

    fn apply_outcome(&mut self, outcome: TaskOutcome) -> Option<SessionEvent> {
        match outcome {
            TaskOutcome::Sent {
                conversation_id,
                pending,
                text,
                message_id,
            } => {
                if self.conversation_id.as_ref() != Some(&conversation_id) {
                    return None;
                }
                match message_id {
                    Some(message_id) => {
                        self.overlay.confirm(pending, message_id);
                        self.overlay.reconcile(&self.confirmed);
                        Some(SessionEvent::MessageSent { message_id })
                    }
                    None => {
                        self.overlay.fail(pending);
                        Some(SessionEvent::SendFailed { text })
                    }
                }
            }
            TaskOutcome::Translated {
                conversation_id,
                message_id,
                result,
                stored,
            } => {
                self.translating.remove(&message_id);
                if self.conversation_id.as_ref() != Some(&conversation_id) {
                    return None;
                }
                match result {
                    Ok(translated) if stored => {
                        self.translations.remove(&message_id);
                        if let Some(message) = self
                            .confirmed
                            .iter_mut()
                            .find(|message| message.id == message_id)
                        {
                            message.translated_text = Some(translated);
                        }
                        Some(SessionEvent::TranslationReady { message_id })
                    }
                    Ok(_) => self.fail_translation(
                        message_id,
                        "translation could not be saved".to_string(),
                    ),
                    Err(error) => {
                        tracing::warn!(message_id = %message_id, error = %error, "translation failed");
                        self.fail_translation(message_id, error.to_string())
                    }
                }
            }
        }
    }

    fn fail_translation(&mut self, message_id: MessageId, reason: String) -> Option<SessionEvent> {
        self.translations.insert(
            message_id,
            TranslationStatus::Failed {
                reason: reason.clone(),
            },
        );
        Some(SessionEvent::TranslationFailed { message_id, reason })
    }

    /// Confirmed messages in store order followed by pending sends in submission order.
    pub fn messages(&self) -> Vec<DisplayMessage> {
        let local_user = self.config.local_user.as_str();
        let confirmed = self.confirmed.iter().map(|message| {
            let is_own = message.sender_id == local_user;
            let translation = self.translation_status(message.id);
            let can_translate = !is_own
                && message.translated_text.is_none()
                && translation != Some(TranslationStatus::Translating);
            DisplayMessage {
                key: MessageKey::Confirmed(message.id),
                sender_id: message.sender_id.clone(),
                text: message.text.clone(),
                translated_text: message.translated_text.clone(),
                timestamp_ms: Some(message.timestamp_ms),
                is_own,
                translation,
                can_translate,
            }
        });
        let pending = self.overlay.entries().iter().map(|entry| DisplayMessage {
            key: MessageKey::Pending(entry.id),
            sender_id: entry.sender_id.clone(),
            text: entry.text.clone(),
            translated_text: None,
            timestamp_ms: None,
            is_own: entry.sender_id == local_user,
            translation: None,
            can_translate: false,
        });
        confirmed.chain(pending).collect()
    }
}

async fn next_subscription_item(
    subscription: Option<&mut MessageSubscription>,
) -> Option<SubscriptionItem> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

fn unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
