use std::sync::Arc;

use lucknow_storage::{
    ConversationId, ConversationRecord, MESSAGE_CREATE_SHAPE, MESSAGE_TRANSLATION_SHAPE,
    MessageId, MessageRecord, NewMessage, Storage, StoreOperation,
};
use tokio::sync::{mpsc, oneshot, watch};

use super::events::{ErrorSink, StoreErrorEvent};

pub const MAX_SUBSCRIPTION_LIMIT: u32 = 500;
const SUBSCRIPTION_BUFFER: usize = 16;

/// Most recent messages of one conversation, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSnapshot {
    pub conversation_id: ConversationId,
    pub version: u64,
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionItem {
    Snapshot(MessageSnapshot),
    /// The live query broke. Nothing follows this item.
    Failed {
        conversation_id: ConversationId,
        reason: String,
    },
}

/// Chat-facing view of the store: writes never raise into the caller, failures go to
/// the injected [`ErrorSink`].
#[derive(Clone)]
pub struct MessageStoreAdapter {
    store: Arc<dyn Storage>,
    sink: Arc<dyn ErrorSink>,
}

impl MessageStoreAdapter {
    pub fn new(store: Arc<dyn Storage>, sink: Arc<dyn ErrorSink>) -> Self {
        Self { store, sink }
    }

    pub async fn append(
        &self,
        conversation_id: &ConversationId,
        sender_id: &str,
        text: &str,
    ) -> Option<MessageId> {
        match self
            .store
            .append_message(conversation_id, NewMessage::new(sender_id, text))
            .await
        {
            Ok(record) => {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    message_id = %record.id,
                    timestamp_ms = record.timestamp_ms,
                    "message appended"
                );
                Some(record.id)
            }
            Err(error) => {
                self.sink.report(StoreErrorEvent::for_write(
                    &error,
                    conversation_id.messages_path(),
                    StoreOperation::Create,
                    MESSAGE_CREATE_SHAPE,
                    sender_id,
                ));
                None
            }
        }
    }

    pub async fn set_translation(
        &self,
        actor: &str,
        conversation_id: &ConversationId,
        message_id: MessageId,
        translated_text: String,
    ) -> bool {
        match self
            .store
            .set_translation(actor, conversation_id, message_id, translated_text)
            .await
        {
            Ok(_) => true,
            Err(error) => {
                self.sink.report(StoreErrorEvent::for_write(
                    &error,
                    conversation_id.message_path(message_id),
                    StoreOperation::Update,
                    MESSAGE_TRANSLATION_SHAPE,
                    actor,
                ));
                false
            }
        }
    }

    /// The actor's conversations, most recently active first. A failed listing is
    /// reported and yields an empty inbox.
    pub async fn conversations(&self, actor: &str) -> Vec<ConversationRecord> {
        match self.store.list_conversations(actor).await {
            Ok(conversations) => conversations,
            Err(error) => {
                self.sink.report(StoreErrorEvent::for_read(
                    &error,
                    "conversations".to_string(),
                    StoreOperation::List,
                    actor,
                ));
                Vec::new()
            }
        }
    }

    /// Starts a live query over the newest `limit` messages (clamped to
    /// `1..=MAX_SUBSCRIPTION_LIMIT`). A snapshot is emitted at once and after every
    /// committed change to the conversation.
    pub fn subscribe(
        &self,
        actor: &str,
        conversation_id: ConversationId,
        limit: u32,
    ) -> MessageSubscription {
        let limit = limit.clamp(1, MAX_SUBSCRIPTION_LIMIT);
        let (item_tx, item_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let changes = self.store.watch_conversation(&conversation_id);

        let worker = SubscriptionWorker {
            store: Arc::clone(&self.store),
            sink: Arc::clone(&self.sink),
            actor: actor.to_string(),
            conversation_id: conversation_id.clone(),
            limit,
            changes,
            items: item_tx,
        };
        tokio::spawn(async move {
            let conversation_id = worker.conversation_id.clone();
            tokio::select! {
                // Fires on cancel() and when the subscription handle is dropped.
                _ = cancel_rx => {
                    tracing::debug!(conversation_id = %conversation_id, "subscription cancelled");
                }
                _ = worker.run() => {}
            }
        });

        tracing::debug!(conversation_id = %conversation_id, limit, "subscription started");
        MessageSubscription {
            conversation_id,
            items: Some(item_rx),
            cancel: Some(cancel_tx),
        }
    }
}

struct SubscriptionWorker {
    store: Arc<dyn Storage>,
    sink: Arc<dyn ErrorSink>,
    actor: String,
    conversation_id: ConversationId,
    limit: u32,
    changes: watch::Receiver<u64>,
    items: mpsc::Sender<SubscriptionItem>,
}

impl SubscriptionWorker {
    async fn run(mut self) {
        loop {
            let version = *self.changes.borrow_and_update();
            let item = match self
                .store
                .recent_messages(&self.actor, &self.conversation_id, self.limit)
                .await
            {
                Ok(messages) => SubscriptionItem::Snapshot(MessageSnapshot {
                    conversation_id: self.conversation_id.clone(),
                    version,
                    messages,
                }),
                Err(error) => {
                    self.sink.report(StoreErrorEvent::for_read(
                        &error,
                        self.conversation_id.messages_path(),
                        StoreOperation::List,
                        &self.actor,
                    ));
                    let _ = self
                        .items
                        .send(SubscriptionItem::Failed {
                            conversation_id: self.conversation_id.clone(),
                            reason: error.to_string(),
                        })
                        .await;
                    return;
                }
            };

            if self.items.send(item).await.is_err() {
                return;
            }
            if self.changes.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Handle to a live query. Dropping it stops the worker and releases the change feed.
#[derive(Debug)]
pub struct MessageSubscription {
    conversation_id: ConversationId,
    items: Option<mpsc::Receiver<SubscriptionItem>>,
    cancel: Option<oneshot::Sender<()>>,
}

impl MessageSubscription {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn is_closed(&self) -> bool {
        self.items.is_none()
    }

    /// Next item, or `None` once the subscription is cancelled or has ended.
    pub async fn next(&mut self) -> Option<SubscriptionItem> {
        let items = self.items.as_mut()?;
        let item = items.recv().await;
        if item.is_none() {
            self.items = None;
        }
        item
    }

    /// Stops the worker. Items buffered but not yet received are discarded.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        self.items = None;
    }
}

impl Drop for MessageSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lucknow_storage::{MessageStore, SqliteStorage};
    use tokio::time::timeout;

    use super::*;
    use crate::events::{ChannelErrorSink, StoreErrorKind};

    const WAIT: Duration = Duration::from_secs(2);

    async fn fixture() -> (SqliteStorage, ChannelErrorSink, MessageStoreAdapter) {
        let storage = SqliteStorage::open(":memory:").await.unwrap();
        let sink = ChannelErrorSink::default();
        let adapter = MessageStoreAdapter::new(Arc::new(storage.clone()), Arc::new(sink.clone()));
        (storage, sink, adapter)
    }

    fn texts(item: SubscriptionItem) -> Vec<String> {
        match item {
            SubscriptionItem::Snapshot(snapshot) => snapshot
                .messages
                .into_iter()
                .map(|message| message.text)
                .collect(),
            SubscriptionItem::Failed { reason, .. } => panic!("subscription failed: {reason}"),
        }
    }

    async fn next_item(subscription: &mut MessageSubscription) -> SubscriptionItem {
        timeout(WAIT, subscription.next())
            .await
            .expect("subscription stalled")
            .expect("subscription ended")
    }

    #[tokio::test]
    async fn two_sends_arrive_in_order() {
        let (_storage, _sink, adapter) = fixture().await;
        let conversation_id = ConversationId::from_participants("u1", "u2").unwrap();

        assert!(adapter.append(&conversation_id, "u1", "Hello").await.is_some());
        assert!(adapter.append(&conversation_id, "u2", "How are you?").await.is_some());

        let mut subscription = adapter.subscribe("u1", conversation_id, 100);
        assert_eq!(
            texts(next_item(&mut subscription).await),
            vec!["Hello", "How are you?"]
        );
    }

    #[tokio::test]
    async fn snapshots_follow_changes_in_timestamp_order() {
        let (_storage, _sink, adapter) = fixture().await;
        let conversation_id = ConversationId::from_participants("f1", "c1").unwrap();
        let mut subscription = adapter.subscribe("c1", conversation_id.clone(), 100);
        assert!(texts(next_item(&mut subscription).await).is_empty());

        let (first, second, third) = tokio::join!(
            adapter.append(&conversation_id, "c1", "one"),
            adapter.append(&conversation_id, "f1", "two"),
            adapter.append(&conversation_id, "c1", "three"),
        );
        assert!(first.is_some() && second.is_some() && third.is_some());

        let settled = loop {
            let SubscriptionItem::Snapshot(snapshot) = next_item(&mut subscription).await else {
                panic!("subscription failed");
            };
            if snapshot.messages.len() == 3 {
                break snapshot;
            }
        };
        assert!(
            settled
                .messages
                .windows(2)
                .all(|pair| pair[0].timestamp_ms <= pair[1].timestamp_ms)
        );
    }

    #[tokio::test]
    async fn limit_is_clamped_to_at_least_one() {
        let (_storage, _sink, adapter) = fixture().await;
        let conversation_id = ConversationId::from_participants("f1", "c1").unwrap();
        adapter.append(&conversation_id, "c1", "older").await;
        adapter.append(&conversation_id, "f1", "newest").await;

        let mut subscription = adapter.subscribe("c1", conversation_id, 0);

        assert_eq!(texts(next_item(&mut subscription).await), vec!["newest"]);
    }

    #[tokio::test]
    async fn cancelled_subscription_delivers_nothing_more() {
        let (_storage, _sink, adapter) = fixture().await;
        let conversation_id = ConversationId::from_participants("f1", "c1").unwrap();
        let mut subscription = adapter.subscribe("c1", conversation_id.clone(), 100);
        next_item(&mut subscription).await;

        subscription.cancel();
        adapter.append(&conversation_id, "f1", "after cancel").await;

        assert!(subscription.is_closed());
        assert_eq!(timeout(WAIT, subscription.next()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn outsider_append_is_reported_as_write_denied() {
        let (_storage, sink, adapter) = fixture().await;
        let mut events = sink.subscribe();
        let conversation_id = ConversationId::from_participants("f1", "f2").unwrap();

        let result = adapter.append(&conversation_id, "c1", "secret text").await;

        assert_eq!(result, None);
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(event.kind, StoreErrorKind::WriteDenied);
        assert_eq!(event.path, "conversations/f1_f2/messages");
        assert_eq!(event.operation, StoreOperation::Create);
        assert_eq!(event.attempted_shape, vec!["senderId", "text", "timestamp"]);
        assert!(!event.message.contains("secret text"));
    }

    #[tokio::test]
    async fn append_to_unreachable_store_reports_write_failed() {
        let (storage, sink, adapter) = fixture().await;
        let mut events = sink.subscribe();
        let conversation_id = ConversationId::from_participants("u1", "u2").unwrap();
        storage.close().await;

        let result = adapter.append(&conversation_id, "u1", "Hello").await;

        assert_eq!(result, None);
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(event.kind, StoreErrorKind::WriteFailed);
        assert_eq!(event.actor, "u1");
    }

    #[tokio::test]
    async fn set_translation_reports_denial_and_returns_false() {
        let (storage, sink, adapter) = fixture().await;
        let mut events = sink.subscribe();
        let conversation_id = ConversationId::from_participants("f1", "c1").unwrap();
        let message_id = adapter
            .append(&conversation_id, "c1", "Hello")
            .await
            .unwrap();

        assert!(
            !adapter
                .set_translation("f2", &conversation_id, message_id, "नमस्ते".to_string())
                .await
        );
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(event.kind, StoreErrorKind::WriteDenied);
        assert_eq!(event.attempted_shape, vec!["translatedText"]);

        assert!(
            adapter
                .set_translation("f1", &conversation_id, message_id, "नमस्ते".to_string())
                .await
        );
        let stored = storage
            .get_message("f1", &conversation_id, message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.translated_text.as_deref(), Some("नमस्ते"));
    }

    #[tokio::test]
    async fn broken_subscription_reports_and_terminates() {
        let (storage, sink, adapter) = fixture().await;
        let mut events = sink.subscribe();
        let conversation_id = ConversationId::from_participants("f1", "c1").unwrap();
        storage.close().await;

        let mut subscription = adapter.subscribe("c1", conversation_id, 100);

        assert!(matches!(
            next_item(&mut subscription).await,
            SubscriptionItem::Failed { .. }
        ));
        assert_eq!(timeout(WAIT, subscription.next()).await.unwrap(), None);
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(event.kind, StoreErrorKind::SubscriptionFailed);
    }

    #[tokio::test]
    async fn inbox_lists_only_the_actors_conversations() {
        let (_storage, _sink, adapter) = fixture().await;
        let with_f1 = ConversationId::from_participants("c1", "f1").unwrap();
        let with_f2 = ConversationId::from_participants("c1", "f2").unwrap();
        let unrelated = ConversationId::from_participants("f1", "f2").unwrap();
        adapter.append(&with_f1, "c1", "hi f1").await;
        adapter.append(&unrelated, "f1", "hi f2").await;
        adapter.append(&with_f2, "f2", "hi c1").await;

        let inbox: Vec<String> = adapter
            .conversations("c1")
            .await
            .into_iter()
            .map(|conversation| conversation.id.to_string())
            .collect();

        assert_eq!(inbox, vec!["c1_f2", "c1_f1"]);
    }
}
