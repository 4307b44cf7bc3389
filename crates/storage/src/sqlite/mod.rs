use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use futures::future::BoxFuture;
use snafu::{OptionExt, ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::watch;

use super::error::{
    CreateSqliteDirectorySnafu, NotFoundSnafu, PermissionDeniedSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu, StorageError,
    StorageResult,
};
use super::ids::{ConversationId, MessageId};
use super::types::{ConversationRecord, MessageRecord, NewMessage, StoreOperation};
use super::{ConversationStore, MessageStore};

type ChangeFeeds = Arc<Mutex<HashMap<ConversationId, watch::Sender<u64>>>>;

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    database_url: String,
    change_feeds: ChangeFeeds,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // A single long-lived connection serializes writers, which is what keeps
        // per-conversation timestamps monotonic. It also keeps `:memory:` databases alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, "sqlite storage opened");

        Ok(Self {
            pool,
            database_url,
            change_feeds: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Closes the pool. Every later call fails as if the store were unreachable.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn notify_change(&self, conversation_id: &ConversationId) {
        let mut feeds = self
            .change_feeds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sender) = feeds.get(conversation_id) else {
            return;
        };
        if sender.receiver_count() == 0 {
            feeds.remove(conversation_id);
        } else {
            sender.send_modify(|version| *version = version.wrapping_add(1));
        }
    }

    #[cfg(test)]
    fn change_feed_count(&self) -> usize {
        self.change_feeds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl ConversationStore for SqliteStorage {
    fn get_conversation<'a>(
        &'a self,
        actor: &'a str,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, StorageResult<Option<ConversationRecord>>> {
        async move {
            ensure_participant(
                conversation_id,
                actor,
                StoreOperation::Get,
                conversation_id.document_path(),
                "conversation-get-access",
            )?;

            let row = sqlx::query_as::<_, ConversationRow>(
                "SELECT id, participant_a, participant_b, last_message, updated_at FROM conversations WHERE id = ?",
            )
            .bind(conversation_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "conversation-get-query",
            })?;

            row.map(conversation_row_to_record).transpose()
        }
        .boxed()
    }

    fn list_conversations<'a>(
        &'a self,
        actor: &'a str,
    ) -> BoxFuture<'a, StorageResult<Vec<ConversationRecord>>> {
        async move {
            let rows = sqlx::query_as::<_, ConversationRow>(
                "SELECT id, participant_a, participant_b, last_message, updated_at FROM conversations WHERE participant_a = ? OR participant_b = ? ORDER BY updated_at DESC, id DESC",
            )
            .bind(actor)
            .bind(actor)
            .fetch_all(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "conversation-list-query",
            })?;

            rows.into_iter().map(conversation_row_to_record).collect()
        }
        .boxed()
    }

    fn watch_conversation(&self, conversation_id: &ConversationId) -> watch::Receiver<u64> {
        let mut feeds = self
            .change_feeds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Feeds nobody listens to any more are dropped here and in `notify_change`.
        feeds.retain(|id, sender| id == conversation_id || sender.receiver_count() > 0);
        feeds
            .entry(conversation_id.clone())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }
}

impl MessageStore for SqliteStorage {
    fn append_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>> {
        async move {
            ensure_participant(
                conversation_id,
                &input.sender_id,
                StoreOperation::Create,
                conversation_id.messages_path(),
                "message-append-access",
            )?;

            let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
                stage: "message-append-begin",
            })?;

            let previous = sqlx::query_scalar::<_, Option<i64>>(
                "SELECT MAX(timestamp_ms) FROM messages WHERE conversation_id = ?",
            )
            .bind(conversation_id.as_str())
            .fetch_one(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-previous-timestamp",
            })?;

            let now = unix_timestamp_millis();
            let timestamp = previous.map_or(now, |previous| now.max(previous + 1));
            let (participant_a, participant_b) = conversation_id.participants();

            // Merge semantics: participants and created_at survive; only the preview moves.
            sqlx::query(
                "INSERT INTO conversations (id, participant_a, participant_b, last_message, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(id) DO UPDATE SET last_message = excluded.last_message, updated_at = excluded.updated_at",
            )
            .bind(conversation_id.as_str())
            .bind(participant_a)
            .bind(participant_b)
            .bind(input.text.as_str())
            .bind(timestamp)
            .bind(timestamp)
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-upsert-conversation",
            })?;

            let message_id = MessageId::new_v7();
            sqlx::query(
                "INSERT INTO messages (id, conversation_id, sender_id, body, timestamp_ms, translated_body) VALUES (?, ?, ?, ?, ?, NULL)",
            )
            .bind(message_id.to_string())
            .bind(conversation_id.as_str())
            .bind(input.sender_id.as_str())
            .bind(input.text.as_str())
            .bind(timestamp)
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-insert",
            })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-append-commit",
            })?;

            self.notify_change(conversation_id);

            Ok(MessageRecord {
                id: message_id,
                conversation_id: conversation_id.clone(),
                sender_id: input.sender_id,
                text: input.text,
                timestamp_ms: i64_to_u64(timestamp, "message-append-timestamp")?,
                translated_text: None,
            })
        }
        .boxed()
    }

    fn recent_messages<'a>(
        &'a self,
        actor: &'a str,
        conversation_id: &'a ConversationId,
        limit: u32,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>> {
        async move {
            ensure_participant(
                conversation_id,
                actor,
                StoreOperation::List,
                conversation_id.messages_path(),
                "message-recent-access",
            )?;

            let rows = sqlx::query_as::<_, MessageRow>(
                "SELECT id, conversation_id, sender_id, body, timestamp_ms, translated_body FROM (\
                     SELECT id, conversation_id, sender_id, body, timestamp_ms, translated_body FROM messages \
                     WHERE conversation_id = ? ORDER BY timestamp_ms DESC, id DESC LIMIT ?\
                 ) ORDER BY timestamp_ms ASC, id ASC",
            )
            .bind(conversation_id.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-recent-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        }
        .boxed()
    }

    fn get_message<'a>(
        &'a self,
        actor: &'a str,
        conversation_id: &'a ConversationId,
        message_id: MessageId,
    ) -> BoxFuture<'a, StorageResult<Option<MessageRecord>>> {
        async move {
            ensure_participant(
                conversation_id,
                actor,
                StoreOperation::Get,
                conversation_id.message_path(message_id),
                "message-get-access",
            )?;

            let row = load_message_row(&self.pool, conversation_id, message_id, "message-get-query")
                .await?;
            row.map(message_row_to_record).transpose()
        }
        .boxed()
    }

    fn set_translation<'a>(
        &'a self,
        actor: &'a str,
        conversation_id: &'a ConversationId,
        message_id: MessageId,
        translated_text: String,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>> {
        async move {
            ensure_participant(
                conversation_id,
                actor,
                StoreOperation::Update,
                conversation_id.message_path(message_id),
                "message-translation-access",
            )?;

            let update_result = sqlx::query(
                "UPDATE messages SET translated_body = ? WHERE conversation_id = ? AND id = ?",
            )
            .bind(translated_text)
            .bind(conversation_id.as_str())
            .bind(message_id.to_string())
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-translation-apply",
            })?;

            if update_result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "message-translation-missing",
                    entity: "message",
                    id: message_id.to_string(),
                }
                .fail();
            }

            self.notify_change(conversation_id);

            let row = load_message_row(
                &self.pool,
                conversation_id,
                message_id,
                "message-translation-load",
            )
            .await?
            .context(NotFoundSnafu {
                stage: "message-translation-load-missing",
                entity: "message",
                id: message_id.to_string(),
            })?;

            message_row_to_record(row)
        }
        .boxed()
    }
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: String,
    participant_a: String,
    participant_b: String,
    last_message: Option<String>,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    sender_id: String,
    body: String,
    timestamp_ms: i64,
    translated_body: Option<String>,
}

fn conversation_row_to_record(row: ConversationRow) -> StorageResult<ConversationRecord> {
    Ok(ConversationRecord {
        id: ConversationId::parse(&row.id)?,
        participants: [row.participant_a, row.participant_b],
        last_message: row.last_message,
        updated_at_ms: i64_to_u64(row.updated_at, "conversation-row-updated-at")?,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        conversation_id: ConversationId::parse(&row.conversation_id)?,
        sender_id: row.sender_id,
        text: row.body,
        timestamp_ms: i64_to_u64(row.timestamp_ms, "message-row-timestamp")?,
        translated_text: row.translated_body,
    })
}

async fn load_message_row(
    pool: &SqlitePool,
    conversation_id: &ConversationId,
    message_id: MessageId,
    stage: &'static str,
) -> StorageResult<Option<MessageRow>> {
    sqlx::query_as::<_, MessageRow>(
        "SELECT id, conversation_id, sender_id, body, timestamp_ms, translated_body FROM messages WHERE conversation_id = ? AND id = ?",
    )
    .bind(conversation_id.as_str())
    .bind(message_id.to_string())
    .fetch_optional(pool)
    .await
    .context(SqliteQuerySnafu { stage })
}

fn ensure_participant(
    conversation_id: &ConversationId,
    actor: &str,
    operation: StoreOperation,
    path: String,
    stage: &'static str,
) -> StorageResult<()> {
    ensure!(
        conversation_id.includes(actor),
        PermissionDeniedSnafu {
            stage,
            path,
            operation,
            actor: actor.to_string(),
        }
    );
    Ok(())
}

fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_millis() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
