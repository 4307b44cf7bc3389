use std::fmt;

use lucknow_storage::{StorageError, StoreOperation};
use tokio::sync::broadcast;

pub const DEFAULT_ERROR_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// The store refused the write under its access rules.
    WriteDenied,
    /// The write could not be carried out, e.g. the store is unreachable.
    WriteFailed,
    /// A live query or listing broke; the subscription is over.
    SubscriptionFailed,
}

impl StoreErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WriteDenied => "write-denied",
            Self::WriteFailed => "write-failed",
            Self::SubscriptionFailed => "subscription-failed",
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Structured report of a store failure. `attempted_shape` carries field names only,
/// never the values that were being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreErrorEvent {
    pub kind: StoreErrorKind,
    pub path: String,
    pub operation: StoreOperation,
    pub attempted_shape: Vec<&'static str>,
    pub actor: String,
    pub message: String,
}

impl StoreErrorEvent {
    /// Classifies a failed write: access-rule refusals become `WriteDenied`, anything
    /// else `WriteFailed`.
    pub fn for_write(
        error: &StorageError,
        path: String,
        operation: StoreOperation,
        attempted_shape: &[&'static str],
        actor: &str,
    ) -> Self {
        let kind = if error.is_permission_denied() {
            StoreErrorKind::WriteDenied
        } else {
            StoreErrorKind::WriteFailed
        };
        Self {
            kind,
            path,
            operation,
            attempted_shape: attempted_shape.to_vec(),
            actor: actor.to_string(),
            message: error.to_string(),
        }
    }

    pub fn for_read(
        error: &StorageError,
        path: String,
        operation: StoreOperation,
        actor: &str,
    ) -> Self {
        Self {
            kind: StoreErrorKind::SubscriptionFailed,
            path,
            operation,
            attempted_shape: Vec::new(),
            actor: actor.to_string(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for StoreErrorEvent {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}: {} at {} by '{}'",
            self.kind, self.operation, self.path, self.actor
        )?;
        if !self.attempted_shape.is_empty() {
            write!(formatter, " [{}]", self.attempted_shape.join(", "))?;
        }
        write!(formatter, ": {}", self.message)
    }
}

/// Receives store failures that must not interrupt the caller's control flow.
pub trait ErrorSink: Send + Sync {
    fn report(&self, event: StoreErrorEvent);
}

/// Fans events out to every subscriber and logs each one.
#[derive(Debug, Clone)]
pub struct ChannelErrorSink {
    sender: broadcast::Sender<StoreErrorEvent>,
}

impl ChannelErrorSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreErrorEvent> {
        self.sender.subscribe()
    }
}

impl Default for ChannelErrorSink {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_CHANNEL_CAPACITY)
    }
}

impl ErrorSink for ChannelErrorSink {
    fn report(&self, event: StoreErrorEvent) {
        tracing::warn!(
            kind = %event.kind,
            path = %event.path,
            operation = %event.operation,
            actor = %event.actor,
            error = %event.message,
            "store operation failed"
        );
        // No live receivers is fine; the log line above is the record.
        let _ = self.sender.send(event);
    }
}
