use std::collections::HashSet;
use std::fmt;

use lucknow_storage::{MessageId, MessageRecord};

/// How long after a pending send a confirmed message may be stamped and still be
/// matched to it by sender and text alone.
pub const PENDING_MATCH_WINDOW_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingId(u64);

impl fmt::Display for PendingId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "pending-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub id: PendingId,
    pub sender_id: String,
    pub text: String,
    pub submitted_at_ms: u64,
    /// Set once the store acknowledged the write; the entry stays until a snapshot
    /// carries the message.
    pub confirmed_id: Option<MessageId>,
}

/// Sends the user made that no snapshot has shown yet, in submission order.
#[derive(Debug, Default)]
pub struct PendingOverlay {
    entries: Vec<PendingMessage>,
    next_id: u64,
}

impl PendingOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        sender_id: impl Into<String>,
        text: impl Into<String>,
        submitted_at_ms: u64,
    ) -> PendingId {
        let id = PendingId(self.next_id);
        self.next_id += 1;
        self.entries.push(PendingMessage {
            id,
            sender_id: sender_id.into(),
            text: text.into(),
            submitted_at_ms,
            confirmed_id: None,
        });
        id
    }

    pub fn confirm(&mut self, id: PendingId, message_id: MessageId) -> bool {
        match self.entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                entry.confirmed_id = Some(message_id);
                true
            }
            None => false,
        }
    }

    /// Drops an entry whose write failed.
    pub fn fail(&mut self, id: PendingId) -> Option<PendingMessage> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Removes every entry the confirmed list now accounts for: by acknowledged id first,
    /// then by sender and text when stamped no earlier than the submission and within
    /// [`PENDING_MATCH_WINDOW_MS`] of it. Each confirmed message settles at most one entry.
    pub fn reconcile(&mut self, confirmed: &[MessageRecord]) -> usize {
        let before = self.entries.len();
        let mut claimed: HashSet<MessageId> = HashSet::new();

        self.entries.retain(|entry| {
            let Some(message_id) = entry.confirmed_id else {
                return true;
            };
            if confirmed.iter().any(|message| message.id == message_id) {
                claimed.insert(message_id);
                false
            } else {
                true
            }
        });

        self.entries.retain(|entry| {
            if entry.confirmed_id.is_some() {
                return true;
            }
            let matched = confirmed.iter().find(|message| {
                !claimed.contains(&message.id)
                    && message.sender_id == entry.sender_id
                    && message.text == entry.text
                    && message
                        .timestamp_ms
                        .checked_sub(entry.submitted_at_ms)
                        .is_some_and(|elapsed| elapsed <= PENDING_MATCH_WINDOW_MS)
            });
            match matched {
                Some(message) => {
                    claimed.insert(message.id);
                    false
                }
                None => true,
            }
        });

        before - self.entries.len()
    }

    pub fn entries(&self) -> &[PendingMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use lucknow_storage::ConversationId;

    use super::*;

    fn confirmed(sender_id: &str, text: &str, timestamp_ms: u64) -> MessageRecord {
        MessageRecord {
            id: MessageId::new_v7(),
            conversation_id: ConversationId::from_participants("f1", "c1").unwrap(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            timestamp_ms,
            translated_text: None,
        }
    }

    fn texts(overlay: &PendingOverlay) -> Vec<&str> {
        overlay
            .entries()
            .iter()
            .map(|entry| entry.text.as_str())
            .collect()
    }

    #[test]
    fn entries_keep_submission_order() {
        let mut overlay = PendingOverlay::new();
        let first = overlay.push("c1", "one", 1_000);
        let second = overlay.push("c1", "two", 1_000);

        assert!(first < second);
        assert_eq!(texts(&overlay), vec!["one", "two"]);
    }

    #[test]
    fn confirmed_id_settles_the_entry() {
        let mut overlay = PendingOverlay::new();
        let pending = overlay.push("c1", "Hello", 1_000);
        let record = confirmed("c1", "Hello", 1_005);
        assert!(overlay.confirm(pending, record.id));

        assert_eq!(overlay.reconcile(&[]), 0);
        assert_eq!(overlay.len(), 1);

        assert_eq!(overlay.reconcile(&[record]), 1);
        assert!(overlay.is_empty());
    }

    #[test]
    fn sender_and_text_match_only_within_the_window() {
        let mut overlay = PendingOverlay::new();
        overlay.push("c1", "ok", 100_000);
        overlay.push("c1", "ok", 100_010);

        let stale = confirmed("c1", "ok", 100_000 - PENDING_MATCH_WINDOW_MS - 1);
        let other_sender = confirmed("f1", "ok", 100_001);
        assert_eq!(overlay.reconcile(&[stale, other_sender]), 0);

        let fresh = confirmed("c1", "ok", 100_020);
        assert_eq!(overlay.reconcile(&[fresh]), 1);
        assert_eq!(overlay.len(), 1);
    }

    #[test]
    fn earlier_message_with_the_same_text_does_not_settle_a_resend() {
        let mut overlay = PendingOverlay::new();
        let resend = overlay.push("c1", "ok", 1_000);

        assert_eq!(overlay.reconcile(&[confirmed("c1", "ok", 990)]), 0);
        assert_eq!(overlay.entries()[0].id, resend);

        assert_eq!(overlay.reconcile(&[confirmed("c1", "ok", 1_000)]), 1);
        assert!(overlay.is_empty());
    }

    #[test]
    fn failed_writes_leave_the_overlay() {
        let mut overlay = PendingOverlay::new();
        let kept = overlay.push("c1", "one", 1_000);
        let failed = overlay.push("c1", "two", 1_000);

        let removed = overlay.fail(failed).unwrap();

        assert_eq!(removed.text, "two");
        assert_eq!(overlay.entries()[0].id, kept);
        assert!(overlay.fail(failed).is_none());
    }
}
