//! Conversation ledger seam.
//!
//! The gateway reads a caller's history in full, then appends exactly one user
//! turn and one assistant turn per request. Implementations must be
//! append-only, return turns in creation order, and serialize appends per
//! identity. The gateway always awaits [`ConversationStore::append`] before
//! moving on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Result;
use crate::types::Message;

/// A durably recorded conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Store-wide, monotonically increasing id.
    pub id: u64,
    pub identity: String,
    pub message: Message,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

/// Append-only per-identity conversation ledger.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// All turns recorded for `identity`, oldest first.
    async fn load_history(&self, identity: &str) -> Result<Vec<Message>>;

    /// Durably append `message` and return its record.
    async fn append(&self, identity: &str, message: Message) -> Result<TurnRecord>;
}

/// Process-local ledger, lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    turns: RwLock<HashMap<String, Vec<TurnRecord>>>,
    next_id: AtomicU64,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records for `identity`, oldest first.
    pub async fn records(&self, identity: &str) -> Vec<TurnRecord> {
        self.turns
            .read()
            .await
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load_history(&self, identity: &str) -> Result<Vec<Message>> {
        let turns = self.turns.read().await;
        Ok(turns
            .get(identity)
            .map(|records| records.iter().map(|r| r.message.clone()).collect())
            .unwrap_or_default())
    }

    async fn append(&self, identity: &str, message: Message) -> Result<TurnRecord> {
        let mut turns = self.turns.write().await;
        let record = TurnRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            identity: identity.to_string(),
            message,
            created_at: now_millis(),
        };
        turns
            .entry(identity.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_is_creation_ordered_per_identity() {
        let store = InMemoryConversationStore::new();
        store.append("alice", Message::user("one")).await.unwrap();
        store.append("bob", Message::user("other")).await.unwrap();
        store
            .append("alice", Message::assistant("two"))
            .await
            .unwrap();

        let history = store.load_history("alice").await.unwrap();
        assert_eq!(history, vec![Message::user("one"), Message::assistant("two")]);
        assert_eq!(store.load_history("bob").await.unwrap().len(), 1);
        assert!(store.load_history("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_ids_increase() {
        let store = InMemoryConversationStore::new();
        let a = store.append("x", Message::user("a")).await.unwrap();
        let b = store.append("x", Message::user("b")).await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(b.identity, "x");
    }
}
