//! Offline message spool.
//!
//! A direct message to a recipient with no live socket is stored here and
//! drained the next time that recipient is admitted. Delivery is
//! at-least-once: entries are only deleted after a successful drain pass,
//! and a deletion failure after delivery is logged and accepted rather than
//! retried, per the fan-out design's stated trade-off.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::Message;

/// One spooled message awaiting delivery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub recipient_id: String,
    pub message: Message,
    pub stored_at: chrono::DateTime<chrono::Utc>,
}

/// Pluggable persistence for the offline spool.
///
/// The in-memory implementation is the crate default; an embedding
/// application may substitute a durable store (e.g. a database-backed one)
/// without the `Hub` knowing the difference.
#[async_trait]
pub trait OfflineStore: Send + Sync {
    /// Spools a message for later delivery.
    async fn store(&self, recipient_id: &str, message: Message) -> anyhow::Result<()>;

    /// Returns every message spooled for a recipient, oldest first.
    async fn get(&self, recipient_id: &str) -> anyhow::Result<Vec<StoredMessage>>;

    /// Deletes the given message ids in one call. Best-effort: a caller
    /// that has already delivered these messages accepts at-least-once
    /// semantics if this fails.
    async fn delete(&self, ids: &[String]) -> anyhow::Result<()>;

    /// Evicts entries older than `max_age`.
    async fn evict_expired(&self, max_age: Duration) -> anyhow::Result<usize>;
}

/// Default in-memory `OfflineStore`, keyed by recipient id.
#[derive(Default)]
pub struct InMemoryOfflineStore {
    by_recipient: RwLock<HashMap<String, Vec<StoredMessage>>>,
}

impl InMemoryOfflineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OfflineStore for InMemoryOfflineStore {
    async fn store(&self, recipient_id: &str, message: Message) -> anyhow::Result<()> {
        let id = message
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let entry = StoredMessage {
            id,
            recipient_id: recipient_id.to_string(),
            message,
            stored_at: chrono::Utc::now(),
        };
        self.by_recipient
            .write()
            .expect("offline store lock poisoned")
            .entry(recipient_id.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn get(&self, recipient_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        Ok(self
            .by_recipient
            .read()
            .expect("offline store lock poisoned")
            .get(recipient_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete(&self, ids: &[String]) -> anyhow::Result<()> {
        let mut guard = self.by_recipient.write().expect("offline store lock poisoned");
        for messages in guard.values_mut() {
            messages.retain(|m| !ids.contains(&m.id));
        }
        guard.retain(|_, messages| !messages.is_empty());
        Ok(())
    }

    async fn evict_expired(&self, max_age: Duration) -> anyhow::Result<usize> {
        let cutoff = SystemTime::now() - max_age;
        let cutoff: chrono::DateTime<chrono::Utc> = cutoff.into();
        let mut guard = self.by_recipient.write().expect("offline store lock poisoned");
        let mut evicted = 0usize;
        for messages in guard.values_mut() {
            let before = messages.len();
            messages.retain(|m| m.stored_at >= cutoff);
            evicted += before - messages.len();
        }
        guard.retain(|_, messages| !messages.is_empty());
        Ok(evicted)
    }
}
