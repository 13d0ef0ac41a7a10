//! `sqlx`-backed persisted call-metadata store (feature `call-store-sql`).
//!
//! Schema matches spec.md §6.6 exactly: two tables, `calls` and
//! `participants`. Backed by `sqlx::AnyPool` so either a `sqlite:` or
//! `postgres:` URL works without a second implementation — the same
//! scheme-dispatch `sqlx::any` gives the pack's other `sqlx` consumers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::room::Peer;
use super::store::CallStore;

/// `CallStore` implementation backed by a `sqlx::AnyPool`.
pub struct SqlCallStore {
    pool: AnyPool,
    /// Maps `(call_id, socket_id)` to the `participants` row each peer was
    /// inserted under, so `mark_left` can target that one row instead of
    /// every still-active participant of the call.
    participant_ids: RwLock<HashMap<(Uuid, String), Uuid>>,
}

impl SqlCallStore {
    /// Connects to `database_url` and ensures the two tables exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema migration fails.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self {
            pool,
            participant_ids: RwLock::new(HashMap::new()),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS calls (
                id TEXT PRIMARY KEY,
                room_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                ended_at TEXT,
                status TEXT NOT NULL,
                recording INTEGER NOT NULL DEFAULT 0,
                metadata TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS participants (
                id TEXT PRIMARY KEY,
                call_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                left_at TEXT,
                client_ip TEXT,
                metadata TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl CallStore for SqlCallStore {
    async fn create_call(&self, room_id: &str) -> anyhow::Result<Uuid> {
        let call_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO calls (id, room_id, created_at, status, recording) \
             VALUES (?, ?, ?, 'active', 0)",
        )
        .bind(call_id.to_string())
        .bind(room_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(call_id)
    }

    async fn add_participant(&self, call_id: Uuid, peer: &Peer) -> anyhow::Result<()> {
        let row_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO participants (id, call_id, user_id, role, joined_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(row_id.to_string())
        .bind(call_id.to_string())
        .bind(&peer.user_id)
        .bind(&peer.role)
        .bind(peer.joined_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        self.participant_ids
            .write()
            .await
            .insert((call_id, peer.socket_id.clone()), row_id);
        Ok(())
    }

    async fn mark_left(
        &self,
        call_id: Uuid,
        socket_id: &str,
        left_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let row_id = self
            .participant_ids
            .write()
            .await
            .remove(&(call_id, socket_id.to_string()));
        let Some(row_id) = row_id else {
            log::warn!(
                "mark_left called for {socket_id} in call {call_id} with no tracked participant row"
            );
            return Ok(());
        };
        sqlx::query("UPDATE participants SET left_at = ? WHERE id = ? AND left_at IS NULL")
            .bind(left_at.to_rfc3339())
            .bind(row_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn end_call(&self, call_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE calls SET status = 'ended', ended_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(call_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
