//! Optional persisted call-metadata store (spec.md §6.6).
//!
//! The in-memory `CallManager` state is authoritative for routing
//! regardless of which `CallStore` is plugged in — this trait exists so a
//! deployment can durably record calls and participants across restarts,
//! never so the hub can read its own routing state back from it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::room::Peer;

/// Pluggable persistence for call/participant metadata.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Durably registers a new call for `room_id` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error on any storage failure. Callers log and fall back
    /// to a freshly generated id — the call proceeds in-memory either way.
    async fn create_call(&self, room_id: &str) -> anyhow::Result<Uuid>;

    /// Records a participant joining `call_id`.
    async fn add_participant(&self, call_id: Uuid, peer: &Peer) -> anyhow::Result<()>;

    /// Marks a participant's departure time.
    async fn mark_left(
        &self,
        call_id: Uuid,
        socket_id: &str,
        left_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Marks a call as ended (its room has emptied).
    async fn end_call(&self, call_id: Uuid) -> anyhow::Result<()>;
}

/// Default `CallStore`: generates call ids but persists nothing. Used when
/// no `call_store_url` is configured.
#[derive(Default)]
pub struct InMemoryCallStore;

#[async_trait]
impl CallStore for InMemoryCallStore {
    async fn create_call(&self, _room_id: &str) -> anyhow::Result<Uuid> {
        Ok(Uuid::new_v4())
    }

    async fn add_participant(&self, _call_id: Uuid, _peer: &Peer) -> anyhow::Result<()> {
        Ok(())
    }

    async fn mark_left(
        &self,
        _call_id: Uuid,
        _socket_id: &str,
        _left_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn end_call(&self, _call_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }
}
