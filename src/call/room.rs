//! Room and Peer entities tracked by the [`super::CallManager`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A room member tied to one `Socket`.
///
/// A `Peer` is a member of exactly one [`Room`] for the duration of its
/// membership (spec.md §3 invariant); `socket_id` is the key the
/// `CallManager` uses to find it again.
#[derive(Clone, Debug, Serialize)]
pub struct Peer {
    pub socket_id: String,
    pub user_id: String,
    pub room_id: String,
    pub display_name: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
    pub muted: bool,
    pub on_hold: bool,
}

impl Peer {
    /// Builds a new peer with the default `participant` role.
    pub fn new(socket_id: String, user_id: String, room_id: String, display_name: String) -> Self {
        Self {
            socket_id,
            user_id,
            room_id,
            display_name,
            role: "participant".to_string(),
            joined_at: Utc::now(),
            muted: false,
            on_hold: false,
        }
    }
}

/// The participant table a [`Room`]'s lock guards: a lookup map plus a
/// join-order list, the same two-representations shape the hub itself
/// uses for `agents`/`agent_keys_ordered` — one authoritative map, one
/// ordering index kept in sync alongside it.
#[derive(Default)]
struct ParticipantTable {
    by_socket: HashMap<String, Peer>,
    order: Vec<String>,
}

impl ParticipantTable {
    fn insert(&mut self, peer: Peer) {
        if !self.by_socket.contains_key(&peer.socket_id) {
            self.order.push(peer.socket_id.clone());
        }
        self.by_socket.insert(peer.socket_id.clone(), peer);
    }

    fn remove(&mut self, socket_id: &str) -> Option<Peer> {
        self.order.retain(|id| id != socket_id);
        self.by_socket.remove(socket_id)
    }

    fn other_socket_ids(&self, exclude: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| id.as_str() != exclude)
            .cloned()
            .collect()
    }

    /// Participants in join order (spec.md §3 `Peer.joined_at`, used to
    /// order `room_state.participants` deterministically — see DESIGN.md).
    fn in_join_order(&self) -> Vec<Peer> {
        self.order
            .iter()
            .filter_map(|id| self.by_socket.get(id))
            .cloned()
            .collect()
    }
}

/// A named group of call participants; scope of signaling fan-out.
///
/// A room exists iff its participant table is non-empty (spec.md §3
/// invariant) — the `CallManager` enforces this by removing empty rooms
/// from its own map, not by any invariant internal to `Room` itself.
pub struct Room {
    pub room_id: String,
    pub call_id: Uuid,
    pub created_at: DateTime<Utc>,
    table: RwLock<ParticipantTable>,
}

impl Room {
    pub fn new(room_id: String, call_id: Uuid) -> Self {
        Self {
            room_id,
            call_id,
            created_at: Utc::now(),
            table: RwLock::new(ParticipantTable::default()),
        }
    }

    pub async fn insert(&self, peer: Peer) {
        self.table.write().await.insert(peer);
    }

    /// Removes a peer and reports whether the room is now empty.
    pub async fn remove(&self, socket_id: &str) -> (Option<Peer>, bool) {
        let mut table = self.table.write().await;
        let removed = table.remove(socket_id);
        (removed, table.by_socket.is_empty())
    }

    pub async fn get(&self, socket_id: &str) -> Option<Peer> {
        self.table.read().await.by_socket.get(socket_id).cloned()
    }

    /// Applies `f` to the peer's mutable state, if present.
    pub async fn update<F: FnOnce(&mut Peer)>(&self, socket_id: &str, f: F) {
        if let Some(peer) = self.table.write().await.by_socket.get_mut(socket_id) {
            f(peer);
        }
    }

    pub async fn other_socket_ids(&self, exclude: &str) -> Vec<String> {
        self.table.read().await.other_socket_ids(exclude)
    }

    pub async fn participants_in_join_order(&self) -> Vec<Peer> {
        self.table.read().await.in_join_order()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> Peer {
        Peer::new(id.to_string(), format!("user-{id}"), "r1".to_string(), id.to_string())
    }

    #[tokio::test]
    async fn insert_then_remove_reports_empty() {
        let room = Room::new("r1".to_string(), Uuid::new_v4());
        room.insert(peer("a")).await;
        let (removed, empty) = room.remove("a").await;
        assert!(removed.is_some());
        assert!(empty);
    }

    #[tokio::test]
    async fn participants_preserve_join_order() {
        let room = Room::new("r1".to_string(), Uuid::new_v4());
        room.insert(peer("a")).await;
        room.insert(peer("b")).await;
        room.insert(peer("c")).await;

        let ids: Vec<String> = room
            .participants_in_join_order()
            .await
            .into_iter()
            .map(|p| p.socket_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn other_socket_ids_excludes_given_id() {
        let room = Room::new("r1".to_string(), Uuid::new_v4());
        room.insert(peer("a")).await;
        room.insert(peer("b")).await;

        let others = room.other_socket_ids("a").await;
        assert_eq!(others, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn re_insert_same_socket_does_not_duplicate_join_order() {
        let room = Room::new("r1".to_string(), Uuid::new_v4());
        room.insert(peer("a")).await;
        room.insert(peer("a")).await;
        assert_eq!(room.participants_in_join_order().await.len(), 1);
    }

    #[tokio::test]
    async fn update_mutates_peer_flags() {
        let room = Room::new("r1".to_string(), Uuid::new_v4());
        room.insert(peer("a")).await;
        room.update("a", |p| p.muted = true).await;
        assert!(room.get("a").await.unwrap().muted);
    }
}
