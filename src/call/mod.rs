//! WebRTC room-signaling subsystem: authenticated join, room membership,
//! per-message peer forwarding, and departure notification (spec.md §4.7).
//!
//! State machine tracked implicitly by presence, not an explicit enum:
//! `unauth` is "no `user_id` property set"; `authed` is "property set but
//! absent from `socket_room`"; `in_room` is "present in `socket_room`".
//! `leaving` is not a state at all, just the transition run by
//! [`CallManager::handle_disconnect`].
//!
//! Two locks, same as the hub's own registry/socket split: `state`
//! protects the `rooms` map and the `socket_room` index (the "CallManager"
//! lock of spec.md §5); each [`room::Room`] has its own lock around its
//! participant table. Lock order is always CallManager then Room, and a
//! lock is always released before crossing an `.await` into the other —
//! no room mutation happens while `state` is held, and vice versa.

pub mod room;
pub mod store;
#[cfg(feature = "call-store-sql")]
pub mod store_sql;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::TokenValidator;
use crate::error::ProtocolError;
use crate::hub::Hub;
use crate::kind::KindTag;
use crate::message::Message;
use crate::socket::registry::Socket;

use room::{Peer, Room};
use store::CallStore;

struct CallManagerState {
    rooms: HashMap<String, Arc<Room>>,
    /// socket id -> room id, for sockets currently `in_room`.
    socket_room: HashMap<String, String>,
}

/// Maintains rooms keyed by room id, each a participant table, and
/// forwards signaling traffic between peers in the same room.
pub struct CallManager {
    state: RwLock<CallManagerState>,
    call_store: Arc<dyn CallStore>,
    token_validator: Arc<dyn TokenValidator>,
}

impl CallManager {
    pub fn new(call_store: Arc<dyn CallStore>, token_validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            state: RwLock::new(CallManagerState {
                rooms: HashMap::new(),
                socket_room: HashMap::new(),
            }),
            call_store,
            token_validator,
        }
    }

    /// Routes one signaling-kind message (`t` 16-24) for `socket`.
    pub async fn handle(&self, socket: &Arc<Socket>, tag: KindTag, message: Message, hub: &Hub) {
        match tag {
            KindTag::Auth => self.handle_auth(socket, message).await,
            KindTag::Join => self.handle_join(socket, message, hub).await,
            KindTag::Offer | KindTag::Answer | KindTag::IceCandidate | KindTag::Dtmf => {
                self.forward_verbatim(socket, tag, message, hub).await;
            }
            KindTag::Mute | KindTag::Unmute | KindTag::Hold => {
                self.handle_state_change(socket, tag, message, hub).await;
            }
            other => {
                log::warn!("CallManager asked to handle non-signaling tag {other:?}");
            }
        }
    }

    /// Tears down a socket's room membership on disconnect (spec.md §4.7
    /// `leaving`). Called from the hub's disconnect handler, so `socket_id`
    /// may already be fully removed from the hub's own registry by the
    /// time this runs — this subsystem tracks membership independently.
    pub async fn handle_disconnect(&self, socket_id: &str, hub: &Hub) {
        let room_id = {
            let mut state = self.state.write().await;
            state.socket_room.remove(socket_id)
        };
        let Some(room_id) = room_id else {
            return;
        };

        let room = {
            let state = self.state.read().await;
            state.rooms.get(&room_id).cloned()
        };
        let Some(room) = room else {
            return;
        };

        let (removed, is_empty) = room.remove(socket_id).await;
        if removed.is_some() {
            if let Err(err) = self
                .call_store
                .mark_left(room.call_id, socket_id, chrono::Utc::now())
                .await
            {
                log::warn!("call store mark_left failed for {room_id}: {err:#}");
            }

            let others = room.other_socket_ids(socket_id).await;
            let announce = Message {
                t: KindTag::PeerLeft.as_i64(),
                data: Some(json!({ "participant_id": socket_id })),
                ..Message::default()
            };
            hub.notify(&others, &announce).await;
        }

        if is_empty {
            let mut state = self.state.write().await;
            state.rooms.remove(&room_id);
            log::info!("room {room_id} emptied and removed");
            if let Err(err) = self.call_store.end_call(room.call_id).await {
                log::warn!("call store end_call failed for {room_id}: {err:#}");
            }
        }
    }

    async fn handle_auth(&self, socket: &Arc<Socket>, message: Message) {
        let token = match Self::require_str(&message, "token") {
            Ok(token) => token,
            Err(err) => {
                socket.send(&Message::error(err.to_string()));
                return;
            }
        };

        match self.token_validator.validate(&token).await {
            Ok(user_id) => {
                socket.set_property("user_id".to_string(), json!(user_id));
                socket.send(&Message::ack(
                    json!({ "status": "authenticated", "user_id": user_id }),
                ));
            }
            Err(err) => {
                log::info!("auth rejected for socket {}: {err:#}", socket.id);
                socket.send(&Message::error("authentication failed"));
            }
        }
    }

    async fn handle_join(&self, socket: &Arc<Socket>, message: Message, hub: &Hub) {
        let Some(user_id) = socket
            .get_property("user_id")
            .and_then(|v| v.as_str().map(str::to_string))
        else {
            socket.send(&Message::error("join requires prior auth"));
            return;
        };

        let room_id = match Self::require_str(&message, "room") {
            Ok(room_id) => room_id,
            Err(err) => {
                socket.send(&Message::error(err.to_string()));
                return;
            }
        };

        let display_name = message
            .data
            .as_ref()
            .and_then(|d| d.get("display_name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| socket.alias());

        let room = self.find_or_create_room(&room_id).await;

        let peer = Peer::new(
            socket.id.clone(),
            user_id.clone(),
            room_id.clone(),
            display_name.clone(),
        );
        room.insert(peer.clone()).await;
        self.state
            .write()
            .await
            .socket_room
            .insert(socket.id.clone(), room_id.clone());

        if let Err(err) = self.call_store.add_participant(room.call_id, &peer).await {
            log::warn!("call store add_participant failed for {room_id}: {err:#}");
        }

        let participants: Vec<Value> = room
            .participants_in_join_order()
            .await
            .into_iter()
            .map(|p| json!({ "id": p.socket_id, "user_id": p.user_id, "display_name": p.display_name, "role": p.role }))
            .collect();

        socket.send(&Message {
            t: KindTag::Joined.as_i64(),
            data: Some(json!({
                "participant_id": socket.id,
                "room_state": {
                    "room_id": room_id,
                    "participants": participants,
                    "call_id": room.call_id,
                    "status": "active",
                },
            })),
            ..Message::default()
        });

        let others = room.other_socket_ids(&socket.id).await;
        let announce = Message {
            t: KindTag::PeerJoined.as_i64(),
            data: Some(json!({
                "participant": { "id": socket.id, "user_id": user_id, "display_name": display_name, "role": peer.role },
            })),
            ..Message::default()
        };
        hub.notify(&others, &announce).await;
    }

    /// Relays `offer`/`answer`/`ice_candidate`/`dtmf` verbatim to the rest
    /// of the sender's room, with `from` set to the sender's socket id. No
    /// parsing of the payload — the manager is a transparent relay here.
    async fn forward_verbatim(
        &self,
        socket: &Arc<Socket>,
        tag: KindTag,
        mut message: Message,
        hub: &Hub,
    ) {
        let Some(room) = self.room_for(&socket.id).await else {
            socket.send(&Message::error("not currently in a room"));
            return;
        };

        message.t = tag.as_i64();
        message.from = Some(socket.id.clone());
        let others = room.other_socket_ids(&socket.id).await;
        hub.notify(&others, &message).await;
    }

    async fn handle_state_change(
        &self,
        socket: &Arc<Socket>,
        tag: KindTag,
        mut message: Message,
        hub: &Hub,
    ) {
        let Some(room) = self.room_for(&socket.id).await else {
            socket.send(&Message::error("not currently in a room"));
            return;
        };

        let hold = message
            .data
            .as_ref()
            .and_then(|d| d.get("hold"))
            .and_then(Value::as_bool)
            .unwrap_or(true);

        room.update(&socket.id, |peer| match tag {
            KindTag::Mute => peer.muted = true,
            KindTag::Unmute => peer.muted = false,
            KindTag::Hold => peer.on_hold = hold,
            _ => {}
        })
        .await;

        message.t = tag.as_i64();
        message.from = Some(socket.id.clone());
        let others = room.other_socket_ids(&socket.id).await;
        hub.notify(&others, &message).await;
    }

    async fn room_for(&self, socket_id: &str) -> Option<Arc<Room>> {
        let state = self.state.read().await;
        let room_id = state.socket_room.get(socket_id)?;
        state.rooms.get(room_id).cloned()
    }

    /// Finds a room by id or durably registers a new call and creates one.
    /// The `call_store` round-trip happens before the `state` lock is
    /// taken, so a slow or failing store never blocks other rooms'
    /// membership changes.
    async fn find_or_create_room(&self, room_id: &str) -> Arc<Room> {
        if let Some(room) = self.state.read().await.rooms.get(room_id).cloned() {
            return room;
        }

        let call_id = match self.call_store.create_call(room_id).await {
            Ok(id) => id,
            Err(err) => {
                log::warn!("call store create_call failed for {room_id}, using ephemeral id: {err:#}");
                Uuid::new_v4()
            }
        };
        let candidate = Arc::new(Room::new(room_id.to_string(), call_id));

        let mut state = self.state.write().await;
        let room = state
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                log::info!("room {room_id} created (call_id={call_id})");
                candidate
            })
            .clone();
        room
    }

    fn require_str(message: &Message, field: &str) -> Result<String, ProtocolError> {
        message
            .data
            .as_ref()
            .and_then(|d| d.get(field))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProtocolError::Shape(format!("missing `data.{field}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::offline::InMemoryOfflineStore;
    use crate::hub::Hub as RealHub;
    use crate::socket::connection::Connection;
    use crate::transport::TransportSink;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use store::InMemoryCallStore;

    struct NullValidator;
    #[async_trait]
    impl TokenValidator for NullValidator {
        async fn validate(&self, token: &str) -> anyhow::Result<String> {
            if token == "good" {
                Ok("user-1".to_string())
            } else {
                Err(anyhow::anyhow!("bad token"))
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TransportSink for RecordingSink {
        async fn send_text(&mut self, data: String) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(data);
            Ok(())
        }
        async fn send_binary(&mut self, _data: Vec<u8>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn send_pong(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn close(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn admitted(hub: &RealHub) -> (Arc<Socket>, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink { sent: sent.clone() };
        let conn = Connection::spawn(Box::new(sink), 8);
        let socket = hub.admit(conn).await.unwrap();
        (socket, sent)
    }

    fn manager() -> CallManager {
        CallManager::new(Arc::new(InMemoryCallStore), Arc::new(NullValidator))
    }

    fn test_hub() -> RealHub {
        RealHub::new(10, Arc::new(InMemoryOfflineStore::new()))
    }

    #[tokio::test]
    async fn auth_then_join_yields_joined_with_self_as_only_participant() {
        let hub = test_hub();
        let cm = manager();
        let (socket, sent) = admitted(&hub).await;

        cm.handle(
            &socket,
            KindTag::Auth,
            Message {
                t: 16,
                data: Some(json!({ "token": "good" })),
                ..Message::default()
            },
            &hub,
        )
        .await;

        cm.handle(
            &socket,
            KindTag::Join,
            Message {
                t: 17,
                data: Some(json!({ "room": "r1", "display_name": "Alice" })),
                ..Message::default()
            },
            &hub,
        )
        .await;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let messages = sent.lock().unwrap().clone();
        let joined: Value = serde_json::from_str(&messages[1]).unwrap();
        assert_eq!(joined["t"], json!(25));
        assert_eq!(joined["data"]["room_state"]["participants"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn join_without_auth_is_rejected() {
        let hub = test_hub();
        let cm = manager();
        let (socket, sent) = admitted(&hub).await;

        cm.handle(
            &socket,
            KindTag::Join,
            Message {
                t: 17,
                data: Some(json!({ "room": "r1" })),
                ..Message::default()
            },
            &hub,
        )
        .await;

        let messages = sent.lock().unwrap().clone();
        let reply: Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(reply["t"], json!(8));
    }

    #[tokio::test]
    async fn second_peer_joining_notifies_the_first() {
        let hub = test_hub();
        let cm = manager();
        let (a, a_sent) = admitted(&hub).await;
        let (b, _b_sent) = admitted(&hub).await;

        for (socket, name) in [(&a, "A"), (&b, "B")] {
            cm.handle(
                socket,
                KindTag::Auth,
                Message { t: 16, data: Some(json!({ "token": "good" })), ..Message::default() },
                &hub,
            )
            .await;
            cm.handle(
                socket,
                KindTag::Join,
                Message { t: 17, data: Some(json!({ "room": "r1", "display_name": name })), ..Message::default() },
                &hub,
            )
            .await;
        }

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let a_messages = a_sent.lock().unwrap().clone();
        let peer_joined = a_messages
            .iter()
            .map(|m| serde_json::from_str::<Value>(m).unwrap())
            .find(|m| m["t"] == json!(26))
            .expect("A should see B's peer_joined");
        assert_eq!(peer_joined["data"]["participant"]["display_name"], json!("B"));
    }

    #[tokio::test]
    async fn offer_is_forwarded_to_other_room_peers_with_from_set() {
        let hub = test_hub();
        let cm = manager();
        let (a, _a_sent) = admitted(&hub).await;
        let (b, b_sent) = admitted(&hub).await;

        for socket in [&a, &b] {
            cm.handle(socket, KindTag::Auth, Message { t: 16, data: Some(json!({ "token": "good" })), ..Message::default() }, &hub).await;
            cm.handle(socket, KindTag::Join, Message { t: 17, data: Some(json!({ "room": "r1" })), ..Message::default() }, &hub).await;
        }

        cm.handle(
            &a,
            KindTag::Offer,
            Message { t: 18, data: Some(json!({ "sdp": "v=0", "call_id": "x" })), ..Message::default() },
            &hub,
        )
        .await;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let b_messages = b_sent.lock().unwrap().clone();
        let offer = b_messages
            .iter()
            .map(|m| serde_json::from_str::<Value>(m).unwrap())
            .find(|m| m["t"] == json!(18))
            .expect("B should receive the offer");
        assert_eq!(offer["from"], json!(a.id));
    }

    #[tokio::test]
    async fn disconnect_notifies_remaining_peers_and_empties_room() {
        let hub = test_hub();
        let cm = manager();
        let (a, _a_sent) = admitted(&hub).await;
        let (b, b_sent) = admitted(&hub).await;

        for socket in [&a, &b] {
            cm.handle(socket, KindTag::Auth, Message { t: 16, data: Some(json!({ "token": "good" })), ..Message::default() }, &hub).await;
            cm.handle(socket, KindTag::Join, Message { t: 17, data: Some(json!({ "room": "r1" })), ..Message::default() }, &hub).await;
        }

        cm.handle_disconnect(&a.id, &hub).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let b_messages = b_sent.lock().unwrap().clone();
        let left = b_messages
            .iter()
            .map(|m| serde_json::from_str::<Value>(m).unwrap())
            .find(|m| m["t"] == json!(27))
            .expect("B should see A's peer_left");
        assert_eq!(left["data"]["participant_id"], json!(a.id));

        cm.handle_disconnect(&b.id, &hub).await;
        assert!(cm.room_for(&b.id).await.is_none());
        assert!(cm.state.read().await.rooms.is_empty());
    }
}
