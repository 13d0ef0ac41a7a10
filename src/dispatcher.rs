//! Kind-tag routing: turns one decoded [`Message`] into hub fan-out calls,
//! pairs binary frames with a pending file transfer, and delegates the
//! WebRTC signaling tags to a [`CallManager`].
//!
//! This is the one place that knows the full kind-tag table (spec.md §4.3);
//! everything it calls — `Hub::broadcast`/`publish`/`direct`/`notify`,
//! `Socket::send`, `CallManager::handle` — is itself oblivious to routing
//! policy. A malformed payload for a given tag never closes the
//! connection: it produces an `error` reply and the dispatcher moves on to
//! the next frame.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::call::CallManager;
use crate::hub::Hub;
use crate::kind::KindTag;
use crate::message::Message;
use crate::socket::registry::{PendingFile, Socket};

/// Routes decoded messages and paired binary frames for one hub.
pub struct Dispatcher {
    hub: Arc<Hub>,
    call_manager: Arc<CallManager>,
}

impl Dispatcher {
    pub fn new(hub: Arc<Hub>, call_manager: Arc<CallManager>) -> Self {
        Self { hub, call_manager }
    }

    /// Parses and routes one inbound text frame.
    pub async fn handle_text(&self, socket: &Arc<Socket>, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                log::debug!("dropping unparsable frame from {}: {err}", socket.id);
                socket.send(&Message::error("invalid JSON"));
                return;
            }
        };

        let message = match Message::parse(&value) {
            Ok(message) => message,
            Err(err) => {
                socket.send(&Message::error(err.to_string()));
                return;
            }
        };

        self.route(socket, message).await;
    }

    async fn route(&self, socket: &Arc<Socket>, message: Message) {
        let Some(tag) = KindTag::from_i64(message.t) else {
            socket.send(&Message::ack(json!({ "status": "received" })));
            return;
        };

        // spec.md §3: "a banned Socket never originates nor receives
        // application messages". The frame is still considered dispatched
        // (control purposes, e.g. eventually closing), but ping/pong is the
        // only kind allowed to produce any effect — every fan-out-capable
        // kind is dropped before it can reach another socket.
        if socket.is_banned() && !matches!(tag, KindTag::Ping | KindTag::Pong) {
            log::debug!("dropping tag {tag:?} from banned socket {}", socket.id);
            return;
        }

        match tag {
            KindTag::Broadcast => self.handle_broadcast(socket, message).await,
            KindTag::Private => self.handle_private(socket, message).await,
            KindTag::System => {}
            KindTag::Subscribe => self.handle_subscribe(socket, message, true).await,
            KindTag::Unsubscribe => self.handle_subscribe(socket, message, false).await,
            KindTag::Ping => self.handle_ping(socket).await,
            KindTag::Pong | KindTag::Error | KindTag::Ack => {}
            KindTag::File => self.handle_file_meta(socket, message),
            KindTag::Typing => self.handle_typing(socket, message).await,
            KindTag::Direct => self.handle_direct(socket, message).await,
            KindTag::Thread => self.handle_thread(socket, message).await,
            KindTag::UserList => self.handle_user_list(socket).await,
            KindTag::SetAlias => self.handle_set_alias(socket, message).await,
            KindTag::Auth
            | KindTag::Join
            | KindTag::Offer
            | KindTag::Answer
            | KindTag::IceCandidate
            | KindTag::Mute
            | KindTag::Unmute
            | KindTag::Hold
            | KindTag::Dtmf => {
                self.call_manager
                    .handle(socket, tag, message, &self.hub)
                    .await;
            }
            KindTag::Joined
            | KindTag::PeerJoined
            | KindTag::PeerLeft
            | KindTag::CallStateChanged
            | KindTag::RecordingStarted
            | KindTag::RecordingFinished => {
                log::debug!("ignoring server-originated tag {tag:?} received from a client");
            }
        }
    }

    async fn handle_broadcast(&self, socket: &Arc<Socket>, message: Message) {
        match message.topic.clone() {
            Some(topic) => self.hub.publish(&topic, &message, Some(&socket.id)).await,
            None => self.hub.broadcast(&message, Some(&socket.id)).await,
        }
    }

    /// Deprecated alias for `direct`; only forwards if `to` is set.
    async fn handle_private(&self, socket: &Arc<Socket>, message: Message) {
        if message.to.is_some() {
            self.hub.direct(message).await;
        } else {
            log::debug!("private message from {} dropped: no `to`", socket.id);
        }
    }

    async fn handle_subscribe(&self, socket: &Arc<Socket>, message: Message, subscribing: bool) {
        let Some(topic) = message.topic.clone() else {
            socket.send(&Message::error("subscribe/unsubscribe requires a topic"));
            return;
        };

        if subscribing {
            self.hub.subscribe(&socket.id, topic.clone()).await;
        } else {
            self.hub.unsubscribe(&socket.id, &topic).await;
        }

        let action = if subscribing { "subscribed" } else { "unsubscribed" };
        socket.send(&Message::ack(json!({ "action": action, "topic": topic })));

        let topics = self.hub.all_topics().await;
        let announcement = Message {
            t: KindTag::System.as_i64(),
            data: Some(json!({ "type": "topic_list", "topics": topics })),
            ..Message::default()
        };
        self.hub.broadcast(&announcement, None).await;
    }

    async fn handle_ping(&self, socket: &Arc<Socket>) {
        let pong = Message {
            t: KindTag::Pong.as_i64(),
            data: Some(json!({ "timestamp": chrono::Utc::now().timestamp() })),
            ..Message::default()
        };
        socket.send(&pong);
    }

    fn handle_file_meta(&self, socket: &Arc<Socket>, message: Message) {
        let filename = message
            .data
            .as_ref()
            .and_then(|d| d.get("filename"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let size = message
            .data
            .as_ref()
            .and_then(|d| d.get("size"))
            .and_then(Value::as_u64);

        let (Some(filename), Some(size)) = (filename, size) else {
            socket.send(&Message::error("file requires data.filename and data.size"));
            return;
        };

        socket.set_pending_file(PendingFile {
            filename,
            size,
            to: message.to,
            topic: message.topic,
        });
    }

    async fn handle_typing(&self, socket: &Arc<Socket>, mut message: Message) {
        message.from = Some(socket.alias());
        self.hub.broadcast(&message, Some(&socket.id)).await;
    }

    async fn handle_direct(&self, socket: &Arc<Socket>, message: Message) {
        if message.to.is_none() {
            socket.send(&Message::error("direct requires `to`"));
            return;
        }
        self.hub.direct(message).await;
    }

    async fn handle_thread(&self, socket: &Arc<Socket>, message: Message) {
        if message.to.is_some() {
            self.hub.direct(message).await;
        } else {
            self.hub.broadcast(&message, Some(&socket.id)).await;
        }
    }

    async fn handle_user_list(&self, socket: &Arc<Socket>) {
        let users: Vec<Value> = self
            .hub
            .user_list()
            .await
            .into_iter()
            .map(|(id, alias)| json!({ "id": id, "alias": alias }))
            .collect();
        socket.send(&Message {
            t: KindTag::UserList.as_i64(),
            data: Some(json!({ "users": users })),
            ..Message::default()
        });
    }

    async fn handle_set_alias(&self, socket: &Arc<Socket>, message: Message) {
        let Some(alias) = message
            .data
            .as_ref()
            .and_then(|d| d.get("alias"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            socket.send(&Message::error("set_alias requires data.alias"));
            return;
        };

        socket.set_alias(alias.clone());

        let change = Message {
            t: KindTag::System.as_i64(),
            data: Some(json!({ "type": "alias_change", "userId": socket.id, "alias": alias })),
            ..Message::default()
        };
        self.hub.broadcast(&change, None).await;

        let users: Vec<Value> = self
            .hub
            .user_list()
            .await
            .into_iter()
            .map(|(id, alias)| json!({ "id": id, "alias": alias }))
            .collect();
        let refreshed = Message {
            t: KindTag::UserList.as_i64(),
            data: Some(json!({ "users": users })),
            ..Message::default()
        };
        self.hub.broadcast(&refreshed, None).await;
    }

    /// Completes a file transfer: pairs the binary payload with whatever
    /// metadata is sitting in the socket's pending-file slot, per spec.md
    /// §4.4. An orphan binary (no pending metadata) is logged and dropped.
    pub async fn handle_binary(&self, socket: &Arc<Socket>, payload: Vec<u8>) {
        let Some(pending) = socket.take_pending_file() else {
            log::warn!("orphan binary frame from {}, dropping", socket.id);
            return;
        };

        if socket.is_banned() {
            log::debug!("dropping binary frame from banned socket {}", socket.id);
            return;
        }

        let announce = Message {
            t: KindTag::File.as_i64(),
            to: pending.to.clone(),
            topic: pending.topic.clone(),
            data: Some(json!({
                "filename": pending.filename,
                "size": pending.size,
                "from": socket.alias(),
            })),
            ..Message::default()
        };

        if let Some(to) = &pending.to {
            self.hub.direct(announce).await;
            if let Some(recipient) = self.hub.get(to).await {
                if !recipient.is_banned() {
                    recipient.send_binary(payload);
                }
            }
        } else if let Some(topic) = &pending.topic {
            self.hub.publish(topic, &announce, Some(&socket.id)).await;
            self.hub
                .publish_binary(topic, &payload, Some(&socket.id))
                .await;
        } else {
            self.hub.broadcast(&announce, Some(&socket.id)).await;
            self.hub.broadcast_binary(&payload, Some(&socket.id)).await;
        }
    }
}
