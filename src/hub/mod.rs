//! The connection hub: registry, admission, fan-out, bans, and properties.
//!
//! One `RwLock` guards the socket table, connection count, and global
//! handler registry together — fan-out takes the read lock, registration
//! and removal take the write lock, and this lock is never held while a
//! `Socket`'s own lock is acquired (ban/alias/property mutation happens
//! through `Socket`'s interior locking after the `Hub` lock, if any, is
//! already released). This mirrors the teacher's `SharedHubState =
//! Arc<RwLock<HubState>>` registry shape in `hub/state.rs`, generalized
//! from an agent-session table to a socket table, and its
//! `add_agent`/`remove_agent` pair to `admit`/`remove`.

pub mod events;
pub mod offline;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::AdmissionError;
use crate::message::Message;
use crate::socket::connection::Connection;
use crate::socket::registry::Socket;

use events::{fire_connect, fire_disconnect, ConnectHandler, DisconnectHandler, HandlerRegistry};
use offline::OfflineStore;

struct HubInner {
    sockets: HashMap<String, Arc<Socket>>,
    connection_count: usize,
    handlers: HandlerRegistry,
}

/// The connection hub.
pub struct Hub {
    inner: RwLock<HubInner>,
    max_connections: usize,
    offline_store: Arc<dyn OfflineStore>,
    /// Lifetime admission counters, for observability only — neither
    /// participates in any routing invariant (spec.md §3 only constrains
    /// `connection_count`/`sockets.len()` equality).
    total_admitted: AtomicU64,
    total_rejected: AtomicU64,
}

impl Hub {
    pub fn new(max_connections: usize, offline_store: Arc<dyn OfflineStore>) -> Self {
        Self {
            inner: RwLock::new(HubInner {
                sockets: HashMap::new(),
                connection_count: 0,
                handlers: HandlerRegistry::new(),
            }),
            max_connections,
            offline_store,
            total_admitted: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Count of sockets ever successfully admitted, including since
    /// removed.
    pub fn total_admitted(&self) -> u64 {
        self.total_admitted.load(Ordering::Relaxed)
    }

    /// Count of admission attempts rejected for capacity.
    pub fn total_rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::Relaxed)
    }

    pub async fn on_connect(&self, handler: ConnectHandler) {
        self.inner.write().await.handlers.on_connect(handler);
    }

    pub async fn on_disconnect(&self, handler: DisconnectHandler) {
        self.inner.write().await.handlers.on_disconnect(handler);
    }

    /// Number of currently admitted sockets. Always equal to the number of
    /// entries in the socket table.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connection_count
    }

    /// Admits a new connection: checks capacity, registers the socket,
    /// fires connect handlers asynchronously, and drains any offline
    /// messages spooled for it.
    ///
    /// Returns `AdmissionError::CapacityExceeded` if the hub is already at
    /// `max_connections` — no `Socket` is created in that case, and the
    /// caller is responsible for closing the raw transport.
    pub async fn admit(&self, connection: Connection) -> Result<Arc<Socket>, AdmissionError> {
        self.admit_socket(Socket::new(connection)).await
    }

    /// Like [`Hub::admit`], but for a socket constructed with a caller-
    /// chosen id rather than a generated one. Exposed only so integration
    /// tests can simulate "the same logical client reconnects" (real
    /// production admission always assigns a fresh id; nothing in this
    /// crate resumes an old one).
    #[cfg(any(test, feature = "test-util"))]
    pub async fn admit_with_id(
        &self,
        id: String,
        connection: Connection,
    ) -> Result<Arc<Socket>, AdmissionError> {
        self.admit_socket(Socket::with_id(id, connection)).await
    }

    async fn admit_socket(&self, socket: Socket) -> Result<Arc<Socket>, AdmissionError> {
        let socket = {
            let mut inner = self.inner.write().await;
            if inner.connection_count >= self.max_connections {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(AdmissionError::CapacityExceeded);
            }
            let socket = Arc::new(socket);
            inner.sockets.insert(socket.id.clone(), socket.clone());
            inner.connection_count += 1;
            debug_assert_eq!(inner.connection_count, inner.sockets.len());
            self.total_admitted.fetch_add(1, Ordering::Relaxed);
            log::info!("socket {} admitted ({} connected)", socket.id, inner.connection_count);
            fire_connect(&inner.handlers.connect, socket.clone());
            socket
        };

        self.drain_offline(&socket).await;

        Ok(socket)
    }

    /// Removes a socket from the registry and fires disconnect handlers.
    pub async fn remove(&self, socket_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(socket) = inner.sockets.remove(socket_id) {
            inner.connection_count -= 1;
            debug_assert_eq!(inner.connection_count, inner.sockets.len());
            log::info!("socket {socket_id} removed ({} connected)", inner.connection_count);
            socket.connection.close();
            fire_disconnect(&inner.handlers.disconnect, socket_id.to_string());
        }
    }

    pub async fn get(&self, socket_id: &str) -> Option<Arc<Socket>> {
        self.inner.read().await.sockets.get(socket_id).cloned()
    }

    /// Flips a socket's banned flag. Banned sockets are skipped by every
    /// fan-out path but remain registered (they can still be unbanned).
    pub async fn ban(&self, socket_id: &str) {
        if let Some(socket) = self.get(socket_id).await {
            socket.set_banned(true);
        }
    }

    pub async fn unban(&self, socket_id: &str) {
        if let Some(socket) = self.get(socket_id).await {
            socket.set_banned(false);
        }
    }

    /// Linear scan for sockets whose property matches the given value.
    pub async fn find_by_property(&self, key: &str, value: &serde_json::Value) -> Vec<Arc<Socket>> {
        self.inner
            .read()
            .await
            .sockets
            .values()
            .filter(|s| s.get_property(key).as_ref() == Some(value))
            .cloned()
            .collect()
    }

    pub async fn subscribe(&self, socket_id: &str, topic: String) {
        if let Some(socket) = self.get(socket_id).await {
            socket.connection.subscriptions.write().await.insert(topic);
        }
    }

    pub async fn unsubscribe(&self, socket_id: &str, topic: &str) {
        if let Some(socket) = self.get(socket_id).await {
            socket.connection.subscriptions.write().await.remove(topic);
        }
    }

    /// The union of every non-banned socket's subscription set, sorted.
    /// Broadcast to all as a refreshed topic list whenever a subscription
    /// changes (spec.md §4.3, `subscribe`/`unsubscribe`).
    pub async fn all_topics(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut topics = std::collections::BTreeSet::new();
        for socket in inner.sockets.values() {
            if socket.is_banned() {
                continue;
            }
            if let Ok(subs) = socket.connection.subscriptions.try_read() {
                topics.extend(subs.iter().cloned());
            }
        }
        topics.into_iter().collect()
    }

    pub async fn topics_for(&self, socket_id: &str) -> Vec<String> {
        match self.get(socket_id).await {
            Some(socket) => socket
                .connection
                .subscriptions
                .read()
                .await
                .iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// User-list snapshot: `(socket_id, alias)` for every non-banned
    /// socket.
    pub async fn user_list(&self) -> Vec<(String, String)> {
        self.inner
            .read()
            .await
            .sockets
            .values()
            .filter(|s| !s.is_banned())
            .map(|s| (s.id.clone(), s.alias()))
            .collect()
    }

    /// Sends `message` to every admitted socket except `exclude` (if any)
    /// and every banned socket.
    pub async fn broadcast(&self, message: &Message, exclude: Option<&str>) {
        let inner = self.inner.read().await;
        for socket in inner.sockets.values() {
            if socket.is_banned() {
                continue;
            }
            if exclude == Some(socket.id.as_str()) {
                continue;
            }
            Self::enqueue(socket, message);
        }
    }

    /// Publishes to a topic: reserved topic `"general"` behaves exactly
    /// like [`Hub::broadcast`] (sender-excluded, no subscription check);
    /// any other topic is delivered only to sockets subscribed to it
    /// (subscription membership is tested instead of sender exclusion).
    pub async fn publish(&self, topic: &str, message: &Message, sender: Option<&str>) {
        if topic == "general" {
            self.broadcast(message, sender).await;
            return;
        }

        let inner = self.inner.read().await;
        for socket in inner.sockets.values() {
            if socket.is_banned() {
                continue;
            }
            let subscribed = socket
                .connection
                .subscriptions
                .try_read()
                .map(|subs| subs.contains(topic))
                .unwrap_or(false);
            if subscribed {
                Self::enqueue(socket, message);
            }
        }
    }

    /// Delivers directly to `message.to` if present and live; otherwise
    /// spools it in the offline store. An absent `id` is synthesized
    /// before spooling so the eventual drain can be deduplicated.
    ///
    /// A recipient that is present but banned is neither delivered to nor
    /// spooled — spec.md's "banned sockets are skipped by every fan-out
    /// path" and "outbound enqueue is a no-op while banned" invariants rule
    /// out both. Spooling it would key the stored message by that banned
    /// socket's own id, which (ids are never reused) only that socket could
    /// ever drain — an unintended side channel to a recipient the rest of
    /// the hub treats as unreachable.
    pub async fn direct(&self, mut message: Message) {
        let Some(to) = message.to.clone() else {
            log::warn!("direct() called without a `to` field, dropping");
            return;
        };

        match self.get(&to).await {
            Some(socket) if socket.is_banned() => {
                log::debug!("direct message to banned socket {to} dropped");
            }
            Some(socket) => {
                Self::enqueue(&socket, &message);
            }
            None => {
                if message.id.is_none() {
                    message.id = Some(uuid::Uuid::new_v4().to_string());
                }
                if let Err(err) = self.offline_store.store(&to, message).await {
                    log::error!("failed to spool offline message for {to}: {err:#}");
                }
            }
        }
    }

    /// Delivers to an explicit list of recipient ids. Recipients that are
    /// not currently connected are simply skipped — `notify` never spools.
    pub async fn notify(&self, ids: &[String], message: &Message) {
        for id in ids {
            if let Some(socket) = self.get(id).await {
                if !socket.is_banned() {
                    Self::enqueue(&socket, message);
                }
            }
        }
    }

    /// Binary counterpart to [`Hub::broadcast`], used for the payload frame
    /// of a file transfer (spec.md §4.4). All-except-sender per §4.4's
    /// resolution of the source's inconsistent `BroadcastBinaryToAll` path.
    pub async fn broadcast_binary(&self, payload: &[u8], exclude: Option<&str>) {
        let inner = self.inner.read().await;
        for socket in inner.sockets.values() {
            if socket.is_banned() || exclude == Some(socket.id.as_str()) {
                continue;
            }
            socket.send_binary(payload.to_vec());
        }
    }

    /// Binary counterpart to [`Hub::publish`], used for the payload frame
    /// of a topic-scoped file transfer.
    pub async fn publish_binary(&self, topic: &str, payload: &[u8], exclude: Option<&str>) {
        if topic == "general" {
            self.broadcast_binary(payload, exclude).await;
            return;
        }
        let inner = self.inner.read().await;
        for socket in inner.sockets.values() {
            if socket.is_banned() {
                continue;
            }
            let subscribed = socket
                .connection
                .subscriptions
                .try_read()
                .map(|subs| subs.contains(topic))
                .unwrap_or(false);
            if subscribed {
                socket.send_binary(payload.to_vec());
            }
        }
    }

    /// Drains every offline message spooled for a just-admitted socket,
    /// marking each as `offline: true` with a `delivered_at` timestamp,
    /// then deletes the drained ids in one call. A delete failure after
    /// successful enqueue is logged and accepted (at-least-once).
    async fn drain_offline(&self, socket: &Arc<Socket>) {
        let pending = match self.offline_store.get(&socket.id).await {
            Ok(pending) => pending,
            Err(err) => {
                log::error!("failed to read offline store for {}: {err:#}", socket.id);
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        let mut delivered_ids = Vec::with_capacity(pending.len());
        for stored in pending {
            let mut message = stored.message;
            let mut data = message.data.take().unwrap_or_else(|| serde_json::json!({}));
            if let serde_json::Value::Object(ref mut map) = data {
                map.insert("offline".into(), serde_json::json!(true));
                map.insert(
                    "delivered_at".into(),
                    serde_json::json!(chrono::Utc::now().to_rfc3339()),
                );
            }
            message.data = Some(data);

            Self::enqueue(socket, &message);
            delivered_ids.push(stored.id);
        }

        if let Err(err) = self.offline_store.delete(&delivered_ids).await {
            log::warn!(
                "failed to delete {} drained offline messages for {}: {err:#}",
                delivered_ids.len(),
                socket.id
            );
        }
    }

    fn enqueue(socket: &Socket, message: &Message) {
        socket.send(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::offline::InMemoryOfflineStore;
    use crate::transport::TransportSink;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<String>>>,
        sent_binary: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl TransportSink for RecordingSink {
        async fn send_text(&mut self, data: String) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(data);
            Ok(())
        }
        async fn send_binary(&mut self, data: Vec<u8>) -> anyhow::Result<()> {
            self.sent_binary.lock().unwrap().push(data);
            Ok(())
        }
        async fn send_pong(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn close(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn recording_connection() -> (Connection, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink { sent: sent.clone(), sent_binary: Arc::new(Mutex::new(Vec::new())) };
        (Connection::spawn(Box::new(sink), 8), sent)
    }

    fn recording_connection_with_binary() -> (Connection, Arc<Mutex<Vec<String>>>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_binary = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink { sent: sent.clone(), sent_binary: sent_binary.clone() };
        (Connection::spawn(Box::new(sink), 8), sent, sent_binary)
    }

    fn test_hub(max: usize) -> Hub {
        Hub::new(max, Arc::new(InMemoryOfflineStore::new()))
    }

    #[tokio::test]
    async fn connection_count_matches_socket_table() {
        let hub = test_hub(10);
        let (c1, _) = recording_connection();
        let (c2, _) = recording_connection();
        let s1 = hub.admit(c1).await.unwrap();
        let _s2 = hub.admit(c2).await.unwrap();
        assert_eq!(hub.connection_count().await, 2);

        hub.remove(&s1.id).await;
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn admission_rejected_at_capacity_creates_no_socket() {
        let hub = test_hub(1);
        let (c1, _) = recording_connection();
        let (c2, _) = recording_connection();
        hub.admit(c1).await.unwrap();

        let result = hub.admit(c2).await;
        assert!(matches!(result, Err(AdmissionError::CapacityExceeded)));
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn broadcast_excludes_sender_and_banned() {
        let hub = test_hub(10);
        let (c1, sent1) = recording_connection();
        let (c2, sent2) = recording_connection();
        let (c3, sent3) = recording_connection();
        let s1 = hub.admit(c1).await.unwrap();
        let _s2 = hub.admit(c2).await.unwrap();
        let s3 = hub.admit(c3).await.unwrap();
        hub.ban(&s3.id).await;

        hub.broadcast(&Message::new(1), Some(&s1.id)).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(sent1.lock().unwrap().is_empty());
        assert_eq!(sent2.lock().unwrap().len(), 1);
        assert!(sent3.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn topic_publish_respects_subscription_membership() {
        let hub = test_hub(10);
        let (c1, sent1) = recording_connection();
        let (c2, sent2) = recording_connection();
        let s1 = hub.admit(c1).await.unwrap();
        let _s2 = hub.admit(c2).await.unwrap();

        hub.subscribe(&s1.id, "room-42".to_string()).await;

        let mut msg = Message::new(1);
        msg.topic = Some("room-42".to_string());
        hub.publish("room-42", &msg, None).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(sent1.lock().unwrap().len(), 1);
        assert!(sent2.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn general_topic_behaves_like_broadcast() {
        let hub = test_hub(10);
        let (c1, sent1) = recording_connection();
        let (c2, sent2) = recording_connection();
        let s1 = hub.admit(c1).await.unwrap();
        let _s2 = hub.admit(c2).await.unwrap();

        let mut msg = Message::new(1);
        msg.topic = Some("general".to_string());
        hub.publish("general", &msg, Some(&s1.id)).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(sent1.lock().unwrap().is_empty());
        assert_eq!(sent2.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn direct_to_offline_recipient_spools_then_delivers_on_reconnect() {
        let hub = test_hub(10);

        let mut msg = Message::new(12);
        msg.to = Some("not-yet-connected".to_string());
        hub.direct(msg).await;

        let (conn, sent) = recording_connection();
        hub.admit_with_id("not-yet-connected".to_string(), conn)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(sent.lock().unwrap().len(), 1);
        let delivered: serde_json::Value =
            serde_json::from_str(&sent.lock().unwrap()[0]).unwrap();
        assert_eq!(delivered["data"]["offline"], serde_json::json!(true));
        assert!(delivered["data"]["delivered_at"].is_string());

        // Disconnect, then reconnect under the same id: nothing left to
        // deliver — the spool was deleted after the first drain.
        hub.remove("not-yet-connected").await;
        let (conn2, sent2) = recording_connection();
        hub.admit_with_id("not-yet-connected".to_string(), conn2)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(sent2.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn direct_to_banned_recipient_is_dropped_not_spooled() {
        let hub = test_hub(10);
        let (conn, sent) = recording_connection();
        let recipient = hub.admit(conn).await.unwrap();
        hub.ban(&recipient.id).await;

        let mut msg = Message::new(12);
        msg.to = Some(recipient.id.clone());
        hub.direct(msg).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(sent.lock().unwrap().is_empty());
        let pending = hub
            .offline_store
            .get(&recipient.id)
            .await
            .expect("get should not error");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn notify_does_not_spool_absent_recipients() {
        let hub = test_hub(10);
        hub.notify(&["nobody-home".to_string()], &Message::new(3))
            .await;
        let pending = hub
            .offline_store
            .get("nobody-home")
            .await
            .expect("get should not error");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn admission_counters_track_admitted_and_rejected() {
        let hub = test_hub(1);
        let (c1, _) = recording_connection();
        let (c2, _) = recording_connection();
        hub.admit(c1).await.unwrap();
        assert_eq!(hub.total_admitted(), 1);
        assert_eq!(hub.total_rejected(), 0);

        assert!(hub.admit(c2).await.is_err());
        assert_eq!(hub.total_admitted(), 1);
        assert_eq!(hub.total_rejected(), 1);
    }

    #[tokio::test]
    async fn all_topics_is_the_sorted_union_of_non_banned_subscriptions() {
        let hub = test_hub(10);
        let (c1, _) = recording_connection();
        let (c2, _) = recording_connection();
        let (c3, _) = recording_connection();
        let s1 = hub.admit(c1).await.unwrap();
        let s2 = hub.admit(c2).await.unwrap();
        let s3 = hub.admit(c3).await.unwrap();
        hub.subscribe(&s1.id, "zebra".to_string()).await;
        hub.subscribe(&s2.id, "apple".to_string()).await;
        hub.subscribe(&s3.id, "banned-topic".to_string()).await;
        hub.ban(&s3.id).await;

        assert_eq!(hub.all_topics().await, vec!["apple".to_string(), "zebra".to_string()]);
    }

    #[tokio::test]
    async fn binary_broadcast_excludes_sender() {
        let hub = test_hub(10);
        let (c1, _, bin1) = recording_connection_with_binary();
        let (c2, _, bin2) = recording_connection_with_binary();
        let s1 = hub.admit(c1).await.unwrap();
        let _s2 = hub.admit(c2).await.unwrap();

        hub.broadcast_binary(&[1, 2, 3], Some(&s1.id)).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(bin1.lock().unwrap().is_empty());
        assert_eq!(bin2.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_and_unsubscribe_is_a_no_op_after_the_first() {
        let hub = test_hub(10);
        let (c1, _) = recording_connection();
        let s1 = hub.admit(c1).await.unwrap();

        hub.subscribe(&s1.id, "news".to_string()).await;
        hub.subscribe(&s1.id, "news".to_string()).await;
        assert_eq!(hub.topics_for(&s1.id).await, vec!["news".to_string()]);

        hub.unsubscribe(&s1.id, "news").await;
        hub.unsubscribe(&s1.id, "news").await;
        assert!(hub.topics_for(&s1.id).await.is_empty());
    }

    #[tokio::test]
    async fn binary_publish_respects_subscription_membership() {
        let hub = test_hub(10);
        let (c1, _, bin1) = recording_connection_with_binary();
        let (c2, _, bin2) = recording_connection_with_binary();
        let s1 = hub.admit(c1).await.unwrap();
        let _s2 = hub.admit(c2).await.unwrap();
        hub.subscribe(&s1.id, "room-42".to_string()).await;

        hub.publish_binary("room-42", &[9, 9], None).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(bin1.lock().unwrap().len(), 1);
        assert!(bin2.lock().unwrap().is_empty());
    }
}
