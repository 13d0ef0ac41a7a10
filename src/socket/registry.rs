//! The `Socket` entry: everything the hub tracks about one admitted
//! connection besides the write pipeline itself.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::constants::FALLBACK_ALIAS_LEN;
use crate::socket::connection::Connection;

/// Monotonic id generator. A nanosecond timestamp is acceptable per the
/// component design; a counter is used instead so identity stays stable and
/// collision-free even under clock coarseness or repeated admissions within
/// the same nanosecond.
static NEXT_SOCKET_SEQ: AtomicU64 = AtomicU64::new(1);

/// Generates a monotonically increasing socket id.
pub fn generate_socket_id() -> String {
    let seq = NEXT_SOCKET_SEQ.fetch_add(1, Ordering::Relaxed);
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("sock-{now:x}-{seq:x}")
}

/// Derives the fallback display name for a socket that never calls
/// `set_alias`: the first [`FALLBACK_ALIAS_LEN`] characters of its id
/// (spec.md §3 `Socket.alias` invariant).
pub fn fallback_alias(id: &str) -> String {
    id.chars().take(FALLBACK_ALIAS_LEN).collect()
}

/// A single admitted connection's tracked state.
///
/// Does not hold a reference back to the owning `Hub` — fan-out and
/// lifecycle operations are driven by the `Hub` itself, keyed by socket id,
/// which avoids an `Arc` reference cycle between `Hub` and `Socket`.
pub struct Socket {
    /// Stable identifier assigned at admission.
    pub id: String,
    /// Admission time. Tracked for observability only — no routing path
    /// reads this (spec.md §3 carries no freshness invariant on Socket).
    pub connected_at: DateTime<Utc>,
    /// Outbound write pipeline.
    pub connection: Connection,
    /// Opaque client-set properties (e.g. `user_id` set by the auth step).
    properties: RwLock<std::collections::HashMap<String, serde_json::Value>>,
    /// Display alias. Empty until `set_alias` is called, in which case
    /// `alias()` derives one from `id` (spec.md §3).
    alias: RwLock<String>,
    banned: AtomicBool,
    /// Metadata for a file transfer awaiting its binary frame. Holds at
    /// most one entry; a new file message overwrites (and abandons) any
    /// prior pending transfer.
    pending_file: RwLock<Option<PendingFile>>,
}

/// Metadata captured from a `t=10` (file) message, held until the paired
/// binary frame arrives.
#[derive(Clone, Debug)]
pub struct PendingFile {
    pub filename: String,
    pub size: u64,
    pub to: Option<String>,
    pub topic: Option<String>,
}

impl Socket {
    /// Creates a new socket entry with a generated id and fallback alias.
    pub fn new(connection: Connection) -> Self {
        Self {
            id: generate_socket_id(),
            connected_at: Utc::now(),
            connection,
            properties: RwLock::new(std::collections::HashMap::new()),
            alias: RwLock::new(String::new()),
            banned: AtomicBool::new(false),
            pending_file: RwLock::new(None),
        }
    }

    /// Like [`Socket::new`], but with an explicit id rather than a
    /// generated one. Used by tests that need to simulate a specific
    /// recipient reconnecting under a known id.
    #[cfg(any(test, feature = "test-util"))]
    pub fn with_id(id: String, connection: Connection) -> Self {
        Self {
            id,
            ..Self::new(connection)
        }
    }

    /// The socket's display alias: whatever `set_alias` last stored, or (if
    /// never called) the first [`FALLBACK_ALIAS_LEN`] characters of `id`.
    pub fn alias(&self) -> String {
        let alias = self.alias.read().expect("alias lock poisoned");
        if alias.is_empty() {
            fallback_alias(&self.id)
        } else {
            alias.clone()
        }
    }

    pub fn set_alias(&self, alias: String) {
        *self.alias.write().expect("alias lock poisoned") = alias;
    }

    pub fn is_banned(&self) -> bool {
        self.banned.load(Ordering::Acquire)
    }

    pub fn set_banned(&self, banned: bool) {
        self.banned.store(banned, Ordering::Release);
    }

    pub fn get_property(&self, key: &str) -> Option<serde_json::Value> {
        self.properties
            .read()
            .expect("properties lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn set_property(&self, key: String, value: serde_json::Value) {
        self.properties
            .write()
            .expect("properties lock poisoned")
            .insert(key, value);
    }

    /// Stores file metadata ahead of its binary payload, overwriting (and
    /// thereby abandoning) any transfer already pending.
    pub fn set_pending_file(&self, file: PendingFile) {
        *self.pending_file.write().expect("pending_file lock poisoned") = Some(file);
    }

    /// Takes the pending file metadata, if any, clearing the slot.
    pub fn take_pending_file(&self) -> Option<PendingFile> {
        self.pending_file
            .write()
            .expect("pending_file lock poisoned")
            .take()
    }

    /// Serializes and enqueues a message to this socket's outbound text
    /// lane. A no-op while banned (spec.md §3), if serialization fails
    /// (dropped and logged, never a panic), or if the lane is full (per the
    /// connection's drop-on-full write pipeline).
    pub fn send(&self, message: &crate::message::Message) {
        if self.is_banned() {
            return;
        }
        match serde_json::to_string(message) {
            Ok(text) => {
                self.connection.write_text(text);
            }
            Err(err) => log::error!("failed to serialize outbound message: {err}"),
        }
    }

    /// Enqueues a binary frame to this socket's outbound binary lane. A
    /// no-op while banned, mirroring [`Socket::send`].
    pub fn send_binary(&self, payload: Vec<u8>) {
        if self.is_banned() {
            return;
        }
        self.connection.write_binary(payload);
    }
}
