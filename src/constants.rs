//! Application-wide constants for the hub.
//!
//! Centralizes the magic numbers called out by name in the component design:
//! queue capacities, connection limits, offline-spool TTL, and timing
//! defaults. Grouped by domain, the way the rest of this crate's
//! configuration surface is grouped.

use std::time::Duration;

// ============================================================================
// Connection admission
// ============================================================================

/// Default maximum number of concurrently admitted sockets.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100_000;

/// Default per-lane bounded queue capacity for a connection's write pipeline.
///
/// Each connection has two lanes (text, binary); each lane holds this many
/// frames before newly enqueued frames are dropped rather than blocking the
/// caller.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

// ============================================================================
// Offline spool
// ============================================================================

/// Default time-to-live for a spooled offline message before eviction.
pub const DEFAULT_OFFLINE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// Aliases
// ============================================================================

/// Length, in characters, of a generated fallback alias when a socket never
/// calls `set_alias`.
pub const FALLBACK_ALIAS_LEN: usize = 12;

// ============================================================================
// Networking
// ============================================================================

/// Default bind address for the websocket/admin HTTP listener.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Timeout applied to a single outbound websocket frame send.
pub const WEBSOCKET_SEND_TIMEOUT: Duration = Duration::from_secs(5);
