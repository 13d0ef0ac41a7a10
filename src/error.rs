//! Error taxonomy for the hub core.
//!
//! Distinguishes the failure classes laid out in the error-handling design:
//! admission failures close the transport before a `Socket` exists, and
//! protocol-shape errors never close a connection — they produce an `error`
//! message back to the sender. Subsystem failures (the pluggable
//! `TokenValidator` / `CallStore`) cross the trait boundary as
//! `anyhow::Error` and are logged and swallowed at the call site rather than
//! folded into this enum.

use thiserror::Error;

/// Failure admitting a new connection into the hub.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// `Hub::connection_count` was already at `max_connections`.
    #[error("connection capacity exceeded")]
    CapacityExceeded,
    /// The transport-level credential was rejected before a `Socket` was
    /// created.
    #[error("admission rejected: {0}")]
    Rejected(String),
}

/// Failure interpreting an otherwise well-framed inbound payload as a
/// `Message`.
///
/// Protocol-shape errors are never fatal: the dispatcher replies with an
/// `error` message (kind tag 8) and keeps the connection open.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// None of the three supported encodings (object, positional array,
    /// legacy keyword) could parse the payload.
    #[error("unrecognized message encoding")]
    UnknownEncoding,
    /// The payload parsed as one of the three encodings but was missing a
    /// field required for its kind tag.
    #[error("malformed message: {0}")]
    Shape(String),
}
