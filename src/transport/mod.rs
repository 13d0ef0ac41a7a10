//! Transport abstraction.
//!
//! The external collaborator that terminates the physical connection and
//! hands the hub a byte-oriented, frame-oriented stream of text/binary/
//! ping/pong/close events. The hub core depends only on [`TransportSink`]
//! and [`TransportStream`] — never on a concrete websocket library — so the
//! `axum` adapter in [`axum_ws`] could be swapped for another transport
//! without touching `Connection`, `Hub`, or the dispatcher.

pub mod axum_ws;

use async_trait::async_trait;

/// One frame read off the wire, already demultiplexed from whatever
/// transport-level framing applies (HTTP upgrade, websocket opcodes, ...).
#[derive(Debug)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
}

/// The write half of a transport connection.
///
/// Implementations are not required to be cheaply cloneable; the writer
/// task in [`crate::socket::connection`] owns exactly one `TransportSink`
/// for the lifetime of the connection.
#[async_trait]
pub trait TransportSink: Send {
    /// Sends a text frame.
    async fn send_text(&mut self, data: String) -> anyhow::Result<()>;
    /// Sends a binary frame.
    async fn send_binary(&mut self, data: Vec<u8>) -> anyhow::Result<()>;
    /// Sends a pong in reply to a ping.
    async fn send_pong(&mut self) -> anyhow::Result<()>;
    /// Closes the underlying connection.
    async fn close(&mut self) -> anyhow::Result<()>;
}

/// The read half of a transport connection.
#[async_trait]
pub trait TransportStream: Send {
    /// Reads the next frame, or `None` at end-of-stream.
    async fn recv(&mut self) -> Option<InboundFrame>;
}
