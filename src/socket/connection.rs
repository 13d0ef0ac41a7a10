//! Per-connection write pipeline.
//!
//! Each connection owns two bounded lanes (text, binary) and a single
//! writer task that drains both plus a close signal. Enqueueing is
//! non-blocking: a full lane drops the new frame rather than applying
//! back-pressure to the caller, matching the "drop rather than block"
//! trade-off used throughout the fan-out paths. The writer task shape —
//! one task per connection draining a channel into the wire, a close
//! sentinel it can select against — follows the teacher's
//! `SocketClientConn::write_loop`, generalized from a single unbounded
//! queue to two bounded ones.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;

use crate::transport::TransportSink;

/// A sentinel pushed onto a lane to wake the writer without new payload —
/// an empty buffer on either lane is never a legitimate frame, so it
/// doubles as a shutdown signal the writer can observe without a second
/// channel.
fn is_sentinel(buf: &[u8]) -> bool {
    buf.is_empty()
}

/// Owns the outbound side of one connection: two bounded queues and the
/// task that drains them into the transport.
pub struct Connection {
    text_tx: mpsc::Sender<Vec<u8>>,
    binary_tx: mpsc::Sender<Vec<u8>>,
    close: Arc<Notify>,
    writer_handle: Option<JoinHandle<()>>,
    /// Topics this connection is currently subscribed to.
    pub subscriptions: RwLock<HashSet<String>>,
}

impl Connection {
    /// Spawns the writer task over the given transport sink and returns the
    /// `Connection` handle used to enqueue outbound frames.
    pub fn spawn(sink: Box<dyn TransportSink>, queue_capacity: usize) -> Self {
        let (text_tx, text_rx) = mpsc::channel(queue_capacity);
        let (binary_tx, binary_rx) = mpsc::channel(queue_capacity);
        let close = Arc::new(Notify::new());

        let writer_handle = tokio::spawn(writer_loop(sink, text_rx, binary_rx, close.clone()));

        Self {
            text_tx,
            binary_tx,
            close,
            writer_handle: Some(writer_handle),
            subscriptions: RwLock::new(HashSet::new()),
        }
    }

    /// Enqueues a text frame. Returns `false` (and drops the frame) if the
    /// lane is full.
    pub fn write_text(&self, data: String) -> bool {
        self.try_send(&self.text_tx, data.into_bytes())
    }

    /// Enqueues a binary frame. Returns `false` (and drops the frame) if the
    /// lane is full.
    pub fn write_binary(&self, data: Vec<u8>) -> bool {
        self.try_send(&self.binary_tx, data)
    }

    fn try_send(&self, tx: &mpsc::Sender<Vec<u8>>, buf: Vec<u8>) -> bool {
        match tx.try_send(buf) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("write queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Signals the writer task to exit and stop accepting new frames.
    pub fn close(&self) {
        self.close.notify_one();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = self.writer_handle.take() {
            handle.abort();
        }
    }
}

async fn writer_loop(
    mut sink: Box<dyn TransportSink>,
    mut text_rx: mpsc::Receiver<Vec<u8>>,
    mut binary_rx: mpsc::Receiver<Vec<u8>>,
    close: Arc<Notify>,
) {
    loop {
        tokio::select! {
            biased;

            () = close.notified() => {
                break;
            }
            frame = text_rx.recv() => {
                match frame {
                    Some(buf) if is_sentinel(&buf) => break,
                    Some(buf) => {
                        let text = String::from_utf8_lossy(&buf).into_owned();
                        if sink.send_text(text).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            frame = binary_rx.recv() => {
                match frame {
                    Some(buf) if is_sentinel(&buf) => break,
                    Some(buf) => {
                        if sink.send_binary(buf).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let _ = sink.close().await;
}
