//! `axum` websocket adapter.
//!
//! Grounded in the split-sink/split-stream connection handler shape used by
//! the pack's `get10101` orderbook websocket route: `WebSocket::split()`
//! gives an independent sink and stream that each half of the connection's
//! task pair owns without further synchronization.

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use crate::constants::WEBSOCKET_SEND_TIMEOUT;

use super::{InboundFrame, TransportSink, TransportStream};

async fn send_with_timeout(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    msg: WsMessage,
) -> anyhow::Result<()> {
    tokio::time::timeout(WEBSOCKET_SEND_TIMEOUT, sink.send(msg))
        .await
        .map_err(|_| anyhow::anyhow!("websocket send timed out"))??;
    Ok(())
}

/// [`TransportSink`] backed by an axum websocket sink.
pub struct AxumSink(SplitSink<WebSocket, WsMessage>);

/// [`TransportStream`] backed by an axum websocket stream.
pub struct AxumStream(SplitStream<WebSocket>);

/// Splits an upgraded axum websocket into its transport-trait halves.
pub fn split(socket: WebSocket) -> (AxumSink, AxumStream) {
    let (sink, stream) = socket.split();
    (AxumSink(sink), AxumStream(stream))
}

#[async_trait]
impl TransportSink for AxumSink {
    async fn send_text(&mut self, data: String) -> anyhow::Result<()> {
        send_with_timeout(&mut self.0, WsMessage::Text(data)).await
    }

    async fn send_binary(&mut self, data: Vec<u8>) -> anyhow::Result<()> {
        send_with_timeout(&mut self.0, WsMessage::Binary(data)).await
    }

    async fn send_pong(&mut self) -> anyhow::Result<()> {
        send_with_timeout(&mut self.0, WsMessage::Pong(Vec::new())).await
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        send_with_timeout(&mut self.0, WsMessage::Close(None)).await
    }
}

#[async_trait]
impl TransportStream for AxumStream {
    async fn recv(&mut self) -> Option<InboundFrame> {
        loop {
            let msg = match self.0.next().await? {
                Ok(msg) => msg,
                Err(_) => return Some(InboundFrame::Close),
            };
            return Some(match msg {
                WsMessage::Text(text) => InboundFrame::Text(text),
                WsMessage::Binary(data) => InboundFrame::Binary(data),
                WsMessage::Ping(_) => InboundFrame::Ping,
                WsMessage::Pong(_) => InboundFrame::Pong,
                WsMessage::Close(_) => InboundFrame::Close,
            });
        }
    }
}
