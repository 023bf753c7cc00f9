//! WebSocket transport for the relay.
//!
//! Thin wrapper around `tokio-tungstenite` with separate reader/writer
//! halves so the relay socket can read in a background task while the
//! supervisor writes. Ping/pong is answered by tungstenite itself; the
//! reader only surfaces text frames and the close.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use crate::error::ChannelError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Received WebSocket message.
#[derive(Debug, PartialEq, Eq)]
pub enum WsMessage {
    /// UTF-8 text frame (binary frames are decoded as UTF-8 when valid).
    Text(String),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .map_err(|e| ChannelError::Transport(format!("WebSocket send failed: {e}")))
    }

    /// Send a close frame and close the sink.
    pub async fn close(&mut self) -> Result<(), ChannelError> {
        // The peer may already be gone; the close frame is best effort.
        let _ = self.sink.send(tungstenite::Message::Close(None)).await;
        self.sink
            .close()
            .await
            .map_err(|e| ChannelError::Transport(format!("WebSocket close failed: {e}")))
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    pub async fn recv(&mut self) -> Option<Result<WsMessage, ChannelError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    match String::from_utf8(data.to_vec()) {
                        Ok(text) => return Some(Ok(WsMessage::Text(text))),
                        Err(_) => {
                            log::debug!("Skipping non-UTF-8 binary frame");
                            continue;
                        }
                    }
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(
                    tungstenite::Message::Ping(_)
                    | tungstenite::Message::Pong(_)
                    | tungstenite::Message::Frame(_),
                )) => continue,
                Some(Err(e)) => {
                    return Some(Err(ChannelError::Transport(format!(
                        "WebSocket read error: {e}"
                    ))));
                }
                None => return None,
            }
        }
    }
}

/// Perform the WebSocket handshake with `url` and split the stream.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader), ChannelError> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .map_err(|e| ChannelError::Transport(format!("invalid WebSocket URL {url}: {e}")))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| ChannelError::Transport(format!("WebSocket connect failed: {e}")))?;

    let (sink, stream) = ws_stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Convert an HTTP(S) URL to WS(S) scheme. `ws://` and `wss://` pass through.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}
