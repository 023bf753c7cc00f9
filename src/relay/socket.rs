//! Single relay connection with observable state and frame streams.
//!
//! [`RelaySocket`] owns at most one live connection produced by a
//! [`Connector`]. Two streams are exposed:
//!
//! - connection state ([`ConnectionState`]) through a `watch` channel
//! - parsed inbound frames ([`IncomingFrame`]) through a `broadcast` channel
//!
//! A background task reads frames; when the peer closes or the read fails it
//! drops the writer and publishes `Disconnected`. Every connect bumps a
//! generation counter so a reader or connect attempt that lost a race with
//! [`RelaySocket::disconnect`] cannot clobber newer state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::protocol::IncomingFrame;
use crate::error::ChannelError;
use crate::ws::{self, WsMessage, WsReader, WsWriter};

const FRAME_BUFFER: usize = 256;

/// Socket connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Connected; frames may be sent.
    Connected,
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: &str) -> Result<(), ChannelError>;
    /// Close the connection.
    async fn close(&mut self);
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame, or `None` once the connection is closed.
    async fn next_frame(&mut self) -> Option<Result<String, ChannelError>>;
}

/// Opens connections for a [`RelaySocket`].
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`.
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), ChannelError>;
}

#[async_trait]
impl FrameSink for WsWriter {
    async fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
        WsWriter::send_text(self, text).await
    }

    async fn close(&mut self) {
        if let Err(e) = WsWriter::close(self).await {
            log::debug!("Relay socket close: {e}");
        }
    }
}

#[async_trait]
impl FrameSource for WsReader {
    async fn next_frame(&mut self) -> Option<Result<String, ChannelError>> {
        match self.recv().await? {
            Ok(WsMessage::Text(text)) => Some(Ok(text)),
            Ok(WsMessage::Close { code, reason }) => {
                log::info!("Relay socket closed by server: {code} {reason}");
                None
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// [`Connector`] over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), ChannelError> {
        let (writer, reader) = ws::connect(&ws::http_to_ws_scheme(url)).await?;
        Ok((Box::new(writer), Box::new(reader)))
    }
}

/// The relay-facing end of a [`ChannelConnector`] connection.
#[derive(Debug)]
pub struct ServerEnd {
    /// URL the client connected to.
    pub url: String,
    /// Frames sent by the client. Yields `None` once the client closes.
    pub from_client: mpsc::UnboundedReceiver<String>,
    /// Frames for the client. Dropping it closes the connection.
    pub to_client: mpsc::UnboundedSender<String>,
}

/// In-memory [`Connector`]: each accepted connection is handed out as a
/// [`ServerEnd`] so an in-process relay can drive it.
#[derive(Debug)]
pub struct ChannelConnector {
    accept: mpsc::UnboundedSender<ServerEnd>,
    refuse: AtomicBool,
}

impl ChannelConnector {
    /// Create a connector and the stream of accepted connections.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accept, accepted) = mpsc::unbounded_channel();
        (
            Self {
                accept,
                refuse: AtomicBool::new(false),
            },
            accepted,
        )
    }

    /// Make subsequent connects fail (or succeed again).
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

struct ChannelSink(Option<mpsc::UnboundedSender<String>>);
struct ChannelSource(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
        let tx = self
            .0
            .as_ref()
            .ok_or_else(|| ChannelError::Transport("connection closed".to_string()))?;
        tx.send(text.to_string())
            .map_err(|_| ChannelError::Transport("peer closed the connection".to_string()))
    }

    async fn close(&mut self) {
        self.0 = None;
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Result<String, ChannelError>> {
        self.0.recv().await.map(Ok)
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), ChannelError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::Transport("connection refused".to_string()));
        }
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        self.accept
            .send(ServerEnd {
                url: url.to_string(),
                from_client,
                to_client,
            })
            .map_err(|_| ChannelError::Transport("no relay listening".to_string()))?;
        Ok((
            Box::new(ChannelSink(Some(client_tx))),
            Box::new(ChannelSource(client_rx)),
        ))
    }
}

struct SocketInner {
    generation: u64,
    writer: Option<Box<dyn FrameSink>>,
    reader: Option<JoinHandle<()>>,
}

struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    frames_tx: broadcast::Sender<IncomingFrame>,
    inner: Mutex<SocketInner>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    async fn reader_finished(&self, generation: u64) {
        let writer = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return;
            }
            inner.reader = None;
            let writer = inner.writer.take();
            self.set_state(ConnectionState::Disconnected);
            writer
        };
        if let Some(mut writer) = writer {
            writer.close().await;
        }
    }
}

/// A single relay connection.
pub struct RelaySocket {
    url: String,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RelaySocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySocket")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RelaySocket {
    /// Create a disconnected socket for `url`.
    pub fn new(url: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (frames_tx, _) = broadcast::channel(FRAME_BUFFER);
        Self {
            url: url.into(),
            connector,
            shared: Arc::new(Shared {
                state_tx,
                frames_tx,
                inner: Mutex::new(SocketInner {
                    generation: 0,
                    writer: None,
                    reader: None,
                }),
            }),
        }
    }

    /// URL this socket connects to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to inbound frames.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<IncomingFrame> {
        self.shared.frames_tx.subscribe()
    }

    /// Open the connection. Fails if the socket is not `Disconnected`.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let generation = {
            let mut inner = self.shared.inner.lock().await;
            let claimed = self.shared.state_tx.send_if_modified(|state| {
                if *state == ConnectionState::Disconnected {
                    *state = ConnectionState::Connecting;
                    true
                } else {
                    false
                }
            });
            if !claimed {
                return Err(ChannelError::Internal(
                    "relay socket is already connected or connecting".to_string(),
                ));
            }
            inner.generation += 1;
            inner.generation
        };

        log::debug!("Connecting relay socket to {}", self.url);
        let connected = self.connector.connect(&self.url).await;

        let mut inner = self.shared.inner.lock().await;
        if inner.generation != generation {
            drop(inner);
            if let Ok((mut writer, _reader)) = connected {
                writer.close().await;
            }
            return Err(ChannelError::Transport(
                "relay socket was disconnected while connecting".to_string(),
            ));
        }

        match connected {
            Ok((writer, reader)) => {
                inner.writer = Some(writer);
                inner.reader = Some(tokio::spawn(read_loop(
                    Arc::clone(&self.shared),
                    reader,
                    generation,
                )));
                self.shared.set_state(ConnectionState::Connected);
                log::debug!("Relay socket connected to {}", self.url);
                Ok(())
            }
            Err(err) => {
                self.shared.set_state(ConnectionState::Disconnected);
                log::warn!("Relay socket connect to {} failed: {err}", self.url);
                Err(err)
            }
        }
    }

    /// Close the connection, if any, and publish `Disconnected`.
    pub async fn disconnect(&self) {
        let (writer, reader) = {
            let mut inner = self.shared.inner.lock().await;
            inner.generation += 1;
            self.shared.set_state(ConnectionState::Disconnected);
            (inner.writer.take(), inner.reader.take())
        };
        if let Some(reader) = reader {
            reader.abort();
        }
        if let Some(mut writer) = writer {
            writer.close().await;
        }
    }

    /// Send a text frame. Fails if not connected.
    pub async fn send_data(&self, data: &str) -> Result<(), ChannelError> {
        let mut inner = self.shared.inner.lock().await;
        match inner.writer.as_mut() {
            Some(writer) => writer.send_text(data).await,
            None => Err(ChannelError::Transport(
                "relay socket is not connected".to_string(),
            )),
        }
    }
}

impl Drop for RelaySocket {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.shared.inner.try_lock() {
            inner.generation += 1;
            if let Some(reader) = inner.reader.take() {
                reader.abort();
            }
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut source: Box<dyn FrameSource>, generation: u64) {
    loop {
        match source.next_frame().await {
            Some(Ok(text)) => {
                if let Some(frame) = IncomingFrame::parse(&text) {
                    // No subscribers is fine.
                    let _ = shared.frames_tx.send(frame);
                }
            }
            Some(Err(e)) => {
                log::warn!("Relay socket read failed: {e}");
                break;
            }
            None => {
                log::info!("Relay socket closed");
                break;
            }
        }
    }
    shared.reader_finished(generation).await;
}
