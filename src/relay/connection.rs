//! Relay connection supervisor.
//!
//! A single background task owns the [`RelaySocket`], the
//! [`HeartbeatMonitor`] and all per-connection state. The public
//! [`RelayConnection`] handle talks to it over a command channel, so nothing
//! here is shared between tasks except the watch channels the handle reads.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──► Connected ──HostSession OK──► authenticated
//!      ▲                          │               │
//!      └──── reconnect_delay ◄────┴── closed / heartbeat expired
//! ```
//!
//! Once [`RelayConnection::connect`] has been called, every drop back to
//! `Disconnected` schedules another attempt after a fixed delay. Retries never
//! stop until [`RelayConnection::destroy`] (or the handle is dropped).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use super::heartbeat::{HeartbeatEvent, HeartbeatMonitor, DEFAULT_HEARTBEAT_INTERVAL};
use super::http::RelayHttp;
use super::protocol::{
    metadata_keys, ClientMessage, IncomingFrame, ServerMessage, Web3ResponseBody,
    HEARTBEAT_FRAME, WEB3_RESPONSE_EVENT, WEB3_RESPONSE_TYPE,
};
use super::session::RelaySession;
use super::socket::{ConnectionState, Connector, RelaySocket};
use crate::crypto::RelayCipher;
use crate::error::{ChannelError, SerializedError, CODE_INTERNAL};

/// Default relay endpoint.
pub const DEFAULT_RELAY_URL: &str = "https://www.walletlink.org";

const DESTROY_TIMEOUT: Duration = Duration::from_secs(1);

/// Relay connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Base HTTP(S) URL of the relay. The socket connects to `{relay_url}/rpc`.
    pub relay_url: String,
    /// Heartbeat tick interval.
    pub heartbeat_interval: Duration,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Timeout for relay requests (`PublishEvent`, `SetSessionConfig`).
    pub request_timeout: Duration,
    /// Fetch events published while offline after each authentication.
    pub fetch_unseen_events: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
            fetch_unseen_events: true,
        }
    }
}

impl RelayConfig {
    /// WebSocket endpoint for this relay.
    pub fn rpc_url(&self) -> String {
        format!("{}/rpc", self.relay_url.trim_end_matches('/'))
    }
}

/// Receives relay session updates. All methods default to no-ops.
///
/// Called from the supervisor task; implementations should not block.
pub trait RelayListener: Send + Sync {
    /// A wallet joined (or the link state changed).
    fn linked_updated(&self, _linked: bool) {}
    /// The session was (de)authenticated on the relay.
    fn connected_updated(&self, _connected: bool) {}
    /// The wallet switched chains. Always delivered as a pair.
    fn chain_updated(&self, _chain_id: &str, _json_rpc_url: &str) {}
    /// The wallet's account changed.
    fn account_updated(&self, _address: &str) {}
    /// Another metadata field changed (`WalletUsername`, `AppVersion`).
    fn metadata_updated(&self, _key: &str, _value: &str) {}
    /// The wallet answered a request.
    fn web3_response(&self, _id: &str, _response: &serde_json::Value) {}
    /// The session was destroyed by the wallet; local state should be reset.
    fn reset_and_reload(&self) {}
}

enum Command {
    Connect,
    Request {
        message: ClientMessage,
        reply: oneshot::Sender<Result<ServerMessage, ChannelError>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a supervised relay connection.
pub struct RelayConnection {
    session_id: String,
    cipher: RelayCipher,
    request_timeout: Duration,
    next_id: Arc<AtomicU64>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    connected: watch::Receiver<bool>,
    linked: watch::Receiver<bool>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("session_id", &self.session_id)
            .field("state", &*self.state.borrow())
            .field("connected", &*self.connected.borrow())
            .field("linked", &*self.linked.borrow())
            .finish_non_exhaustive()
    }
}

impl RelayConnection {
    /// Create a connection for `session` and spawn its supervisor.
    ///
    /// Nothing is dialed until [`connect`](Self::connect). Must be called
    /// inside a tokio runtime.
    pub fn new(
        session: RelaySession,
        config: RelayConfig,
        connector: Arc<dyn Connector>,
        listener: Arc<dyn RelayListener>,
    ) -> Result<Self, ChannelError> {
        let cipher = RelayCipher::new(session.secret())?;
        let session_id = session.id().to_string();
        let socket = Arc::new(RelaySocket::new(config.rpc_url(), connector));

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (heartbeat_tx, heartbeat_rx) = mpsc::unbounded_channel();
        let (unseen_tx, unseen_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(false);
        let (linked_tx, linked_rx) = watch::channel(session.linked());
        let next_id = Arc::new(AtomicU64::new(1));

        let state = socket.subscribe_state();
        let receivers = Receivers {
            commands: commands_rx,
            state: socket.subscribe_state(),
            frames: socket.subscribe_frames(),
            heartbeat: heartbeat_rx,
            unseen: unseen_rx,
        };

        let supervisor = Supervisor {
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval),
            cipher: cipher.clone(),
            config: config.clone(),
            session_id: session_id.clone(),
            session,
            socket,
            listener: Some(listener),
            heartbeat_tx,
            unseen_tx,
            next_id: Arc::clone(&next_id),
            pending: HashMap::new(),
            last_state: ConnectionState::Disconnected,
            wants_connection: false,
            reconnect_at: None,
            connected_tx,
            linked_tx,
            snapshot: MetadataSnapshot::default(),
        };
        tokio::spawn(supervisor.run(receivers));

        Ok(Self {
            session_id,
            cipher,
            request_timeout: config.request_timeout,
            next_id,
            commands: commands_tx,
            state,
            connected: connected_rx,
            linked: linked_rx,
            destroyed: AtomicBool::new(false),
        })
    }

    /// Start connecting. Reconnects automatically from here on.
    pub fn connect(&self) -> Result<(), ChannelError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ChannelError::Internal(
                "relay connection is destroyed".to_string(),
            ));
        }
        self.commands
            .send(Command::Connect)
            .map_err(|_| ChannelError::Internal("relay connection is destroyed".to_string()))
    }

    /// Session id this connection hosts.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Socket state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to socket state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Whether the session is authenticated on the relay.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Whether a wallet has joined the session.
    pub fn is_linked(&self) -> bool {
        *self.linked.borrow()
    }

    /// Encrypt `data`, wait until a wallet is linked, then publish it as
    /// `event`. Returns the relay's event id.
    pub async fn publish_event(
        &self,
        event: &str,
        data: &serde_json::Value,
        call_webhook: bool,
    ) -> Result<String, ChannelError> {
        self.ensure_alive()?;
        let data = self.cipher.encrypt(&serde_json::to_string(data)?)?;
        let message = ClientMessage::PublishEvent {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            session_id: self.session_id.clone(),
            event: event.to_string(),
            data,
            call_webhook,
        };

        self.wait_until_linked().await?;
        match self.request(message, self.request_timeout).await? {
            ServerMessage::PublishEventOk { event_id, .. } => Ok(event_id),
            ServerMessage::Fail { error, .. } => {
                Err(relay_failure(error, "failed to publish event"))
            }
            other => Err(ChannelError::Protocol(format!(
                "unexpected reply to PublishEvent: {other:?}"
            ))),
        }
    }

    /// Write one encrypted session metadata field.
    pub async fn set_session_metadata(&self, key: &str, value: &str) -> Result<(), ChannelError> {
        self.ensure_alive()?;
        let mut metadata = BTreeMap::new();
        metadata.insert(key.to_string(), self.cipher.encrypt(value)?);
        self.set_session_config(metadata, self.request_timeout).await
    }

    /// Mark the session destroyed on the relay (best effort), then stop
    /// reconnecting, disconnect, and reject every pending request.
    ///
    /// Listeners receive nothing after this returns. Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut metadata = BTreeMap::new();
        metadata.insert(metadata_keys::DESTROYED.to_string(), "1".to_string());
        if let Err(e) = self.set_session_config(metadata, DESTROY_TIMEOUT).await {
            log::debug!("Unable to mark relay session destroyed: {e}");
        }

        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }

    fn ensure_alive(&self) -> Result<(), ChannelError> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(ChannelError::user_rejected())
        } else {
            Ok(())
        }
    }

    async fn wait_until_linked(&self) -> Result<(), ChannelError> {
        let mut linked = self.linked.clone();
        linked
            .wait_for(|linked| *linked)
            .await
            .map(|_| ())
            .map_err(|_| ChannelError::user_rejected())
    }

    async fn set_session_config(
        &self,
        metadata: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<(), ChannelError> {
        let message = ClientMessage::SetSessionConfig {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            session_id: self.session_id.clone(),
            metadata,
        };
        match self.request(message, timeout).await? {
            ServerMessage::Fail { error, .. } => {
                Err(relay_failure(error, "failed to set session config"))
            }
            _ => Ok(()),
        }
    }

    async fn request(
        &self,
        message: ClientMessage,
        timeout: Duration,
    ) -> Result<ServerMessage, ChannelError> {
        let id = message.id();
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Request { message, reply })
            .map_err(|_| ChannelError::user_rejected())?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChannelError::user_rejected()),
            Err(_) => Err(ChannelError::Transport(format!("request {id} timed out"))),
        }
    }
}

fn relay_failure(error: String, fallback: &str) -> ChannelError {
    ChannelError::Rpc(SerializedError {
        code: CODE_INTERNAL,
        message: if error.is_empty() {
            fallback.to_string()
        } else {
            error
        },
        data: None,
    })
}

enum Pending {
    Authentication,
    Caller(oneshot::Sender<Result<ServerMessage, ChannelError>>),
}

/// Last delivered value of each metadata field.
#[derive(Debug, Default)]
struct MetadataSnapshot {
    account: Option<String>,
    fields: HashMap<&'static str, String>,
    chain: Option<(String, String)>,
}

struct Receivers {
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Receiver<ConnectionState>,
    frames: broadcast::Receiver<IncomingFrame>,
    heartbeat: mpsc::UnboundedReceiver<HeartbeatEvent>,
    unseen: mpsc::UnboundedReceiver<ServerMessage>,
}

struct Supervisor {
    config: RelayConfig,
    session: RelaySession,
    session_id: String,
    cipher: RelayCipher,
    socket: Arc<RelaySocket>,
    listener: Option<Arc<dyn RelayListener>>,
    heartbeat: HeartbeatMonitor,
    heartbeat_tx: mpsc::UnboundedSender<HeartbeatEvent>,
    unseen_tx: mpsc::UnboundedSender<ServerMessage>,
    next_id: Arc<AtomicU64>,
    pending: HashMap<u64, Pending>,
    last_state: ConnectionState,
    wants_connection: bool,
    reconnect_at: Option<Instant>,
    connected_tx: watch::Sender<bool>,
    linked_tx: watch::Sender<bool>,
    snapshot: MetadataSnapshot,
}

impl Supervisor {
    async fn run(mut self, mut rx: Receivers) {
        loop {
            let reconnect_at = self.reconnect_at;
            let reconnect = async move {
                match reconnect_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = rx.commands.recv() => match command {
                    Some(Command::Connect) => self.handle_connect(),
                    Some(Command::Request { message, reply }) => {
                        self.handle_request(message, reply).await;
                    }
                    Some(Command::Shutdown { done }) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },

                changed = rx.state.changed() => {
                    if changed.is_err() {
                        self.shutdown().await;
                        return;
                    }
                    let state = *rx.state.borrow_and_update();
                    // Ticks queued by a previous connection are stale.
                    while rx.heartbeat.try_recv().is_ok() {}
                    self.handle_state(state).await;
                }

                frame = rx.frames.recv() => match frame {
                    Ok(IncomingFrame::Heartbeat) => self.heartbeat.record_ack(),
                    Ok(IncomingFrame::Message(message)) => self.handle_message(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Relay supervisor lagged, {skipped} frames dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.shutdown().await;
                        return;
                    }
                },

                Some(event) = rx.heartbeat.recv() => self.handle_heartbeat(event).await,

                Some(message) = rx.unseen.recv() => self.handle_message(message),

                () = reconnect => {
                    self.reconnect_at = None;
                    self.start_connect();
                }
            }
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn notify(&self, f: impl FnOnce(&dyn RelayListener)) {
        if let Some(listener) = &self.listener {
            f(listener.as_ref());
        }
    }

    fn handle_connect(&mut self) {
        if self.wants_connection {
            log::debug!("Relay connect requested while already active");
            return;
        }
        self.wants_connection = true;
        self.start_connect();
    }

    fn start_connect(&self) {
        let socket = Arc::clone(&self.socket);
        tokio::spawn(async move {
            if let Err(e) = socket.connect().await {
                log::debug!("Relay connect attempt failed: {e}");
            }
        });
    }

    fn schedule_reconnect(&mut self) {
        if !self.wants_connection || self.reconnect_at.is_some() {
            return;
        }
        log::info!(
            "Reconnecting to relay in {}ms",
            self.config.reconnect_delay.as_millis()
        );
        self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
    }

    async fn handle_state(&mut self, state: ConnectionState) {
        let previous = std::mem::replace(&mut self.last_state, state);
        log::info!("Relay socket {previous:?} -> {state:?}");

        if previous == ConnectionState::Connected && state != ConnectionState::Connected {
            self.on_disconnected();
        }
        match state {
            ConnectionState::Connected if previous != ConnectionState::Connected => {
                self.on_connected().await;
            }
            ConnectionState::Disconnected => self.schedule_reconnect(),
            _ => {}
        }
    }

    async fn on_connected(&mut self) {
        self.heartbeat.start(self.heartbeat_tx.clone());

        let id = self.next_id();
        self.pending.insert(id, Pending::Authentication);
        let message = ClientMessage::HostSession {
            id,
            session_id: self.session_id.clone(),
            session_key: self.session.key().to_string(),
        };
        if let Err(e) = self.send(&message).await {
            log::warn!("Unable to send HostSession: {e}");
            self.pending.remove(&id);
        }
    }

    fn on_disconnected(&mut self) {
        self.heartbeat.stop();
        self.set_connected(false);
        self.reject_pending(|| ChannelError::Transport("relay connection lost".to_string()));
    }

    async fn send(&self, message: &ClientMessage) -> Result<(), ChannelError> {
        self.socket.send_data(&serde_json::to_string(message)?).await
    }

    async fn handle_request(
        &mut self,
        message: ClientMessage,
        reply: oneshot::Sender<Result<ServerMessage, ChannelError>>,
    ) {
        if self.last_state != ConnectionState::Connected {
            let _ = reply.send(Err(ChannelError::Transport(
                "relay socket is not connected".to_string(),
            )));
            return;
        }

        // Callers that timed out leave closed senders behind.
        self.pending.retain(|_, pending| match pending {
            Pending::Caller(reply) => !reply.is_closed(),
            Pending::Authentication => true,
        });

        let id = message.id();
        match self.send(&message).await {
            Ok(()) => {
                self.pending.insert(id, Pending::Caller(reply));
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    async fn handle_heartbeat(&mut self, event: HeartbeatEvent) {
        match event {
            HeartbeatEvent::Send => {
                if !*self.connected_tx.borrow() {
                    return;
                }
                if let Err(e) = self.socket.send_data(HEARTBEAT_FRAME).await {
                    log::debug!("Heartbeat send failed: {e}");
                }
            }
            HeartbeatEvent::Expired => {
                log::warn!("Relay heartbeat expired, dropping connection");
                self.socket.disconnect().await;
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match &message {
            ServerMessage::IsLinkedOk {
                linked,
                online_guests,
                ..
            } => self.set_linked(*linked || *online_guests > 0),
            ServerMessage::Linked { online_guests, .. } => self.set_linked(*online_guests > 0),
            ServerMessage::GetSessionConfigOk { metadata, .. }
            | ServerMessage::SessionConfigUpdated { metadata, .. } => {
                self.handle_metadata(metadata);
            }
            ServerMessage::Event { event, data, .. } => self.handle_event(event, data),
            _ => {}
        }

        let Some(id) = message.id() else {
            return;
        };
        match self.pending.remove(&id) {
            Some(Pending::Authentication) => self.handle_authentication(&message),
            Some(Pending::Caller(reply)) => {
                let _ = reply.send(Ok(message));
            }
            None => {}
        }
    }

    fn handle_authentication(&mut self, reply: &ServerMessage) {
        if let ServerMessage::Fail { error, .. } = reply {
            log::warn!("Relay rejected session {}: {error}", self.session_id);
            return;
        }

        log::info!("Relay session {} authenticated", self.session_id);
        self.set_connected(true);

        let follow_ups = [
            ClientMessage::IsLinked {
                id: self.next_id(),
                session_id: self.session_id.clone(),
            },
            ClientMessage::GetSessionConfig {
                id: self.next_id(),
                session_id: self.session_id.clone(),
            },
        ];
        let socket = Arc::clone(&self.socket);
        tokio::spawn(async move {
            for message in follow_ups {
                let sent = match serde_json::to_string(&message) {
                    Ok(text) => socket.send_data(&text).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = sent {
                    log::warn!("Unable to query relay session: {e}");
                    break;
                }
            }
        });

        self.fetch_unseen_events();
    }

    fn fetch_unseen_events(&self) {
        if !self.config.fetch_unseen_events {
            return;
        }
        let http = RelayHttp::new(&self.config.relay_url, &self.session_id, self.session.key());
        let http = match http {
            Ok(http) => http,
            Err(e) => {
                log::warn!("Unable to fetch unseen relay events: {e}");
                return;
            }
        };
        let unseen = self.unseen_tx.clone();
        tokio::spawn(async move {
            match http.fetch_unseen_events().await {
                Ok(events) => {
                    for event in events {
                        if unseen.send(event).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => log::warn!("Unable to fetch unseen relay events: {e}"),
            }
        });
    }

    fn set_connected(&mut self, connected: bool) {
        let changed = self.connected_tx.send_if_modified(|current| {
            std::mem::replace(current, connected) != connected
        });
        if changed {
            self.notify(|l| l.connected_updated(connected));
        }
    }

    fn set_linked(&mut self, linked: bool) {
        let changed = self
            .linked_tx
            .send_if_modified(|current| std::mem::replace(current, linked) != linked);
        if !changed {
            return;
        }
        if let Err(e) = self.session.set_linked(linked) {
            log::warn!("Unable to persist relay link state: {e}");
        }
        log::info!("Relay session {} linked: {linked}", self.session_id);
        self.notify(|l| l.linked_updated(linked));
    }

    fn decrypt_field(&self, key: &str, encrypted: &str) -> Option<String> {
        match self.cipher.decrypt(encrypted) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Dropping undecryptable metadata field {key}: {e}");
                None
            }
        }
    }

    fn handle_metadata(&mut self, metadata: &BTreeMap<String, String>) {
        if metadata.get(metadata_keys::DESTROYED).map(String::as_str) == Some("1") {
            log::info!("Relay session {} destroyed by peer", self.session_id);
            self.notify(|l| l.reset_and_reload());
        }

        if let Some(encrypted) = metadata.get(metadata_keys::ETHEREUM_ADDRESS) {
            if let Some(address) = self.decrypt_field(metadata_keys::ETHEREUM_ADDRESS, encrypted) {
                if self.snapshot.account.as_ref() != Some(&address) {
                    self.notify(|l| l.account_updated(&address));
                    self.snapshot.account = Some(address);
                }
            }
        }

        for key in [metadata_keys::WALLET_USERNAME, metadata_keys::APP_VERSION] {
            let Some(encrypted) = metadata.get(key) else {
                continue;
            };
            let Some(value) = self.decrypt_field(key, encrypted) else {
                continue;
            };
            if self.snapshot.fields.get(key) != Some(&value) {
                self.notify(|l| l.metadata_updated(key, &value));
                self.snapshot.fields.insert(key, value);
            }
        }

        if let (Some(chain_id), Some(json_rpc_url)) = (
            metadata.get(metadata_keys::CHAIN_ID),
            metadata.get(metadata_keys::JSON_RPC_URL),
        ) {
            let chain_id = self.decrypt_field(metadata_keys::CHAIN_ID, chain_id);
            let json_rpc_url = self.decrypt_field(metadata_keys::JSON_RPC_URL, json_rpc_url);
            if let (Some(chain_id), Some(json_rpc_url)) = (chain_id, json_rpc_url) {
                let pair = (chain_id, json_rpc_url);
                if self.snapshot.chain.as_ref() != Some(&pair) {
                    self.notify(|l| l.chain_updated(&pair.0, &pair.1));
                    self.snapshot.chain = Some(pair);
                }
            }
        }
    }

    fn handle_event(&self, event: &str, data: &str) {
        if event != WEB3_RESPONSE_EVENT {
            return;
        }
        let decrypted = match self.cipher.decrypt(data) {
            Ok(decrypted) => decrypted,
            Err(e) => {
                log::warn!("Dropping undecryptable {event} event: {e}");
                return;
            }
        };
        match serde_json::from_str::<Web3ResponseBody>(&decrypted) {
            Ok(body) if body.kind == WEB3_RESPONSE_TYPE => {
                self.notify(|l| l.web3_response(&body.id, &body.response));
            }
            Ok(body) => log::debug!("Ignoring {event} event of type {}", body.kind),
            Err(e) => log::warn!("Dropping malformed {event} event: {e}"),
        }
    }

    fn reject_pending(&mut self, error: impl Fn() -> ChannelError) {
        for (_, pending) in self.pending.drain() {
            if let Pending::Caller(reply) = pending {
                let _ = reply.send(Err(error()));
            }
        }
    }

    async fn shutdown(&mut self) {
        self.wants_connection = false;
        self.reconnect_at = None;
        self.listener = None;
        self.heartbeat.stop();
        self.socket.disconnect().await;
        self.set_connected(false);
        self.reject_pending(ChannelError::user_rejected);
        log::info!("Relay connection for session {} destroyed", self.session_id);
    }
}
