//! Popup window transport.
//!
//! The communicator owns at most one peer window at a time. Inbound events
//! are delivered through [`WindowCommunicator::dispatch`] (or a stream pumped
//! by [`WindowCommunicator::listen`]) and discarded unless their origin exactly
//! matches the origin of the configured URL.
//!
//! # Lifecycle
//!
//! ```text
//! Idle/Closed ──open──► Opening ──► AwaitingHandshake ──PopupLoaded──► Ready
//!                                          │                             │
//!                                          └──── PopupUnload/disconnect ─┴──► Closed
//! ```
//!
//! On `PopupLoaded` the communicator answers with a [`ClientHello`] that
//! references the loaded message's id, then releases everyone waiting for
//! readiness. Teardown rejects every waiter and pending request with the
//! uniform user-rejection error.

use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use super::RequestTransport;
use crate::error::ChannelError;
use crate::message::{
    AppMetadata, ClientConfigEvent, ClientHello, ConfigEvent, Content, HostConfigEvent, Message,
    Preference, PROTOCOL_VERSION,
};

/// Handle to an open peer window.
pub trait PeerWindow: Send + Sync {
    /// Deliver `message` to the window, addressed to `target_origin`.
    fn post_message(&self, message: &Message, target_origin: &str) -> Result<(), ChannelError>;
    /// Bring the window to the front.
    fn focus(&self);
    /// Close the window.
    fn close(&self);
    /// Whether the user (or anything else) has closed the window.
    fn is_closed(&self) -> bool;
}

/// Platform primitive that opens peer windows.
pub trait WindowOpener: Send + Sync {
    /// Open a window at `url`. Fails with [`ChannelError::Transport`] when blocked.
    fn open(&self, url: &Url) -> Result<Box<dyn PeerWindow>, ChannelError>;
}

/// An inbound cross-document message.
#[derive(Debug, Clone)]
pub struct WindowEvent {
    /// Origin of the sending document.
    pub origin: String,
    /// Raw message payload.
    pub data: serde_json::Value,
}

/// Lifecycle state of a [`WindowCommunicator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// Nothing opened yet.
    Idle,
    /// Window open call in progress.
    Opening,
    /// Window open, waiting for `PopupLoaded`.
    AwaitingHandshake,
    /// Handshake done, requests may be posted.
    Ready,
    /// Torn down. The next request opens a new window.
    Closed,
}

type ReadyWaiter = oneshot::Sender<Result<(), ChannelError>>;
type ResponseSender = oneshot::Sender<Result<Message, ChannelError>>;

struct Inner {
    state: WindowState,
    /// Bumped on every open so a stale open result can be recognized.
    generation: u64,
    window: Option<Box<dyn PeerWindow>>,
    ready_waiters: Vec<ReadyWaiter>,
    pending: HashMap<Uuid, ResponseSender>,
    /// Every request id ever posted, so reuse is caught even after the first
    /// response. Grows by one UUID per request for the communicator's life.
    used_ids: HashSet<Uuid>,
}

impl Inner {
    fn take_teardown(&mut self) -> Teardown {
        self.state = WindowState::Closed;
        Teardown {
            window: self.window.take(),
            ready_waiters: mem::take(&mut self.ready_waiters),
            pending: mem::take(&mut self.pending),
        }
    }
}

/// Everything a teardown must reject, taken out of the lock first.
struct Teardown {
    window: Option<Box<dyn PeerWindow>>,
    ready_waiters: Vec<ReadyWaiter>,
    pending: HashMap<Uuid, ResponseSender>,
}

impl Teardown {
    fn reject(self, err: &ChannelError) {
        for waiter in self.ready_waiters {
            let _ = waiter.send(Err(err.clone()));
        }
        for (_, sender) in self.pending {
            let _ = sender.send(Err(err.clone()));
        }
        if let Some(window) = self.window {
            if !window.is_closed() {
                window.close();
            }
        }
    }
}

enum ReadyStep {
    Done,
    Wait(oneshot::Receiver<Result<(), ChannelError>>),
    Open(u64),
}

/// Popup-window request/response transport.
pub struct WindowCommunicator {
    url: Url,
    origin: String,
    opener: Arc<dyn WindowOpener>,
    metadata: AppMetadata,
    preference: Preference,
    location: String,
    host_events: Option<mpsc::UnboundedSender<HostConfigEvent>>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for WindowCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowCommunicator")
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl WindowCommunicator {
    /// Create a communicator for the wallet page at `url`.
    pub fn new(url: Url, opener: Arc<dyn WindowOpener>) -> Self {
        let origin = url.origin().ascii_serialization();
        Self {
            url,
            origin,
            opener,
            metadata: AppMetadata::default(),
            preference: Preference::default(),
            location: String::new(),
            host_events: None,
            inner: Mutex::new(Inner {
                state: WindowState::Idle,
                generation: 0,
                window: None,
                ready_waiters: Vec::new(),
                pending: HashMap::new(),
                used_ids: HashSet::new(),
            }),
        }
    }

    /// Application identity announced in the client hello.
    #[must_use]
    pub fn with_metadata(mut self, metadata: AppMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Capability preference announced in the client hello.
    #[must_use]
    pub fn with_preference(mut self, preference: Preference) -> Self {
        self.preference = preference;
        self
    }

    /// Caller location announced in the client hello.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Receive host config events other than `PopupLoaded`/`PopupUnload`.
    #[must_use]
    pub fn with_host_events(mut self, tx: mpsc::UnboundedSender<HostConfigEvent>) -> Self {
        self.host_events = Some(tx);
        self
    }

    /// The wallet page URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The only origin inbound events are accepted from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WindowState {
        self.lock().state
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("window communicator lock poisoned")
    }

    /// Open (or refocus) the window and wait until the handshake completes.
    pub async fn wait_for_ready(&self) -> Result<(), ChannelError> {
        let (step, stale) = {
            let mut inner = self.lock();

            let mut stale = None;
            let window_gone = inner.window.as_ref().is_some_and(|w| w.is_closed());
            if window_gone
                && matches!(
                    inner.state,
                    WindowState::AwaitingHandshake | WindowState::Ready
                )
            {
                log::info!("Popup for {} was closed without notice", self.origin);
                stale = Some(inner.take_teardown());
            }

            let step = match inner.state {
                WindowState::Ready => {
                    if let Some(window) = &inner.window {
                        log::debug!("Refocusing popup for {}", self.origin);
                        window.focus();
                    }
                    ReadyStep::Done
                }
                WindowState::Opening | WindowState::AwaitingHandshake => {
                    if let Some(window) = &inner.window {
                        window.focus();
                    }
                    let (tx, rx) = oneshot::channel();
                    inner.ready_waiters.push(tx);
                    ReadyStep::Wait(rx)
                }
                WindowState::Idle | WindowState::Closed => {
                    inner.state = WindowState::Opening;
                    inner.generation += 1;
                    ReadyStep::Open(inner.generation)
                }
            };
            (step, stale)
        };

        if let Some(stale) = stale {
            stale.reject(&ChannelError::user_rejected());
        }

        match step {
            ReadyStep::Done => Ok(()),
            ReadyStep::Wait(rx) => rx.await.unwrap_or_else(|_| Err(ChannelError::user_rejected())),
            ReadyStep::Open(generation) => self.open_window(generation).await,
        }
    }

    async fn open_window(&self, generation: u64) -> Result<(), ChannelError> {
        let window = match self.opener.open(&self.url) {
            Ok(window) => window,
            Err(err) => {
                log::warn!("Failed to open popup for {}: {err}", self.origin);
                let teardown = {
                    let mut inner = self.lock();
                    (inner.generation == generation).then(|| inner.take_teardown())
                };
                if let Some(teardown) = teardown {
                    teardown.reject(&err);
                }
                return Err(err);
            }
        };

        let waiting = {
            let mut inner = self.lock();
            if inner.state == WindowState::Opening && inner.generation == generation {
                log::debug!("Opened popup for {}", self.origin);
                inner.window = Some(window);
                inner.state = WindowState::AwaitingHandshake;
                let (tx, rx) = oneshot::channel();
                inner.ready_waiters.push(tx);
                Ok(rx)
            } else {
                Err(window)
            }
        };

        match waiting {
            Ok(rx) => rx.await.unwrap_or_else(|_| Err(ChannelError::user_rejected())),
            Err(window) => {
                window.close();
                Err(ChannelError::user_rejected())
            }
        }
    }

    /// Post a message once the window is ready.
    pub async fn post_message(&self, message: Message) -> Result<(), ChannelError> {
        self.wait_for_ready().await?;
        let inner = self.lock();
        match (inner.state, inner.window.as_ref()) {
            (WindowState::Ready, Some(window)) => window.post_message(&message, &self.origin),
            _ => Err(ChannelError::user_rejected()),
        }
    }

    /// Post `request` and wait for the response bearing its id as `requestId`.
    pub async fn post_request_and_wait_for_response(
        &self,
        request: Message,
    ) -> Result<Message, ChannelError> {
        if !self.lock().used_ids.insert(request.id) {
            return Err(ChannelError::Internal(format!(
                "request id {} was already used",
                request.id
            )));
        }

        self.wait_for_ready().await?;

        let rx = {
            let mut inner = self.lock();
            if inner.state != WindowState::Ready || inner.window.is_none() {
                return Err(ChannelError::user_rejected());
            }

            let (tx, rx) = oneshot::channel();
            inner.pending.insert(request.id, tx);
            let posted = match inner.window.as_ref() {
                Some(window) => window.post_message(&request, &self.origin),
                None => Err(ChannelError::user_rejected()),
            };
            if let Err(err) = posted {
                inner.pending.remove(&request.id);
                return Err(err);
            }
            rx
        };

        rx.await.unwrap_or_else(|_| Err(ChannelError::user_rejected()))
    }

    /// Handle one inbound event.
    pub fn dispatch(&self, event: WindowEvent) {
        if event.origin != self.origin {
            log::debug!("Discarding message from unexpected origin {}", event.origin);
            return;
        }

        let message: Message = match serde_json::from_value(event.data) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Discarding malformed message from {}: {e}", self.origin);
                return;
            }
        };

        match message.config_event() {
            Some(ConfigEvent::Host(HostConfigEvent::PopupLoaded)) => {
                self.handle_popup_loaded(&message);
            }
            Some(ConfigEvent::Host(HostConfigEvent::PopupUnload)) => {
                log::info!("Popup for {} unloaded", self.origin);
                self.disconnect();
            }
            Some(ConfigEvent::Host(other)) => self.forward_host_event(other.clone()),
            _ => self.resolve_pending(message),
        }
    }

    /// Pump `events` into [`dispatch`](Self::dispatch) until the stream ends
    /// or the communicator is dropped.
    pub fn listen(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<WindowEvent>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(this) = weak.upgrade() else {
                    break;
                };
                this.dispatch(event);
            }
        })
    }

    /// Close the window and reject everything pending with a user rejection.
    pub fn disconnect(&self) {
        let teardown = self.lock().take_teardown();
        log::info!(
            "Popup channel to {} closed ({} pending rejected)",
            self.origin,
            teardown.pending.len()
        );
        teardown.reject(&ChannelError::user_rejected());
    }

    fn client_hello(&self) -> ClientHello {
        ClientHello {
            version: PROTOCOL_VERSION.to_string(),
            metadata: self.metadata.clone(),
            preference: self.preference.clone(),
            location: self.location.clone(),
        }
    }

    fn handle_popup_loaded(&self, loaded: &Message) {
        let hello = Message::response_to(
            loaded.id,
            Content::Config(ConfigEvent::Client(ClientConfigEvent::ClientHello(
                self.client_hello(),
            ))),
        );

        let (waiters, failure) = {
            let mut inner = self.lock();
            if inner.state != WindowState::AwaitingHandshake {
                log::debug!("Ignoring PopupLoaded in state {:?}", inner.state);
                return;
            }
            let posted = match inner.window.as_ref() {
                Some(window) => window.post_message(&hello, &self.origin),
                None => return,
            };
            match posted {
                Ok(()) => {
                    inner.state = WindowState::Ready;
                    (mem::take(&mut inner.ready_waiters), None)
                }
                Err(err) => (Vec::new(), Some((inner.take_teardown(), err))),
            }
        };

        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
        if let Some((teardown, err)) = failure {
            log::warn!("Failed to send client hello to {}: {err}", self.origin);
            teardown.reject(&err);
        }
    }

    fn forward_host_event(&self, event: HostConfigEvent) {
        if let Some(tx) = &self.host_events {
            let _ = tx.send(event);
        }
    }

    fn resolve_pending(&self, message: Message) {
        let Some(request_id) = message.request_id else {
            log::debug!("Ignoring uncorrelated {} message", message.content.kind());
            return;
        };
        let sender = self.lock().pending.remove(&request_id);
        match sender {
            Some(sender) => {
                let _ = sender.send(Ok(message));
            }
            None => log::debug!("No pending request for response {request_id}"),
        }
    }
}

#[async_trait]
impl RequestTransport for WindowCommunicator {
    async fn post_request_and_wait_for_response(
        &self,
        request: Message,
    ) -> Result<Message, ChannelError> {
        WindowCommunicator::post_request_and_wait_for_response(self, request).await
    }

    fn disconnect(&self) {
        WindowCommunicator::disconnect(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HandshakePayload;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const WALLET_URL: &str = "https://keys.example.com/connect";
    const WALLET_ORIGIN: &str = "https://keys.example.com";

    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        focuses: AtomicUsize,
        closes: AtomicUsize,
    }

    struct MockWindow {
        counters: Arc<Counters>,
        closed: Arc<AtomicBool>,
        outbox: mpsc::UnboundedSender<Message>,
    }

    impl PeerWindow for MockWindow {
        fn post_message(&self, message: &Message, target_origin: &str) -> Result<(), ChannelError> {
            assert_eq!(target_origin, WALLET_ORIGIN);
            self.outbox
                .send(message.clone())
                .map_err(|_| ChannelError::Transport("outbox closed".into()))
        }
        fn focus(&self) {
            self.counters.focuses.fetch_add(1, Ordering::SeqCst);
        }
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct MockOpener {
        counters: Arc<Counters>,
        closed: Arc<AtomicBool>,
        outbox: mpsc::UnboundedSender<Message>,
        blocked: bool,
    }

    impl WindowOpener for MockOpener {
        fn open(&self, _url: &Url) -> Result<Box<dyn PeerWindow>, ChannelError> {
            if self.blocked {
                return Err(ChannelError::Transport("popup blocked".into()));
            }
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            self.closed.store(false, Ordering::SeqCst);
            Ok(Box::new(MockWindow {
                counters: Arc::clone(&self.counters),
                closed: Arc::clone(&self.closed),
                outbox: self.outbox.clone(),
            }))
        }
    }

    struct Harness {
        comm: Arc<WindowCommunicator>,
        counters: Arc<Counters>,
        closed: Arc<AtomicBool>,
        outbox: mpsc::UnboundedReceiver<Message>,
    }

    fn harness(blocked: bool) -> Harness {
        let counters = Arc::new(Counters::default());
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();
        let opener = Arc::new(MockOpener {
            counters: Arc::clone(&counters),
            closed: Arc::clone(&closed),
            outbox: tx,
            blocked,
        });
        let comm = WindowCommunicator::new(Url::parse(WALLET_URL).unwrap(), opener)
            .with_location("https://dapp.example/");
        Harness {
            comm: Arc::new(comm),
            counters,
            closed,
            outbox: rx,
        }
    }

    fn from_wallet(message: &Message) -> WindowEvent {
        WindowEvent {
            origin: WALLET_ORIGIN.to_string(),
            data: serde_json::to_value(message).unwrap(),
        }
    }

    fn host(event: HostConfigEvent) -> Message {
        Message::new(Content::Config(ConfigEvent::Host(event)))
    }

    fn request() -> Message {
        Message::new(Content::Handshake(HandshakePayload {
            method: "eth_requestAccounts".into(),
            params: serde_json::Value::Null,
        }))
    }

    async fn until_state(comm: &WindowCommunicator, state: WindowState) {
        while comm.state() != state {
            tokio::task::yield_now().await;
        }
    }

    async fn until_pending(comm: &WindowCommunicator, count: usize) {
        while comm.pending_count() != count {
            tokio::task::yield_now().await;
        }
    }

    /// Drive the handshake and return the client hello the communicator sent.
    async fn make_ready(h: &mut Harness) -> Message {
        let comm = Arc::clone(&h.comm);
        let waiting = tokio::spawn(async move { comm.wait_for_ready().await });
        until_state(&h.comm, WindowState::AwaitingHandshake).await;

        let loaded = host(HostConfigEvent::PopupLoaded);
        h.comm.dispatch(from_wallet(&loaded));
        waiting.await.unwrap().unwrap();

        let hello = h.outbox.recv().await.unwrap();
        assert_eq!(hello.request_id, Some(loaded.id));
        hello
    }

    #[tokio::test]
    async fn test_handshake_sends_client_hello() {
        let mut h = harness(false);
        let hello = make_ready(&mut h).await;

        assert_eq!(h.comm.state(), WindowState::Ready);
        match hello.config_event() {
            Some(ConfigEvent::Client(ClientConfigEvent::ClientHello(hello))) => {
                assert_eq!(hello.version, PROTOCOL_VERSION);
                assert_eq!(hello.location, "https://dapp.example/");
            }
            other => panic!("expected client hello, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_wait_reuses_and_focuses_window() {
        let mut h = harness(false);
        make_ready(&mut h).await;
        h.comm.wait_for_ready().await.unwrap();

        assert_eq!(h.counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(h.counters.focuses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_foreign_origin_is_ignored() {
        let h = harness(false);
        let comm = Arc::clone(&h.comm);
        let _waiting = tokio::spawn(async move { comm.wait_for_ready().await });
        until_state(&h.comm, WindowState::AwaitingHandshake).await;

        let loaded = host(HostConfigEvent::PopupLoaded);
        h.comm.dispatch(WindowEvent {
            origin: "https://evil.example".into(),
            data: serde_json::to_value(&loaded).unwrap(),
        });
        h.comm.dispatch(WindowEvent {
            origin: WALLET_ORIGIN.into(),
            data: serde_json::json!({"not": "a message"}),
        });

        assert_eq!(h.comm.state(), WindowState::AwaitingHandshake);
    }

    #[tokio::test]
    async fn test_responses_resolve_by_request_id() {
        let mut h = harness(false);
        make_ready(&mut h).await;

        let first = request();
        let second = request();
        let (first_id, second_id) = (first.id, second.id);

        let comm = Arc::clone(&h.comm);
        let first_task =
            tokio::spawn(async move { comm.post_request_and_wait_for_response(first).await });
        let comm = Arc::clone(&h.comm);
        let second_task =
            tokio::spawn(async move { comm.post_request_and_wait_for_response(second).await });
        until_pending(&h.comm, 2).await;

        let second_reply = Message::response_to(second_id, request().content);
        let first_reply = Message::response_to(first_id, request().content);
        h.comm.dispatch(from_wallet(&second_reply));
        h.comm.dispatch(from_wallet(&first_reply));

        assert_eq!(second_task.await.unwrap().unwrap().id, second_reply.id);
        assert_eq!(first_task.await.unwrap().unwrap().id, first_reply.id);
        assert_eq!(h.comm.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unload_rejects_every_pending_request() {
        let mut h = harness(false);
        make_ready(&mut h).await;

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let comm = Arc::clone(&h.comm);
            let req = request();
            tasks.push(tokio::spawn(async move {
                comm.post_request_and_wait_for_response(req).await
            }));
        }
        until_pending(&h.comm, 3).await;

        h.comm.dispatch(from_wallet(&host(HostConfigEvent::PopupUnload)));

        for task in tasks {
            assert_eq!(task.await.unwrap(), Err(ChannelError::user_rejected()));
        }
        assert_eq!(h.comm.pending_count(), 0);
        assert_eq!(h.comm.state(), WindowState::Closed);
        assert_eq!(h.counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reused_request_id_is_rejected() {
        let mut h = harness(false);
        make_ready(&mut h).await;

        let req = request();
        let duplicate = req.clone();
        let comm = Arc::clone(&h.comm);
        let _first =
            tokio::spawn(async move { comm.post_request_and_wait_for_response(req).await });
        until_pending(&h.comm, 1).await;

        let err = h
            .comm
            .post_request_and_wait_for_response(duplicate)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Internal(_)));
    }

    #[tokio::test]
    async fn test_request_id_stays_used_after_its_response() {
        let mut h = harness(false);
        make_ready(&mut h).await;

        let req = request();
        let duplicate = req.clone();
        let comm = Arc::clone(&h.comm);
        let first =
            tokio::spawn(async move { comm.post_request_and_wait_for_response(req).await });
        until_pending(&h.comm, 1).await;
        h.comm.dispatch(from_wallet(&Message::response_to(duplicate.id, request().content)));
        first.await.unwrap().unwrap();
        assert_eq!(h.comm.pending_count(), 0);

        let err = h
            .comm
            .post_request_and_wait_for_response(duplicate)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Internal(_)));
        assert_eq!(h.comm.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_blocked_popup_is_transport_error() {
        let h = harness(true);
        let err = h.comm.wait_for_ready().await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
        assert_eq!(h.comm.state(), WindowState::Closed);
    }

    #[tokio::test]
    async fn test_reopens_after_user_closes_window() {
        let mut h = harness(false);
        make_ready(&mut h).await;
        h.closed.store(true, Ordering::SeqCst);

        let comm = Arc::clone(&h.comm);
        let _waiting = tokio::spawn(async move { comm.wait_for_ready().await });
        until_state(&h.comm, WindowState::AwaitingHandshake).await;

        assert_eq!(h.counters.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disconnect_releases_ready_waiters() {
        let h = harness(false);
        let comm = Arc::clone(&h.comm);
        let waiting = tokio::spawn(async move { comm.wait_for_ready().await });
        until_state(&h.comm, WindowState::AwaitingHandshake).await;

        h.comm.disconnect();
        assert_eq!(waiting.await.unwrap(), Err(ChannelError::user_rejected()));
    }

    #[tokio::test]
    async fn test_other_host_events_are_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let h = harness(false);
        let opener = Arc::new(MockOpener {
            counters: Arc::clone(&h.counters),
            closed: Arc::clone(&h.closed),
            outbox: mpsc::unbounded_channel().0,
            blocked: false,
        });
        let comm = WindowCommunicator::new(Url::parse(WALLET_URL).unwrap(), opener)
            .with_host_events(tx);

        comm.dispatch(from_wallet(&host(HostConfigEvent::ConnectionTypeSelected(
            "scw".into(),
        ))));
        assert_eq!(
            rx.recv().await,
            Some(HostConfigEvent::ConnectionTypeSelected("scw".into()))
        );
    }

    #[tokio::test]
    async fn test_listen_pumps_events() {
        let mut h = harness(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _pump = h.comm.listen(events_rx);

        let comm = Arc::clone(&h.comm);
        let waiting = tokio::spawn(async move { comm.wait_for_ready().await });
        until_state(&h.comm, WindowState::AwaitingHandshake).await;

        events_tx
            .send(from_wallet(&host(HostConfigEvent::PopupLoaded)))
            .unwrap();
        waiting.await.unwrap().unwrap();
        assert!(h.outbox.recv().await.is_some());
    }
}
