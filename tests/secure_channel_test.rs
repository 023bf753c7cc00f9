//! End-to-end tests for the encrypted popup channel.
//!
//! A fake wallet window plays the host side: it announces `PopupLoaded`,
//! answers the handshake with its own public key, and decrypts/encrypts
//! every request with the shared secret.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::mpsc;
use url::Url;

use wallet_channel::communicator::window::{PeerWindow, WindowEvent, WindowOpener, WindowState};
use wallet_channel::crypto;
use wallet_channel::error::{SerializedError, CODE_USER_REJECTED};
use wallet_channel::key_agreement::PublicKey;
use wallet_channel::message::{
    ClientConfigEvent, ConfigEvent, Content, HostConfigEvent, RpcRequest, RpcResponse, RpcResult,
};
use wallet_channel::{
    ChannelError, KeyAgreement, MemoryStorage, Message, ScopedStorage, SecureChannel, Storage,
    WindowCommunicator,
};

const KEYS_URL: &str = "https://keys.example.com/connect";
const ORIGIN: &str = "https://keys.example.com";

fn key_agreement(storage: &Arc<dyn Storage>, scope: &str) -> KeyAgreement {
    KeyAgreement::new(ScopedStorage::new(
        scope,
        Some("KeyAgreement"),
        Arc::clone(storage),
    ))
}

/// Wallet side of the protocol.
struct Wallet {
    keys: Mutex<KeyAgreement>,
    events: mpsc::UnboundedSender<WindowEvent>,
    hellos: AtomicUsize,
    closed: AtomicBool,
}

impl Wallet {
    fn emit(&self, message: Message) {
        let _ = self.events.send(WindowEvent {
            origin: ORIGIN.to_string(),
            data: serde_json::to_value(&message).unwrap(),
        });
    }

    fn reply_encrypted(&self, request: &Message, body: &RpcResponse) {
        let mut keys = self.keys.lock().unwrap();
        let secret = keys.get_shared_secret().unwrap().unwrap();
        let sender = keys.get_own_public_key().unwrap().to_hex().unwrap();
        drop(keys);
        let encrypted = crypto::encrypt_content(body, &secret).unwrap();
        self.emit(
            Message::response_to(request.id, Content::Encrypted(encrypted)).with_sender(sender),
        );
    }

    fn handle(&self, message: &Message) {
        match &message.content {
            Content::Config(ConfigEvent::Client(ClientConfigEvent::ClientHello(_))) => {
                self.hellos.fetch_add(1, Ordering::SeqCst);
            }
            Content::Handshake(payload) => {
                let peer = PublicKey::from_hex(message.sender.as_deref().unwrap()).unwrap();
                self.keys.lock().unwrap().set_peer_public_key(peer).unwrap();
                let body = RpcResponse {
                    result: RpcResult::Value(json!({
                        "method": payload.method,
                        "accounts": ["0x0000000000000000000000000000000000000001"]
                    })),
                    data: Some(json!({"chains": {"1": "https://rpc.one"}})),
                };
                self.reply_encrypted(message, &body);
            }
            Content::Encrypted(data) => {
                let secret = self.keys.lock().unwrap().get_shared_secret().unwrap().unwrap();
                let request: RpcRequest = crypto::decrypt_content(data, &secret).unwrap();
                if request.method == "personal_sign" {
                    self.emit(Message::response_to(
                        message.id,
                        Content::Failure(SerializedError {
                            code: CODE_USER_REJECTED,
                            message: "User denied message signature.".into(),
                            data: None,
                        }),
                    ));
                    return;
                }
                let body = RpcResponse {
                    result: RpcResult::Value(json!({
                        "method": request.method,
                        "chainId": request.chain_id
                    })),
                    data: None,
                };
                self.reply_encrypted(message, &body);
            }
            other => panic!("wallet got unexpected {} content", other.kind()),
        }
    }
}

struct WalletWindow(Arc<Wallet>);

impl PeerWindow for WalletWindow {
    fn post_message(&self, message: &Message, target_origin: &str) -> Result<(), ChannelError> {
        assert_eq!(target_origin, ORIGIN);
        self.0.handle(message);
        Ok(())
    }

    fn focus(&self) {}

    fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }
}

struct WalletOpener {
    wallet: Arc<Wallet>,
    opens: AtomicUsize,
}

impl WindowOpener for WalletOpener {
    fn open(&self, url: &Url) -> Result<Box<dyn PeerWindow>, ChannelError> {
        assert_eq!(url.as_str(), KEYS_URL);
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.wallet.closed.store(false, Ordering::SeqCst);
        self.wallet.emit(Message::new(Content::Config(ConfigEvent::Host(
            HostConfigEvent::PopupLoaded,
        ))));
        Ok(Box::new(WalletWindow(Arc::clone(&self.wallet))))
    }
}

struct Setup {
    channel: SecureChannel,
    communicator: Arc<WindowCommunicator>,
    opener: Arc<WalletOpener>,
    dapp_storage: Arc<dyn Storage>,
}

fn setup() -> Setup {
    let wallet_storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let dapp_storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let wallet = Arc::new(Wallet {
        keys: Mutex::new(key_agreement(&wallet_storage, "wallet")),
        events: events_tx,
        hellos: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
    });
    let opener = Arc::new(WalletOpener {
        wallet,
        opens: AtomicUsize::new(0),
    });

    let communicator = Arc::new(WindowCommunicator::new(
        Url::parse(KEYS_URL).unwrap(),
        Arc::clone(&opener) as Arc<dyn WindowOpener>,
    ));
    communicator.listen(events_rx);

    let channel = SecureChannel::new(
        Arc::clone(&communicator) as Arc<dyn wallet_channel::RequestTransport>,
        key_agreement(&dapp_storage, "dapp"),
    );

    Setup {
        channel,
        communicator,
        opener,
        dapp_storage,
    }
}

#[tokio::test]
async fn test_handshake_then_encrypted_requests() {
    let s = setup();
    assert!(!s.channel.is_established().unwrap());

    let accounts = s
        .channel
        .handshake("eth_requestAccounts", json!([]))
        .await
        .unwrap();
    assert_eq!(accounts["method"], "eth_requestAccounts");
    assert!(s.channel.is_established().unwrap());
    assert_eq!(s.communicator.state(), WindowState::Ready);
    assert_eq!(s.opener.wallet.hellos.load(Ordering::SeqCst), 1);

    let result = s
        .channel
        .request(&RpcRequest {
            method: "eth_chainId".into(),
            params: json!([]),
            chain_id: Some(8453),
        })
        .await
        .unwrap();
    assert_eq!(result, json!({"method": "eth_chainId", "chainId": 8453}));

    // Both requests went through one window.
    assert_eq!(s.opener.opens.load(Ordering::SeqCst), 1);
    assert_eq!(s.communicator.pending_count(), 0);
}

#[tokio::test]
async fn test_concurrent_requests_resolve_independently() {
    let s = setup();
    s.channel
        .handshake("eth_requestAccounts", json!([]))
        .await
        .unwrap();

    let chain_id = RpcRequest {
        method: "eth_chainId".into(),
        params: json!([]),
        chain_id: Some(1),
    };
    let accounts = RpcRequest {
        method: "eth_accounts".into(),
        params: json!([]),
        chain_id: Some(10),
    };
    let (a, b) = tokio::join!(s.channel.request(&chain_id), s.channel.request(&accounts));

    assert_eq!(a.unwrap()["method"], "eth_chainId");
    assert_eq!(b.unwrap()["chainId"], 10);
}

#[tokio::test]
async fn test_wallet_rejection_surfaces_as_user_rejected() {
    let s = setup();
    s.channel
        .handshake("eth_requestAccounts", json!([]))
        .await
        .unwrap();

    let err = s
        .channel
        .request(&RpcRequest {
            method: "personal_sign".into(),
            params: json!(["0x68656c6c6f", "0x01"]),
            chain_id: None,
        })
        .await
        .unwrap_err();
    assert!(err.is_user_rejection());
}

#[tokio::test]
async fn test_request_before_handshake_is_internal_error() {
    let s = setup();
    let err = s
        .channel
        .request(&RpcRequest {
            method: "eth_chainId".into(),
            params: json!([]),
            chain_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::Internal(_)));
    assert_eq!(s.opener.opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reset_forgets_keys_and_closes_window() {
    let s = setup();
    s.channel
        .handshake("eth_requestAccounts", json!([]))
        .await
        .unwrap();
    let before = s
        .dapp_storage
        .get("-dapp:KeyAgreement:ownPublicKey")
        .unwrap()
        .unwrap();

    s.channel.reset().unwrap();

    assert!(!s.channel.is_established().unwrap());
    assert_eq!(s.communicator.state(), WindowState::Closed);
    assert!(s.opener.wallet.closed.load(Ordering::SeqCst));
    let after = s
        .dapp_storage
        .get("-dapp:KeyAgreement:ownPublicKey")
        .unwrap()
        .unwrap();
    assert_ne!(before, after);

    // A new handshake reopens the window and re-derives the secret.
    s.channel
        .handshake("eth_requestAccounts", json!([]))
        .await
        .unwrap();
    assert_eq!(s.opener.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_keys_survive_a_new_channel_over_the_same_storage() {
    let s = setup();
    s.channel
        .handshake("eth_requestAccounts", json!([]))
        .await
        .unwrap();

    let mut restored = key_agreement(&s.dapp_storage, "dapp");
    let mut original = key_agreement(&s.dapp_storage, "dapp");
    assert_eq!(
        restored.get_own_public_key().unwrap(),
        original.get_own_public_key().unwrap()
    );
    assert!(restored.get_shared_secret().unwrap().is_some());
}
