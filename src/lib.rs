//! wallet-channel - encrypted channels between a dapp and a wallet.
//!
//! Three transports carry the same request/response protocol:
//!
//! - **Popup** - a wallet window reached through cross-document messaging
//!   ([`communicator::window`])
//! - **Native** - an external browser view driven by URLs
//!   ([`communicator::native`])
//! - **Relay** - a WebSocket relay server with a pre-shared session secret
//!   ([`relay`])
//!
//! # Architecture
//!
//! ```text
//! SecureChannel ── ECDH (KeyAgreement) + AES-GCM (crypto)
//!       │
//!       ▼
//! RequestTransport ── WindowCommunicator | NativeCommunicator
//!
//! RelayConnection ── RelaySocket + HeartbeatMonitor + RelaySession
//! ```
//!
//! # Modules
//!
//! - [`error`] - error taxonomy shared by every channel
//! - [`storage`] - scoped key-value persistence
//! - [`crypto`] - AES-256-GCM payload and relay ciphers
//! - [`key_agreement`] - P-256 ECDH key pair and shared secret
//! - [`message`] - message envelope and content kinds
//! - [`communicator`] - popup and native transports, registry
//! - [`secure`] - handshake and encrypted RPC over any transport
//! - [`relay`] - relay socket, heartbeat and reconnecting supervisor
//! - [`config`] - configuration loading/saving

pub mod communicator;
pub mod config;
pub mod crypto;
pub mod error;
pub mod key_agreement;
pub mod message;
pub mod relay;
pub mod secure;
pub mod storage;
pub mod ws;

// Re-export commonly used types
pub use communicator::native::NativeCommunicator;
pub use communicator::registry::CommunicatorRegistry;
pub use communicator::window::WindowCommunicator;
pub use communicator::RequestTransport;
pub use config::Config;
pub use error::ChannelError;
pub use key_agreement::KeyAgreement;
pub use message::{Content, Message};
pub use relay::{RelayConnection, RelayListener, RelaySession};
pub use secure::SecureChannel;
pub use storage::{FileStorage, MemoryStorage, ScopedStorage, Storage};
