//! Relay - legacy session channel over a WebSocket relay server.
//!
//! The dapp hosts a session on the relay; a wallet joins it out-of-band (for
//! example by scanning a QR code carrying the session id and secret). All
//! metadata and event payloads are encrypted with the session secret, so the
//! relay only ever sees the session id and ciphertext.
//!
//! # Architecture
//!
//! ```text
//! RelayConnection ──commands──► supervisor task ──► RelaySocket ◄──WebSocket──► relay
//!        ▲                         │    ▲
//!        │ watch (state, linked)   │    └── HeartbeatEvent ── HeartbeatMonitor
//!        └─────────────────────────┘
//!                                  └──► RelayListener callbacks
//! ```
//!
//! # Modules
//!
//! - [`socket`] - one connection, state and frame streams
//! - [`heartbeat`] - liveness timer
//! - [`connection`] - reconnecting supervisor and public handle
//! - [`session`] - persisted `{id, secret}` identity
//! - [`protocol`] - wire frames
//! - [`http`] - unseen-event fetch

pub mod connection;
pub mod heartbeat;
pub mod http;
pub mod protocol;
pub mod session;
pub mod socket;

pub use connection::{RelayConfig, RelayConnection, RelayListener, DEFAULT_RELAY_URL};
pub use heartbeat::{HeartbeatEvent, HeartbeatMonitor};
pub use session::RelaySession;
pub use socket::{ChannelConnector, ConnectionState, Connector, RelaySocket, WebSocketConnector};
