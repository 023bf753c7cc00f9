//! Message envelope shared by the popup and native channels.
//!
//! Every frame is a [`Message`]: an id, an optional `requestId` correlating a
//! response with its request, an optional `sender` (the sender's public key on
//! the encrypted channel), a timestamp, and exactly one [`Content`] variant.
//!
//! # Wire shape
//!
//! ```text
//! {
//!   "id": "6f0c...",
//!   "requestId": "1a2b...",            // responses only
//!   "sender": "3059301306...",         // SPKI hex, encrypted channel only
//!   "content": { "encrypted": { "iv": "...", "cipherText": "..." } },
//!   "timestamp": "2026-01-01T00:00:00Z"
//! }
//! ```
//!
//! `content` is externally tagged: `handshake`, `encrypted`, `config`, or
//! `failure`. Config events are tagged by `event`, with an optional `value`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::EncryptedData;
use crate::error::{ChannelError, SerializedError};

/// Protocol version announced in the client hello.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A single frame on a popup or native channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique id of this message.
    pub id: Uuid,
    /// Id of the request this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    /// Sender identity (hex SPKI public key on the encrypted channel).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Payload.
    pub content: Content,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// A new message with a fresh id.
    #[must_use]
    pub fn new(content: Content) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id: None,
            sender: None,
            content,
            timestamp: Utc::now(),
        }
    }

    /// A new message answering `request_id`.
    #[must_use]
    pub fn response_to(request_id: Uuid, content: Content) -> Self {
        Self {
            request_id: Some(request_id),
            ..Self::new(content)
        }
    }

    /// Attach a sender identity.
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// The config event carried by this message, if any.
    #[must_use]
    pub fn config_event(&self) -> Option<&ConfigEvent> {
        match &self.content {
            Content::Config(event) => Some(event),
            _ => None,
        }
    }

    /// Turn a `failure` response into an error, passing any other content through.
    pub fn into_result(self) -> Result<Self, ChannelError> {
        match self.content {
            Content::Failure(err) => Err(err.into()),
            _ => Ok(self),
        }
    }
}

/// Payload of a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Content {
    /// Initial, unencrypted request that carries the sender's public key.
    Handshake(HandshakePayload),
    /// AES-GCM encrypted [`RpcRequest`] or [`RpcResponse`].
    Encrypted(EncryptedData),
    /// Lifecycle event.
    Config(ConfigEvent),
    /// Error reported by the peer.
    Failure(SerializedError),
}

impl Content {
    /// Short name of the variant, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::Encrypted(_) => "encrypted",
            Self::Config(_) => "config",
            Self::Failure(_) => "failure",
        }
    }
}

/// The handshake request, sent in the clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakePayload {
    /// RPC method that triggered the handshake (usually `eth_requestAccounts`).
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Lifecycle events exchanged outside the encrypted layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigEvent {
    /// Sent by the wallet window.
    Host(HostConfigEvent),
    /// Sent by the application.
    Client(ClientConfigEvent),
}

/// Events the wallet window emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "value")]
pub enum HostConfigEvent {
    /// The window finished loading and is listening.
    PopupLoaded,
    /// The window is closing.
    PopupUnload,
    /// The window is ready for the next request.
    PopupReadyForRequest,
    /// The user picked a connection type.
    ConnectionTypeSelected(String),
}

/// Events the application emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "value")]
pub enum ClientConfigEvent {
    /// Announces the application's origin.
    DappOrigin(String),
    /// Announces the protocol version.
    Version(String),
    /// Metadata frame sent in reply to `PopupLoaded`.
    ClientHello(ClientHello),
}

/// Metadata the application sends once the window has loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHello {
    /// Protocol version.
    pub version: String,
    /// Caller identity.
    pub metadata: AppMetadata,
    /// Declared capability configuration.
    pub preference: Preference,
    /// The caller's current URL, shown by the wallet for anti-phishing.
    pub location: String,
}

/// Caller-declared application identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMetadata {
    /// Display name.
    pub app_name: String,
    /// Logo shown by the wallet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_logo_url: Option<String>,
    /// Chains the application supports.
    #[serde(default)]
    pub app_chain_ids: Vec<u64>,
}

/// Declared capability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    /// Which wallet kinds the application accepts (`all`, `smartWalletOnly`, `eoaOnly`).
    pub options: String,
}

impl Default for Preference {
    fn default() -> Self {
        Self {
            options: "all".to_string(),
        }
    }
}

/// Decrypted request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    /// RPC method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Chain the request targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

/// Decrypted response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Outcome of the call.
    pub result: RpcResult,
    /// Side-channel data the wallet attaches (available chains, capabilities).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// `{"value": ...}` on success, `{"error": {...}}` on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RpcResult {
    /// Success.
    Value(serde_json::Value),
    /// Failure.
    Error(SerializedError),
}

impl RpcResponse {
    /// The call's value, or its error as a [`ChannelError`].
    pub fn into_value(self) -> Result<serde_json::Value, ChannelError> {
        match self.result {
            RpcResult::Value(value) => Ok(value),
            RpcResult::Error(err) => Err(err.into()),
        }
    }
}
