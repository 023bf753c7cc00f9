//! Error taxonomy shared by every channel variant.
//!
//! Popup and native channels reject the specific pending request with one of
//! these errors. The relay channel mostly absorbs errors into its reconnect
//! loop and only surfaces them from explicit requests.
//!
//! Every variant maps onto an EIP-1193 / JSON-RPC style numeric code so it can
//! travel over the wire inside a `failure` message (see [`SerializedError`]).

use serde::{Deserialize, Serialize};

/// EIP-1193 "user rejected request".
pub const CODE_USER_REJECTED: i64 = 4001;
/// JSON-RPC "invalid request".
pub const CODE_INVALID_REQUEST: i64 = -32600;
/// JSON-RPC "internal error".
pub const CODE_INTERNAL: i64 = -32603;

/// Errors that can occur on a popup, native, or relay channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The user closed or cancelled the window/view, or the channel was torn down.
    UserRejected(String),
    /// Decryption failed: wrong key, tampered ciphertext, or malformed key material.
    Authentication(String),
    /// Socket error, close, or a failed window/view launch.
    Transport(String),
    /// Malformed message shape or missing required field.
    Protocol(String),
    /// Invariant violation (reused request id, second concurrent connect, ...).
    Internal(String),
    /// Persisting or loading channel state failed.
    Storage(String),
    /// Failure reported by the peer.
    Rpc(SerializedError),
}

impl ChannelError {
    /// The uniform rejection used when a window closes or a channel is torn down.
    #[must_use]
    pub fn user_rejected() -> Self {
        Self::UserRejected("User rejected the request.".to_string())
    }

    /// Numeric code for this error.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::UserRejected(_) => CODE_USER_REJECTED,
            Self::Protocol(_) => CODE_INVALID_REQUEST,
            Self::Authentication(_) | Self::Transport(_) | Self::Internal(_) | Self::Storage(_) => {
                CODE_INTERNAL
            }
            Self::Rpc(err) => err.code,
        }
    }

    /// Whether the error means the user declined (as opposed to a fault).
    #[must_use]
    pub fn is_user_rejection(&self) -> bool {
        self.code() == CODE_USER_REJECTED
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserRejected(msg) => write!(f, "User rejected: {msg}"),
            Self::Authentication(msg) => write!(f, "Authentication failed: {msg}"),
            Self::Transport(msg) => write!(f, "Transport failure: {msg}"),
            Self::Protocol(msg) => write!(f, "Protocol violation: {msg}"),
            Self::Internal(msg) => write!(f, "Internal error: {msg}"),
            Self::Storage(msg) => write!(f, "Storage error: {msg}"),
            Self::Rpc(err) => write!(f, "Peer error {}: {}", err.code, err.message),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Wire form of an error, carried in the `failure` content of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<&ChannelError> for SerializedError {
    fn from(err: &ChannelError) -> Self {
        match err {
            ChannelError::Rpc(inner) => inner.clone(),
            other => Self {
                code: other.code(),
                message: other.to_string(),
                data: None,
            },
        }
    }
}

impl From<SerializedError> for ChannelError {
    fn from(err: SerializedError) -> Self {
        if err.code == CODE_USER_REJECTED {
            Self::UserRejected(err.message)
        } else {
            Self::Rpc(err)
        }
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("invalid JSON: {err}"))
    }
}
