//! Wire frames of the relay protocol.
//!
//! Frames are JSON objects tagged by `type`, or the single-character
//! heartbeat `"h"`. Client requests carry a numeric `id` that the server
//! echoes in its reply.
//!
//! # Message Types
//!
//! - [`ClientMessage`] - application → relay requests
//! - [`ServerMessage`] - relay → application replies and pushes
//! - [`IncomingFrame`] - a parsed inbound frame (heartbeat or message)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Heartbeat frame, sent and echoed verbatim.
pub const HEARTBEAT_FRAME: &str = "h";

/// Event name of wallet responses published to the session.
pub const WEB3_RESPONSE_EVENT: &str = "Web3Response";
/// Event name of application requests published to the session.
pub const WEB3_REQUEST_EVENT: &str = "Web3Request";
/// `type` of a decrypted Web3 response body.
pub const WEB3_RESPONSE_TYPE: &str = "WEB3_RESPONSE";

/// Session metadata field names.
pub mod metadata_keys {
    /// Set to `"1"` when the session has been destroyed on either side.
    pub const DESTROYED: &str = "__destroyed";
    /// Linked wallet address.
    pub const ETHEREUM_ADDRESS: &str = "EthereumAddress";
    /// Wallet user's display name.
    pub const WALLET_USERNAME: &str = "WalletUsername";
    /// Wallet app version.
    pub const APP_VERSION: &str = "AppVersion";
    /// Active chain id. Paired with [`JSON_RPC_URL`].
    pub const CHAIN_ID: &str = "ChainId";
    /// RPC endpoint for the active chain. Paired with [`CHAIN_ID`].
    pub const JSON_RPC_URL: &str = "JsonRpcUrl";
}

/// Request sent to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Authenticate as the host of a session.
    HostSession {
        /// Request id used to correlate the reply.
        id: u64,
        /// Relay session id.
        session_id: String,
        /// Proof of the session secret.
        session_key: String,
    },
    /// Ask whether a wallet has joined the session.
    IsLinked {
        /// Request id used to correlate the reply.
        id: u64,
        /// Relay session id.
        session_id: String,
    },
    /// Fetch the session metadata.
    GetSessionConfig {
        /// Request id used to correlate the reply.
        id: u64,
        /// Relay session id.
        session_id: String,
    },
    /// Write session metadata fields (values encrypted).
    SetSessionConfig {
        /// Request id used to correlate the reply.
        id: u64,
        /// Relay session id.
        session_id: String,
        /// Session metadata, values encrypted.
        metadata: BTreeMap<String, String>,
    },
    /// Publish an encrypted event to the session.
    PublishEvent {
        /// Request id used to correlate the reply.
        id: u64,
        /// Relay session id.
        session_id: String,
        /// Event name.
        event: String,
        /// Encrypted event payload.
        data: String,
        /// Whether the relay should notify the wallet out of band.
        call_webhook: bool,
    },
}

impl ClientMessage {
    /// Request id echoed by the server's reply.
    pub fn id(&self) -> u64 {
        match self {
            Self::HostSession { id, .. }
            | Self::IsLinked { id, .. }
            | Self::GetSessionConfig { id, .. }
            | Self::SetSessionConfig { id, .. }
            | Self::PublishEvent { id, .. } => *id,
        }
    }
}

/// Reply or push from the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Generic success.
    #[serde(rename = "OK")]
    Ok {
        /// Request id used to correlate the reply.
        #[serde(default)]
        id: Option<u64>,
        /// Relay session id.
        #[serde(default)]
        session_id: String,
    },
    /// Generic failure.
    Fail {
        /// Request id used to correlate the reply.
        #[serde(default)]
        id: Option<u64>,
        /// Relay session id.
        #[serde(default)]
        session_id: String,
        /// Server error message.
        error: String,
    },
    /// Reply to `IsLinked`.
    #[serde(rename = "IsLinkedOK")]
    IsLinkedOk {
        /// Request id used to correlate the reply.
        #[serde(default)]
        id: Option<u64>,
        /// Relay session id.
        #[serde(default)]
        session_id: String,
        /// Whether a wallet has ever joined.
        linked: bool,
        /// Wallets currently connected.
        #[serde(default)]
        online_guests: u32,
    },
    /// Pushed when a wallet joins.
    Linked {
        /// Request id used to correlate the reply.
        #[serde(default)]
        id: Option<u64>,
        /// Relay session id.
        #[serde(default)]
        session_id: String,
        /// Wallets currently connected.
        #[serde(default)]
        online_guests: u32,
    },
    /// Reply to `GetSessionConfig`.
    #[serde(rename = "GetSessionConfigOK")]
    GetSessionConfigOk {
        /// Request id used to correlate the reply.
        #[serde(default)]
        id: Option<u64>,
        /// Relay session id.
        #[serde(default)]
        session_id: String,
        /// Session metadata, values encrypted.
        #[serde(default)]
        metadata: BTreeMap<String, String>,
    },
    /// Pushed when the wallet changes session metadata.
    SessionConfigUpdated {
        /// Relay session id.
        #[serde(default)]
        session_id: String,
        /// Session metadata, values encrypted.
        #[serde(default)]
        metadata: BTreeMap<String, String>,
    },
    /// Reply to `PublishEvent`.
    #[serde(rename = "PublishEventOK")]
    PublishEventOk {
        /// Request id used to correlate the reply.
        #[serde(default)]
        id: Option<u64>,
        /// Relay session id.
        #[serde(default)]
        session_id: String,
        /// Server-assigned event id.
        event_id: String,
    },
    /// An event published by the wallet.
    Event {
        /// Relay session id.
        #[serde(default)]
        session_id: String,
        /// Server-assigned event id.
        event_id: String,
        /// Event name.
        event: String,
        /// Encrypted event payload.
        data: String,
    },
    /// Any other frame type.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Id of the request this answers, if any.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Ok { id, .. }
            | Self::Fail { id, .. }
            | Self::IsLinkedOk { id, .. }
            | Self::Linked { id, .. }
            | Self::GetSessionConfigOk { id, .. }
            | Self::PublishEventOk { id, .. } => *id,
            Self::SessionConfigUpdated { .. } | Self::Event { .. } | Self::Unknown => None,
        }
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingFrame {
    /// Heartbeat acknowledgment (`"h"` or any non-JSON frame).
    Heartbeat,
    /// Structured frame.
    Message(ServerMessage),
}

impl IncomingFrame {
    /// Parse a text frame. JSON that does not match any known shape is dropped.
    pub fn parse(text: &str) -> Option<Self> {
        if text == HEARTBEAT_FRAME {
            return Some(Self::Heartbeat);
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
            return Some(Self::Heartbeat);
        };
        match serde_json::from_value(value) {
            Ok(message) => Some(Self::Message(message)),
            Err(e) => {
                log::debug!("Dropping malformed relay frame: {e}");
                None
            }
        }
    }
}

/// Decrypted body of a `Web3Response` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Web3ResponseBody {
    /// Always [`WEB3_RESPONSE_TYPE`] for responses.
    #[serde(rename = "type")]
    pub kind: String,
    /// Id of the request being answered.
    pub id: String,
    /// Response payload.
    #[serde(default)]
    pub response: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_host_session_wire_shape() {
        let msg = ClientMessage::HostSession {
            id: 1,
            session_id: "abc".into(),
            session_key: "def".into(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "HostSession", "id": 1, "sessionId": "abc", "sessionKey": "def"})
        );
    }

    #[test]
    fn test_publish_event_wire_shape() {
        let msg = ClientMessage::PublishEvent {
            id: 7,
            session_id: "abc".into(),
            event: WEB3_REQUEST_EVENT.into(),
            data: "00ff".into(),
            call_webhook: true,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "PublishEvent");
        assert_eq!(value["callWebhook"], true);
        assert_eq!(msg.id(), 7);
    }

    #[test]
    fn test_heartbeat_and_non_json_frames() {
        assert_eq!(IncomingFrame::parse("h"), Some(IncomingFrame::Heartbeat));
        assert_eq!(IncomingFrame::parse("pong?"), Some(IncomingFrame::Heartbeat));
    }

    #[test]
    fn test_server_frames_parse() {
        let frame = IncomingFrame::parse(
            r#"{"type":"IsLinkedOK","id":2,"sessionId":"abc","linked":false,"onlineGuests":1}"#,
        );
        assert_eq!(
            frame,
            Some(IncomingFrame::Message(ServerMessage::IsLinkedOk {
                id: Some(2),
                session_id: "abc".into(),
                linked: false,
                online_guests: 1,
            }))
        );

        let frame = IncomingFrame::parse(concat!(
            r#"{"type":"SessionConfigUpdated","sessionId":"abc","webhookId":"w","#,
            r#""metadata":{"ChainId":"00"}}"#,
        ));
        match frame {
            Some(IncomingFrame::Message(ServerMessage::SessionConfigUpdated { metadata, .. })) => {
                assert_eq!(metadata.get("ChainId").map(String::as_str), Some("00"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_kept_and_bad_shape_dropped() {
        assert_eq!(
            IncomingFrame::parse(r#"{"type":"ChainUpdate","chainId":"1"}"#),
            Some(IncomingFrame::Message(ServerMessage::Unknown))
        );
        assert_eq!(IncomingFrame::parse(r#"{"type":"Fail","id":1}"#), None);
    }

    #[test]
    fn test_reply_ids() {
        let ok: ServerMessage =
            serde_json::from_value(json!({"type": "OK", "id": 3, "sessionId": "s"})).unwrap();
        assert_eq!(ok.id(), Some(3));
        let linked: ServerMessage =
            serde_json::from_value(json!({"type": "Linked", "sessionId": "s", "onlineGuests": 1}))
                .unwrap();
        assert_eq!(linked.id(), None);
    }
}
