//! Wire protocol: JSON frames exchanged over the multiplexed WebSocket.
//!
//! Outbound frames: `{"command": <subscribe|unsubscribe|message>,
//! "identifier": <string>, "data"?: <string>}`. `data`, when present, is
//! itself a JSON-encoded string — double-encoded on purpose, so the server
//! can treat it as an opaque blob it doesn't need to parse to route.
//!
//! Inbound frames: `{"type"?: <welcome|disconnect|ping|confirm_subscription|
//! reject_subscription>, "identifier"?, "message"?, "reason"?, "reconnect"?}`.
//! A frame with no recognized `type` is an application payload addressed to
//! `identifier`, carrying `message`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifier::Identifier;

/// The three commands a client can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Subscribe,
    Unsubscribe,
    Message,
}

impl Command {
    fn as_str(self) -> &'static str {
        match self {
            Command::Subscribe => "subscribe",
            Command::Unsubscribe => "unsubscribe",
            Command::Message => "message",
        }
    }
}

/// A frame sent from client to server.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingFrame {
    pub command: &'static str,
    pub identifier: Identifier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl OutgoingFrame {
    pub fn subscribe(identifier: Identifier) -> Self {
        Self {
            command: Command::Subscribe.as_str(),
            identifier,
            data: None,
        }
    }

    pub fn unsubscribe(identifier: Identifier) -> Self {
        Self {
            command: Command::Unsubscribe.as_str(),
            identifier,
            data: None,
        }
    }

    /// A `message` command. `data` is encoded to a JSON string here — the
    /// outer frame's `data` field is the *string*, not the raw value, per
    /// the wire format's intentional double-encoding.
    pub fn message(identifier: Identifier, data: &Value) -> Self {
        Self {
            command: Command::Message.as_str(),
            identifier,
            data: Some(serde_json::to_string(data).unwrap_or_default()),
        }
    }
}

impl std::fmt::Display for OutgoingFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "<serialization error>"),
        }
    }
}

/// A raw inbound frame, before dispatch on `type`.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingFrame {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub identifier: Option<Identifier>,
    pub message: Option<Value>,
    pub reason: Option<String>,
    #[serde(default)]
    pub reconnect: bool,
}

/// Dispatch target for a recognized inbound `type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Welcome,
    Disconnect,
    Ping,
    ConfirmSubscription,
    RejectSubscription,
    /// No recognized `type` — an application payload for `identifier`.
    Application,
}

impl IncomingFrame {
    pub fn kind(&self) -> FrameKind {
        match self.kind.as_deref() {
            Some("welcome") => FrameKind::Welcome,
            Some("disconnect") => FrameKind::Disconnect,
            Some("ping") => FrameKind::Ping,
            Some("confirm_subscription") => FrameKind::ConfirmSubscription,
            Some("reject_subscription") => FrameKind::RejectSubscription,
            _ => FrameKind::Application,
        }
    }
}

/// Informational reasons a server may give for a `disconnect` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Unauthorized,
    InvalidRequest,
    ServerRestart,
    Other,
}

impl From<&str> for DisconnectReason {
    fn from(s: &str) -> Self {
        match s {
            "unauthorized" => DisconnectReason::Unauthorized,
            "invalid_request" => DisconnectReason::InvalidRequest,
            "server_restart" => DisconnectReason::ServerRestart,
            _ => DisconnectReason::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_frame_serializes_without_data() {
        let frame = OutgoingFrame::subscribe(r#"{"channel":"Room"}"#.to_string());
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["command"], "subscribe");
        assert!(parsed.get("data").is_none());
    }

    #[test]
    fn message_frame_double_encodes_data() {
        let frame = OutgoingFrame::message(
            r#"{"channel":"Room"}"#.to_string(),
            &json!({"action": "speak", "body": "hi"}),
        );
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        // `data` is itself a JSON string, not a nested object.
        assert!(parsed["data"].is_string());
        let inner: Value = serde_json::from_str(parsed["data"].as_str().unwrap()).unwrap();
        assert_eq!(inner["action"], "speak");
    }

    #[test]
    fn welcome_frame_kind() {
        let frame: IncomingFrame = serde_json::from_str(r#"{"type": "welcome"}"#).unwrap();
        assert_eq!(frame.kind(), FrameKind::Welcome);
    }

    #[test]
    fn untyped_frame_is_application_payload() {
        let frame: IncomingFrame =
            serde_json::from_str(r#"{"identifier": "{\"channel\":\"Room\"}", "message": {"a": 1}}"#)
                .unwrap();
        assert_eq!(frame.kind(), FrameKind::Application);
        assert_eq!(frame.identifier.as_deref(), Some(r#"{"channel":"Room"}"#));
    }

    #[test]
    fn disconnect_frame_reconnect_defaults_false() {
        let frame: IncomingFrame = serde_json::from_str(r#"{"type": "disconnect"}"#).unwrap();
        assert!(!frame.reconnect);
    }

    #[test]
    fn disconnect_reason_parses_known_values() {
        assert_eq!(DisconnectReason::from("unauthorized"), DisconnectReason::Unauthorized);
        assert_eq!(DisconnectReason::from("server_restart"), DisconnectReason::ServerRestart);
        assert_eq!(DisconnectReason::from("something_else"), DisconnectReason::Other);
    }
}
