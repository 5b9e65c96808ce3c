//! Wire format for relay frames
//!
//! Every frame is a JSON text message `{"event": "...", "data": {...}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::chat::messages::Message;

/// Events a client may send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Authenticate {
        token: String,
    },
    SendMessage {
        recipient_id: String,
        content: String,
        reply_to: Option<String>,
    },
    Typing {
        recipient_id: String,
    },
    StopTyping {
        recipient_id: String,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct AuthenticateData {
    token: String,
}

#[derive(Deserialize)]
struct SendMessageData {
    #[serde(alias = "recipientId")]
    recipient_id: String,
    content: String,
    #[serde(default, alias = "replyTo")]
    reply_to: Option<String>,
}

#[derive(Deserialize)]
struct TypingData {
    #[serde(alias = "recipientId")]
    recipient_id: String,
}

/// Decode one inbound text frame.
///
/// Unknown event names and malformed payloads yield `None`.
pub fn parse_client_frame(text: &str) -> Option<ClientEvent> {
    let frame: RawFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "[Relay] Undecodable frame");
            return None;
        }
    };

    let event = match frame.event.as_str() {
        "authenticate" => serde_json::from_value::<AuthenticateData>(frame.data)
            .map(|d| ClientEvent::Authenticate { token: d.token }),
        "send-message" => {
            serde_json::from_value::<SendMessageData>(frame.data).map(|d| ClientEvent::SendMessage {
                recipient_id: d.recipient_id,
                content: d.content,
                reply_to: d.reply_to,
            })
        }
        "typing" => serde_json::from_value::<TypingData>(frame.data).map(|d| ClientEvent::Typing {
            recipient_id: d.recipient_id,
        }),
        "stop-typing" => serde_json::from_value::<TypingData>(frame.data)
            .map(|d| ClientEvent::StopTyping {
                recipient_id: d.recipient_id,
            }),
        other => {
            debug!(event = %other, "[Relay] Ignoring unknown event");
            return None;
        }
    };

    event
        .inspect_err(|e| debug!(event = %frame.event, error = %e, "[Relay] Bad payload"))
        .ok()
}

/// Events the server pushes to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full replacement of the online set
    OnlineUsers(Vec<String>),
    ReceiveMessage(Message),
    MessageSent(Message),
    MessageError {
        message: String,
    },
    UserTyping {
        user_id: String,
        username: String,
    },
    UserStopTyping {
        user_id: String,
    },
    ConnectError {
        reason: String,
    },
}

impl ServerEvent {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_events() {
        assert_eq!(
            parse_client_frame(r#"{"event":"send-message","data":{"recipient_id":"r","content":"hi"}}"#),
            Some(ClientEvent::SendMessage {
                recipient_id: "r".into(),
                content: "hi".into(),
                reply_to: None,
            })
        );
        assert_eq!(
            parse_client_frame(r#"{"event":"typing","data":{"recipientId":"r"}}"#),
            Some(ClientEvent::Typing {
                recipient_id: "r".into()
            })
        );
        assert_eq!(
            parse_client_frame(r#"{"event":"authenticate","data":{"token":"t"}}"#),
            Some(ClientEvent::Authenticate { token: "t".into() })
        );
    }

    #[test]
    fn test_unknown_or_malformed_frames_are_ignored() {
        assert_eq!(parse_client_frame(r#"{"event":"join-room","data":{}}"#), None);
        assert_eq!(parse_client_frame(r#"{"event":"typing","data":{}}"#), None);
        assert_eq!(parse_client_frame("not json"), None);
    }

    #[test]
    fn test_server_event_shape() {
        let frame = ServerEvent::OnlineUsers(vec!["a".into(), "b".into()])
            .to_frame()
            .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"event": "online-users", "data": ["a", "b"]}));

        let frame = ServerEvent::UserTyping {
            user_id: "u".into(),
            username: "alice".into(),
        }
        .to_frame()
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"event": "user-typing", "data": {"user_id": "u", "username": "alice"}})
        );
    }
}
