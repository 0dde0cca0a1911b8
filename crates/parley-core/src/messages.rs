//! Wire frames for the gateway realtime protocol.
//!
//! Frames are JSON objects with a `type` discriminator, sent as WebSocket
//! text messages. Client frames drive the connection state machine; server
//! frames carry acks, chat traffic, and moderation notices.

use serde::{Deserialize, Serialize};

/// Maximum accepted chat message content length, in characters.
pub const MAX_MESSAGE_LEN: usize = 1000;

/// Maximum size of a single encoded frame (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    System,
    Join,
    Leave,
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::Text
    }
}

/// A chat message as stored in the gateway's history and relayed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// A live user as reported in `user_list` and `user_joined` frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub is_guest: bool,
    /// Milliseconds since the Unix epoch.
    pub joined_at: u64,
}

/// Frames sent by chat clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Authenticate the connection. Without a token the user joins as a
    /// guest; without a username the gateway assigns one.
    Auth {
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        username: Option<String>,
        device_id: String,
    },
    /// Send a chat message to the room.
    Message {
        content: String,
        #[serde(default)]
        kind: MessageKind,
    },
    TypingStart,
    TypingStop,
}

/// Frames sent by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    AuthSuccess {
        user_id: String,
        username: String,
    },
    /// Typed auth rejection. The connection stays open so the client can
    /// retry until the auth deadline passes.
    AuthError {
        message: String,
    },
    UserList {
        users: Vec<UserSummary>,
    },
    MessageHistory {
        messages: Vec<ChatMessage>,
    },
    Message(ChatMessage),
    UserJoined {
        user: UserSummary,
    },
    UserLeft {
        user_id: String,
        reason: String,
    },
    UserTyping {
        user_id: String,
        typing: bool,
    },
    Warning {
        message: String,
    },
    /// The device was banned; the gateway closes the connection after this.
    Banned {
        reason: String,
        /// Minutes.
        #[serde(rename = "duration")]
        duration_minutes: u64,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_tags() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"auth","username":"alice","deviceId":"device-0001"}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::Auth { token, username, device_id } => {
                assert!(token.is_none());
                assert_eq!(username.as_deref(), Some("alice"));
                assert_eq!(device_id, "device-0001");
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"message","content":"hi"}"#).unwrap();
        match frame {
            ClientFrame::Message { content, kind } => {
                assert_eq!(content, "hi");
                assert_eq!(kind, MessageKind::Text);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn server_frame_roundtrip() {
        let msg = ChatMessage {
            id: "m1".into(),
            sender_id: "u1".into(),
            sender_name: "alice".into(),
            content: "hello".into(),
            kind: MessageKind::Text,
            timestamp: 1_700_000_000_000,
        };
        let encoded = serde_json::to_string(&ServerFrame::Message(msg.clone())).unwrap();
        assert!(encoded.contains(r#""type":"message""#));
        let decoded: ServerFrame = serde_json::from_str(&encoded).unwrap();
        match decoded {
            ServerFrame::Message(m) => assert_eq!(m, msg),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"bogus"}"#).is_err());
    }
}
