//! JSON frames of the live channel.
//!
//! Every frame is `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::store::{PrivateMessage, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage {
        content: String,
        #[serde(default)]
        receiver_id: Option<UserId>,
    },
    SendPrivateMessage {
        receiver_id: UserId,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UserJoined { username: String },
    UserLeft { username: String },
    OnlineUsers(Vec<String>),
    NewMessage(NewMessage),
    PrivateMessage(PrivateMessageEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub receiver_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateMessageEvent {
    #[serde(flatten)]
    pub message: PrivateMessage,
    pub sender_username: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn room_send_without_receiver() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "send_message",
            "data": { "content": "hi" }
        }))
        .unwrap();
        assert_eq!(event, ClientEvent::SendMessage { content: "hi".into(), receiver_id: None });

        let event: ClientEvent = serde_json::from_value(json!({
            "event": "send_message",
            "data": { "content": "hi", "receiver_id": null }
        }))
        .unwrap();
        assert_eq!(event, ClientEvent::SendMessage { content: "hi".into(), receiver_id: None });
    }

    #[test]
    fn private_send() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "send_private_message",
            "data": { "receiver_id": 4, "content": "psst" }
        }))
        .unwrap();
        assert_eq!(event, ClientEvent::SendPrivateMessage { receiver_id: 4, content: "psst".into() });
    }

    #[test]
    fn unknown_events_do_not_parse() {
        let parsed = serde_json::from_value::<ClientEvent>(json!({ "event": "typing", "data": {} }));
        assert!(parsed.is_err());
    }

    #[test]
    fn presence_frames() {
        let joined = serde_json::to_value(ServerEvent::UserJoined { username: "alice".into() }).unwrap();
        assert_eq!(joined, json!({ "event": "user_joined", "data": { "username": "alice" } }));

        let online = serde_json::to_value(ServerEvent::OnlineUsers(vec!["alice".into(), "bob".into()])).unwrap();
        assert_eq!(online, json!({ "event": "online_users", "data": ["alice", "bob"] }));
    }

    #[test]
    fn private_message_frame_is_flat() {
        let event = ServerEvent::PrivateMessage(PrivateMessageEvent {
            message: PrivateMessage {
                id: 9,
                sender_id: 1,
                receiver_id: 2,
                content: "secret".into(),
                timestamp: OffsetDateTime::UNIX_EPOCH,
                is_read: false,
            },
            sender_username: "alice".into(),
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "private_message",
                "data": {
                    "id": 9,
                    "sender_id": 1,
                    "receiver_id": 2,
                    "content": "secret",
                    "timestamp": "1970-01-01T00:00:00Z",
                    "is_read": false,
                    "sender_username": "alice"
                }
            })
        );
        assert_eq!(serde_json::from_value::<ServerEvent>(value).unwrap(), event);
    }
}
