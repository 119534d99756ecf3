//! Real-time event and topic types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messages::model::Message;
use crate::pool::model::PhoneNumber;

/// A named channel that connections subscribe to.
///
/// `user:<id>` carries everything addressed to one user; `number:<uuid>`
/// carries a single number's traffic regardless of who (if anyone) holds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    User(String),
    Number(Uuid),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::User(id) => write!(f, "user:{id}"),
            Topic::Number(id) => write!(f, "number:{id}"),
        }
    }
}

impl std::str::FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("user", id)) if !id.is_empty() => Ok(Topic::User(id.to_string())),
            Some(("number", id)) => Uuid::parse_str(id)
                .map(Topic::Number)
                .map_err(|_| format!("invalid number topic: {s}")),
            _ => Err(format!("unknown topic: {s}")),
        }
    }
}

/// Server-to-client event, serialized as a tagged JSON frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Sent once after a successful authenticated connect.
    ConnectionAck {
        user_id: String,
        timestamp: DateTime<Utc>,
    },
    NewMessage {
        message: Message,
    },
    NumberStatusChange {
        number: PhoneNumber,
    },
    SystemBroadcast {
        message: String,
        level: String,
    },
    JoinedTopic {
        topic: String,
    },
    LeftTopic {
        topic: String,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

/// Client-to-server frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    JoinTopic { topic: String },
    LeaveTopic { topic: String },
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_round_trips() {
        let user: Topic = "user:42".parse().unwrap();
        assert_eq!(user, Topic::User("42".into()));
        assert_eq!(user.to_string(), "user:42");

        let id = Uuid::new_v4();
        let number: Topic = format!("number:{id}").parse().unwrap();
        assert_eq!(number, Topic::Number(id));
    }

    #[test]
    fn invalid_topics_are_rejected() {
        assert!("".parse::<Topic>().is_err());
        assert!("user:".parse::<Topic>().is_err());
        assert!("number:not-a-uuid".parse::<Topic>().is_err());
        assert!("room:7".parse::<Topic>().is_err());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::JoinedTopic {
            topic: "user:42".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "joined_topic");
        assert_eq!(json["topic"], "user:42");
    }

    #[test]
    fn client_frames_deserialize() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"join_topic","topic":"user:42"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::JoinTopic { .. }));

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Ping));
    }
}
