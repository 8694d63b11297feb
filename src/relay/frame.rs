use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Frames a client sends. `Connect` is the only one accepted before authentication.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Connect { token: String },
    Subscribe { destination: String },
    Unsubscribe { destination: String },
    Send { destination: String, body: String },
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected {
        user_id: i64,
    },
    Message {
        destination: String,
        sender_id: i64,
        /// Set when the destination is a room and the message was stored.
        message_id: Option<i64>,
        body: String,
        #[serde(with = "time::serde::rfc3339")]
        sent_at: OffsetDateTime,
    },
    Error {
        reason: String,
        retryable: bool,
        /// Set when the frame's message reached history despite the error.
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<i64>,
    },
}

impl ServerFrame {
    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Where a frame goes. Routing keys are dotted: `room.<id>` or `topic.<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Room(i64),
    Topic(String),
}

impl Destination {
    pub fn parse(raw: &str) -> Option<Destination> {
        let (namespace, rest) = raw.split_once('.')?;
        match namespace {
            "room" => rest.parse().ok().filter(|id: &i64| *id > 0).map(Destination::Room),
            "topic" if is_topic_name(rest) => Some(Destination::Topic(rest.to_owned())),
            _ => None,
        }
    }

    pub fn routing_key(&self) -> String {
        self.to_string()
    }
}

fn is_topic_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            !part.is_empty()
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Destination::Room(id) => write!(f, "room.{id}"),
            Destination::Topic(name) => write!(f, "topic.{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_parse() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"connect","token":"t"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Connect { token: "t".into() });

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"send","destination":"room.7","body":"hi"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Send { destination: "room.7".into(), body: "hi".into() });

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"disconnect"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Disconnect);

        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"shout"}"#).is_err());
    }

    #[test]
    fn destinations() {
        assert_eq!(Destination::parse("room.7"), Some(Destination::Room(7)));
        assert_eq!(
            Destination::parse("topic.lobby.news"),
            Some(Destination::Topic("lobby.news".into()))
        );
        assert_eq!(Destination::parse("room.0"), None);
        assert_eq!(Destination::parse("room.x"), None);
        assert_eq!(Destination::parse("topic."), None);
        assert_eq!(Destination::parse("topic.a..b"), None);
        assert_eq!(Destination::parse("queue.7"), None);
        assert_eq!(Destination::parse("room"), None);

        assert_eq!(Destination::Room(7).routing_key(), "room.7");
    }

    #[test]
    fn server_frames_are_tagged() {
        let text = ServerFrame::Connected { user_id: 4 }.to_text().unwrap();
        assert_eq!(text, r#"{"type":"connected","user_id":4}"#);

        let frame = ServerFrame::Error { reason: "x".into(), retryable: true, message_id: None };
        assert_eq!(frame.to_text().unwrap(), r#"{"type":"error","reason":"x","retryable":true}"#);

        let frame =
            ServerFrame::Error { reason: "x".into(), retryable: false, message_id: Some(3) };
        assert_eq!(
            frame.to_text().unwrap(),
            r#"{"type":"error","reason":"x","retryable":false,"message_id":3}"#
        );
    }
}
