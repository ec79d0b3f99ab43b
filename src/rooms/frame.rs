use serde::{Deserialize, Serialize};

use crate::db::{MessageId, UserId};

/// What a client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InboundFrame {
    pub message: String,
}

/// Everything the server pushes down a socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Error {
        message: String,
    },
    Chat {
        message: String,
        user_id: UserId,
        username: String,
        timestamp: String,
        message_id: MessageId,
    },
    Presence {
        user_id: UserId,
        status: bool,
    },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error { message: message.into() }
    }

    pub fn to_json(&self) -> String {
        // a tagged enum of strings, ints and bools cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn wire_shapes() {
        let v: serde_json::Value = serde_json::from_str(&ServerFrame::error("Authentication required").to_json()).unwrap();
        assert_eq!(v, json!({ "type": "error", "message": "Authentication required" }));

        let v: serde_json::Value = serde_json::from_str(
            &ServerFrame::Presence { user_id: 3, status: true }.to_json(),
        )
        .unwrap();
        assert_eq!(v, json!({ "type": "presence", "user_id": 3, "status": true }));

        let v: serde_json::Value = serde_json::from_str(
            &ServerFrame::Chat {
                message: "hi".into(),
                user_id: 3,
                username: "alice".into(),
                timestamp: "2024-01-01T00:00:00Z".into(),
                message_id: 9,
            }
            .to_json(),
        )
        .unwrap();
        assert_eq!(
            v,
            json!({
                "type": "chat",
                "message": "hi",
                "user_id": 3,
                "username": "alice",
                "timestamp": "2024-01-01T00:00:00Z",
                "message_id": 9,
            })
        );
    }

    #[test]
    fn inbound_shape_is_strict() {
        assert!(serde_json::from_str::<InboundFrame>(r#"{"message":"hi"}"#).is_ok());
        assert!(serde_json::from_str::<InboundFrame>(r#"{"msg":"hi"}"#).is_err());
        assert!(serde_json::from_str::<InboundFrame>(r#"{"message":"hi","extra":1}"#).is_err());
        assert!(serde_json::from_str::<InboundFrame>(r#"{"message":5}"#).is_err());
        assert!(serde_json::from_str::<InboundFrame>("[]").is_err());
    }
}
