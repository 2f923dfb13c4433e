//! Client/server frames exchanged over the WebSocket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound frames. `{type, payload}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    ChatMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    StartTask {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    },
    Ping,
    Pong,
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    Unsubscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    Command {
        command: String,
    },
    CancelTask {
        task_id: String,
    },
}

/// Gateway-originated frames. Bus events are forwarded verbatim and never
/// pass through this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    ConnectionEstablished { client_id: String },
    Error { message: String },
    AgentStatus(Value),
    Ping,
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_task_frame_parses() {
        let raw = r#"{"type":"start_task","payload":{"content":"Summarize this"}}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(
            frame,
            ClientFrame::StartTask {
                content: "Summarize this".into(),
                task_id: None,
                confidence: None,
            }
        );
    }

    #[test]
    fn test_ping_frame_without_payload() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping);
    }

    #[test]
    fn test_server_frame_shape() {
        let frame = ServerFrame::ConnectionEstablished {
            client_id: "client-1".into(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"connection_established\""));
        assert!(json.contains("\"client_id\":\"client-1\""));
    }

    #[test]
    fn test_unknown_frame_type_is_error() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"mystery"}"#).is_err());
    }
}
