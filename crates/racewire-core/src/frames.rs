//! Frames exchanged with subscribers.
//!
//! Server to client:
//! - lifecycle events, tagged by `event`
//! - telemetry samples, a flat object with no `event` key
//! - replies, tagged by `type`
//!
//! Client to server: only `{"type":"heartbeat"}` means anything.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::session::SessionToken;
use crate::telemetry::{SessionMetadata, TelemetrySample};

/// Session lifecycle notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    SessionStart {
        metadata: SessionMetadata,
    },
    SessionChange {
        metadata: SessionMetadata,
    },
    SessionEnd {
        #[serde(rename = "sessionId")]
        session_id: SessionToken,
    },
    /// Sent once to a newly connected subscriber while a session is active.
    ConnectionEstablished {
        metadata: SessionMetadata,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "session_start",
            Self::SessionChange { .. } => "session_change",
            Self::SessionEnd { .. } => "session_end",
            Self::ConnectionEstablished { .. } => "connection_established",
        }
    }
}

/// Direct reply to a client message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerReply {
    HeartbeatAck,
}

/// Anything the server writes to a subscriber.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Lifecycle(LifecycleEvent),
    Telemetry(TelemetrySample),
    Reply(ServerReply),
}

impl ServerFrame {
    /// Serialize once into a shareable payload.
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

impl From<LifecycleEvent> for ServerFrame {
    fn from(event: LifecycleEvent) -> Self {
        Self::Lifecycle(event)
    }
}

impl From<TelemetrySample> for ServerFrame {
    fn from(sample: TelemetrySample) -> Self {
        Self::Telemetry(sample)
    }
}

impl From<ServerReply> for ServerFrame {
    fn from(reply: ServerReply) -> Self {
        Self::Reply(reply)
    }
}

/// Inbound client message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Heartbeat,
    #[serde(other)]
    Other,
}

impl ClientMessage {
    /// Parse a text frame. `None` for anything that is not a JSON object with
    /// a string `type`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn metadata() -> SessionMetadata {
        SessionMetadata {
            session: SessionToken::from_raw("01012025120000"),
            race_info: json!({"TrackName": "monza"}),
            timestamp: "2025-01-01T12:00:00.000000".into(),
            ..Default::default()
        }
    }

    fn encode_value(frame: impl Into<ServerFrame>) -> Value {
        let payload = frame.into().encode().unwrap();
        serde_json::from_str(&payload).unwrap()
    }

    #[test]
    fn session_start_shape() {
        let v = encode_value(LifecycleEvent::SessionStart {
            metadata: metadata(),
        });
        assert_eq!(v["event"], "session_start");
        assert_eq!(v["metadata"]["UniqueSessionID"], "01012025120000");
        assert_eq!(v["metadata"]["RaceInfo"]["TrackName"], "monza");
    }

    #[test]
    fn session_end_carries_session_id() {
        let v = encode_value(LifecycleEvent::SessionEnd {
            session_id: SessionToken::from_raw("01012025120000"),
        });
        assert_eq!(v, json!({"event": "session_end", "sessionId": "01012025120000"}));
    }

    #[test]
    fn connection_established_and_change_names() {
        let established = LifecycleEvent::ConnectionEstablished {
            metadata: metadata(),
        };
        let change = LifecycleEvent::SessionChange {
            metadata: metadata(),
        };
        assert_eq!(encode_value(established.clone())["event"], established.name());
        assert_eq!(encode_value(change.clone())["event"], "session_change");
        assert_eq!(change.name(), "session_change");
    }

    #[test]
    fn telemetry_frame_is_flat() {
        let v = encode_value(TelemetrySample {
            session: Some(SessionToken::from_raw("01012025120000")),
            throttle: 0.5,
            ..Default::default()
        });
        assert!(v.get("event").is_none());
        assert!(v.get("type").is_none());
        assert_eq!(v["Throttle"], 0.5);
    }

    #[test]
    fn heartbeat_ack_shape() {
        let v = encode_value(ServerReply::HeartbeatAck);
        assert_eq!(v, json!({"type": "heartbeat_ack"}));
    }

    #[test]
    fn lifecycle_round_trips_through_json() {
        let event = LifecycleEvent::SessionStart {
            metadata: metadata(),
        };
        let payload = ServerFrame::from(event.clone()).encode().unwrap();
        let back: LifecycleEvent = serde_json::from_str(&payload).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn parses_heartbeat() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"heartbeat"}"#),
            Some(ClientMessage::Heartbeat)
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"heartbeat","extra":1}"#),
            Some(ClientMessage::Heartbeat)
        );
    }

    #[test]
    fn unknown_type_is_other() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"subscribe"}"#),
            Some(ClientMessage::Other)
        );
    }

    #[test]
    fn malformed_input_is_none() {
        assert_eq!(ClientMessage::parse("not json"), None);
        assert_eq!(ClientMessage::parse("42"), None);
        assert_eq!(ClientMessage::parse(r#"{"kind":"heartbeat"}"#), None);
        assert_eq!(ClientMessage::parse(""), None);
    }
}
