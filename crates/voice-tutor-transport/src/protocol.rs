//! Wire protocol: session descriptions and event framing.

use serde::{Deserialize, Serialize};
use voice_tutor_core::{Event, MalformedEvent};

/// Content type of an SDP offer posted to the signaling endpoint.
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Kind of session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Opaque session description exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One message frame delivered by a data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl From<&str> for ChannelMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Encode an outbound event exactly as it stands.
///
/// Callers must encode before stamping a local timestamp so the peer never
/// sees one it did not ask for.
///
/// # Errors
/// Returns error if the event cannot be serialized.
pub fn encode_event(event: &Event) -> Result<String, serde_json::Error> {
    event.to_wire()
}

/// Decode an inbound frame into an event.
///
/// # Errors
/// Returns [`MalformedEvent`] for non-UTF-8 binary frames or payloads that
/// are not events.
pub fn decode_message(message: &ChannelMessage) -> Result<Event, MalformedEvent> {
    match message {
        ChannelMessage::Text(text) => Event::parse(text),
        ChannelMessage::Binary(data) => {
            let text = std::str::from_utf8(data).map_err(|e| MalformedEvent {
                reason: format!("binary frame is not UTF-8: {e}"),
            })?;
            Event::parse(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_and_binary() {
        let raw = r#"{"type":"session.created","event_id":"evt_1"}"#;
        let from_text = decode_message(&ChannelMessage::from(raw)).unwrap();
        let from_binary = decode_message(&ChannelMessage::Binary(raw.as_bytes().to_vec())).unwrap();
        assert_eq!(from_text, from_binary);
        assert_eq!(from_text.kind, "session.created");
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let err = decode_message(&ChannelMessage::Binary(vec![0xff, 0xfe])).unwrap_err();
        assert!(err.reason.contains("UTF-8"));
    }

    #[test]
    fn test_session_description_serialization() {
        let offer = SessionDescription::offer("v=0");
        let json = serde_json::to_string(&offer).unwrap();
        assert_eq!(json, r#"{"type":"offer","sdp":"v=0"}"#);

        let parsed: SessionDescription = serde_json::from_str(r#"{"type":"answer","sdp":"v=1"}"#).unwrap();
        assert_eq!(parsed, SessionDescription::answer("v=1"));
    }
}
