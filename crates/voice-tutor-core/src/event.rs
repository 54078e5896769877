//! Realtime event vocabulary.
//!
//! Every message on the event channel is a flat JSON object tagged by `type`.
//! [`Event`] is the generic form used for the raw log and the wire; outbound
//! events are usually built from the typed [`ClientEvent`] enum first.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Event `type` tags this crate knows about.
pub mod kind {
    pub const SESSION_UPDATE: &str = "session.update";
    pub const SESSION_CREATED: &str = "session.created";
    pub const CONVERSATION_ITEM_CREATE: &str = "conversation.item.create";
    pub const RESPONSE_CREATE: &str = "response.create";
    pub const RESPONSE_DONE: &str = "response.done";
    pub const INPUT_TRANSCRIPTION_COMPLETED: &str =
        "conversation.item.input_audio_transcription.completed";
    pub const OUTPUT_TRANSCRIPT_DONE: &str = "response.audio_transcript.done";
    pub const ERROR: &str = "error";
}

/// Inbound payload that could not be parsed as an [`Event`].
#[derive(Debug, Error)]
#[error("malformed event: {reason}")]
pub struct MalformedEvent {
    pub reason: String,
}

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Parse a role string, treating anything unrecognised as the assistant.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match value {
            "user" => Self::User,
            "system" => Self::System,
            _ => Self::Assistant,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One event exchanged over the event channel.
///
/// Unknown fields are preserved in `fields` so inbound events survive a
/// parse/serialize cycle untouched. `event_id` and `timestamp` are omitted
/// from the JSON when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    /// Create an event with just a `type`.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            event_id: None,
            timestamp: None,
            fields: Map::new(),
        }
    }

    /// Attach an extra top-level field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Set an explicit event id.
    #[must_use]
    pub fn with_event_id(mut self, id: impl Into<String>) -> Self {
        self.event_id = Some(id.into());
        self
    }

    /// Parse an inbound payload.
    ///
    /// # Errors
    /// Returns [`MalformedEvent`] if the payload is not a JSON object with a
    /// string `type`.
    pub fn parse(payload: &str) -> Result<Self, MalformedEvent> {
        serde_json::from_str(payload).map_err(|e| MalformedEvent {
            reason: e.to_string(),
        })
    }

    /// Serialize for transmission.
    ///
    /// # Errors
    /// Returns error if a field value cannot be serialized.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Look up a top-level field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Look up a top-level string field.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    /// `transcript` carried by transcription events.
    #[must_use]
    pub fn transcript(&self) -> Option<&str> {
        self.str_field("transcript")
    }

    /// Role of a `conversation.item.create` item.
    #[must_use]
    pub fn item_role(&self) -> Option<Role> {
        self.field("item")
            .and_then(|item| item.get("role"))
            .and_then(Value::as_str)
            .map(Role::from_wire)
    }

    /// Inline text of the first content part of a `conversation.item.create`
    /// item, if present and non-empty.
    #[must_use]
    pub fn item_text(&self) -> Option<&str> {
        self.field("item")
            .and_then(|item| item.get("content"))
            .and_then(|content| content.get(0))
            .and_then(|part| part.get("text"))
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
    }

    /// Assign a fresh id if none is set, returning the id.
    pub fn ensure_event_id(&mut self) -> &str {
        self.event_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .as_str()
    }

    /// Stamp the local wall-clock time if no timestamp is present.
    ///
    /// Returns `true` if a timestamp was added.
    pub fn stamp_if_missing(&mut self) -> bool {
        if self.timestamp.is_some() {
            return false;
        }
        self.timestamp = Some(local_timestamp());
        true
    }
}

/// Local time-of-day string used for event timestamps, e.g. `3:07:42 PM`.
#[must_use]
pub fn local_timestamp() -> String {
    chrono::Local::now().format("%-I:%M:%S %p").to_string()
}

/// Transcription settings requested in `session.update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    pub model: String,
}

/// Session configuration sent when the channel opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionSettings>,
    #[serde(default)]
    pub tools: Vec<Value>,
    #[serde(default = "default_tool_choice")]
    pub tool_choice: String,
}

fn default_tool_choice() -> String {
    "auto".to_string()
}

impl SessionSettings {
    /// Settings that enable input transcription with the given model.
    #[must_use]
    pub fn with_transcription(model: impl Into<String>) -> Self {
        Self {
            input_audio_transcription: Some(TranscriptionSettings {
                model: model.into(),
            }),
            tools: Vec::new(),
            tool_choice: default_tool_choice(),
        }
    }
}

/// One content part of a conversation item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
}

/// Conversation item carried by `conversation.item.create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message { role: Role, content: Vec<ContentPart> },
}

/// Typed outbound events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    /// A message item with a single inline text part.
    #[must_use]
    pub fn message(role: Role, text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::Message {
                role,
                content: vec![ContentPart::InputText { text: text.into() }],
            },
        }
    }

    /// Convert into the generic event form.
    ///
    /// # Errors
    /// Returns error if the payload cannot be represented as JSON.
    pub fn into_event(self) -> Result<Event, serde_json::Error> {
        serde_json::to_value(self).and_then(serde_json::from_value)
    }
}
