//! Chat transcript derived from the raw event stream.
//!
//! Only three event kinds reach the transcript:
//! - input audio transcription completed (the user spoke)
//! - output audio transcript done (the model spoke)
//! - `conversation.item.create` with inline text (typed or system turns)
//!
//! Entries are keyed by the source event's id, falling back to
//! `type@timestamp`. A key is never admitted twice, so replaying events is
//! harmless and batch rehydration matches incremental projection.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    Event, Role,
    event::kind,
};

/// One line of the chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub key: String,
    pub role: Role,
    pub text: String,
}

/// Identifying key of the event that produced an entry.
#[must_use]
pub fn entry_key(event: &Event) -> String {
    match &event.event_id {
        Some(id) => id.clone(),
        None => format!(
            "{}@{}",
            event.kind,
            event.timestamp.as_deref().unwrap_or_default()
        ),
    }
}

/// Project one event into a transcript entry.
///
/// Returns `None` for events that are not chat-relevant.
#[must_use]
pub fn project(event: &Event) -> Option<TranscriptEntry> {
    let (role, text) = match event.kind.as_str() {
        kind::INPUT_TRANSCRIPTION_COMPLETED => (Role::User, event.transcript()?),
        kind::OUTPUT_TRANSCRIPT_DONE => (Role::Assistant, event.transcript()?),
        kind::CONVERSATION_ITEM_CREATE => (event.item_role()?, event.item_text()?),
        _ => return None,
    };

    Some(TranscriptEntry {
        key: entry_key(event),
        role,
        text: text.to_string(),
    })
}

/// Deduplicated, chronological transcript.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    keys: HashSet<String>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from previously projected entries, dropping repeated keys.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = TranscriptEntry>) -> Self {
        let mut transcript = Self::new();
        for entry in entries {
            transcript.insert(entry);
        }
        transcript
    }

    /// Batch projection of a raw event log given in arrival order.
    #[must_use]
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        Self::from_entries(events.into_iter().filter_map(project))
    }

    /// Incremental projection of one event.
    ///
    /// Returns the appended entry, or `None` if the event is not
    /// chat-relevant or its key is already present.
    pub fn apply(&mut self, event: &Event) -> Option<&TranscriptEntry> {
        let entry = project(event)?;
        if self.insert(entry) {
            self.entries.last()
        } else {
            None
        }
    }

    /// Append an entry unless its key is already present.
    pub fn insert(&mut self, entry: TranscriptEntry) -> bool {
        if !self.keys.insert(entry.key.clone()) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Replace the whole transcript, e.g. with another context's write.
    pub fn replace(&mut self, entries: impl IntoIterator<Item = TranscriptEntry>) {
        *self = Self::from_entries(entries);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }

    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    #[must_use]
    pub fn keys(&self) -> &HashSet<String> {
        &self.keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<TranscriptEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{ClientEvent, EventLog};

    fn spoken(id: &str, text: &str) -> Event {
        Event::new(kind::INPUT_TRANSCRIPTION_COMPLETED)
            .with_event_id(id)
            .with_field("transcript", json!(text))
    }

    fn answered(id: &str, text: &str) -> Event {
        Event::new(kind::OUTPUT_TRANSCRIPT_DONE)
            .with_event_id(id)
            .with_field("transcript", json!(text))
    }

    #[test]
    fn test_projection_per_kind() {
        let user = project(&spoken("e1", "my name is Sam")).unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.text, "my name is Sam");
        assert_eq!(user.key, "e1");

        let assistant = project(&answered("e2", "Hello!")).unwrap();
        assert_eq!(assistant.role, Role::Assistant);

        let system = ClientEvent::message(Role::System, "be kind")
            .into_event()
            .unwrap()
            .with_event_id("e3");
        let entry = project(&system).unwrap();
        assert_eq!(entry.role, Role::System);
        assert_eq!(entry.text, "be kind");
    }

    #[test]
    fn test_irrelevant_events_are_skipped() {
        assert!(project(&Event::new(kind::SESSION_CREATED)).is_none());
        assert!(project(&Event::new(kind::RESPONSE_CREATE)).is_none());
        // Transcript kinds without their payload are skipped too.
        assert!(project(&Event::new(kind::OUTPUT_TRANSCRIPT_DONE)).is_none());
    }

    #[test]
    fn test_fallback_key_uses_type_and_timestamp() {
        let mut event = Event::new(kind::OUTPUT_TRANSCRIPT_DONE).with_field("transcript", json!("hi"));
        event.timestamp = Some("3:00:00 PM".to_string());
        assert_eq!(entry_key(&event), "response.audio_transcript.done@3:00:00 PM");
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut transcript = Transcript::new();
        let event = answered("e1", "Hello!");

        assert!(transcript.apply(&event).is_some());
        assert!(transcript.apply(&event).is_none());
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn test_batch_matches_incremental() {
        let log = EventLog::new();
        log.push(Event::new(kind::SESSION_CREATED).with_event_id("s"));
        log.push(spoken("e1", "hi"));
        log.push(answered("e2", "Hello!"));
        log.push(spoken("e1", "hi"));
        log.push(answered("e3", "What are you building?"));

        let batch = Transcript::from_events(&log.chronological());

        let mut incremental = Transcript::new();
        for event in log.chronological() {
            incremental.apply(&event);
        }

        let mut reversed = Transcript::new();
        for event in log.snapshot() {
            reversed.apply(&event);
        }

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.entries(), incremental.entries());
        assert_eq!(batch.keys(), reversed.keys());
    }

    #[test]
    fn test_from_entries_dedupes() {
        let entry = project(&spoken("e1", "hi")).unwrap();
        let transcript = Transcript::from_entries(vec![entry.clone(), entry]);
        assert_eq!(transcript.len(), 1);
    }
}
