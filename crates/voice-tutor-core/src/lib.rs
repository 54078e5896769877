//! Core abstractions for realtime voice sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Event` / `ClientEvent` - Event vocabulary and wire form
//! - `EventLog` - Most-recent-first raw event log with live broadcast
//! - `Transcript` - Deduplicated chat view projected from events
//! - `RealtimeConfig` - Client configuration
//! - Credential, transcript storage and summarizer traits

pub mod config;
pub mod event;
pub mod event_log;
pub mod traits;
pub mod transcript;

pub use config::{RealtimeConfig, load_config};
pub use event::{ClientEvent, Event, MalformedEvent, Role, SessionSettings};
pub use event_log::EventLog;
pub use traits::{
    ChatMessage, Credential, CredentialError, CredentialProvider, StoreError, SummarizationError,
    Summarizer, TranscriptSource, TranscriptStore,
};
pub use transcript::{Transcript, TranscriptEntry, project};
