//! Session orchestration and transcript sync for realtime voice sessions.
//!
//! Provides:
//! - `SessionDriver` - React to channel lifecycle and inbound events
//! - `RealtimeSession` - Start/stop one session at a time
//! - `TranscriptView` - Per-context transcript backed by a shared record
//! - Storage implementations (memory)

pub mod driver;
pub mod manager;
pub mod storage;
pub mod view;

pub use driver::{SessionDriver, SessionSetup};
pub use manager::{RealtimeSession, SessionError};
pub use view::TranscriptView;
