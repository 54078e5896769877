//! Transport layer for realtime voice sessions.
//!
//! Provides:
//! - Wire protocol (session descriptions + event framing)
//! - Event channel state machine
//! - Offer/answer negotiation and best-effort teardown
//! - HTTP credential and signaling clients
//! - In-process media platform for development and tests
//! - Relay server (feature: server)

pub mod channel;
pub mod memory;
pub mod negotiator;
pub mod peer;
pub mod protocol;
pub mod signaling;

#[cfg(feature = "server")]
pub mod server;

pub use channel::{ChannelError, ChannelState, EventChannel};
pub use negotiator::{ConnectError, Connected, Negotiator, TransportConnection, stop_connection};
pub use peer::{ChannelSignal, MediaPlatform, TrackSink, TransportError};
pub use protocol::{ChannelMessage, SessionDescription};
pub use signaling::{HttpCredentialProvider, HttpSignaling, SignalingClient, SignalingError};
