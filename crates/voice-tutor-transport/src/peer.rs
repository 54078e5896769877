//! Platform seams for the media + data transport.
//!
//! The negotiator drives these traits; a browser binding or a native WebRTC
//! stack implements them.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{ChannelMessage, SessionDescription};

/// Failure reported by the underlying transport.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Microphone acquisition error.
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("No audio input available: {0}")]
    Unavailable(String),
}

/// A local media track sent to the peer.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    /// Stop capturing. Stopping twice is allowed.
    ///
    /// # Errors
    /// Returns error if the platform refuses to stop the track.
    fn stop(&self) -> Result<(), TransportError>;
}

/// A media track received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
}

/// Receives remote tracks, e.g. to play the model's audio.
pub trait TrackSink: Send + Sync {
    fn attach(&self, track: RemoteTrack);
}

/// Sink that ignores remote audio.
#[derive(Debug, Default, Clone)]
pub struct DiscardSink;

impl TrackSink for DiscardSink {
    fn attach(&self, track: RemoteTrack) {
        tracing::debug!(track = %track.id, "Discarding remote track");
    }
}

/// Lifecycle and message notifications from a data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    Open,
    Message(ChannelMessage),
    Closed,
}

/// Raw message-framed data channel.
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    /// Transmit one text frame.
    ///
    /// # Errors
    /// Returns error if the frame could not be queued.
    fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// # Errors
    /// Returns error if the channel could not be closed.
    fn close(&self) -> Result<(), TransportError>;
}

/// A data channel plus the stream of its notifications.
pub struct ChannelHandle {
    pub channel: Arc<dyn DataChannel>,
    pub signals: mpsc::UnboundedReceiver<ChannelSignal>,
}

/// Media + data peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// # Errors
    /// Returns error if the track cannot be added.
    fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), TransportError>;

    /// Register where remote tracks are delivered.
    fn set_track_sink(&self, sink: Arc<dyn TrackSink>);

    /// # Errors
    /// Returns error if the channel cannot be created.
    fn create_data_channel(&self, label: &str) -> Result<ChannelHandle, TransportError>;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription)
    -> Result<(), TransportError>;

    /// # Errors
    /// Returns error if the connection could not be closed cleanly.
    fn close(&self) -> Result<(), TransportError>;
}

/// Entry point to the platform's media stack.
#[async_trait]
pub trait MediaPlatform: Send + Sync {
    /// Ask for microphone access and return the captured audio track.
    async fn request_microphone(&self) -> Result<Arc<dyn MediaTrack>, MediaError>;

    /// # Errors
    /// Returns error if no connection can be created.
    fn create_peer_connection(&self) -> Result<Arc<dyn PeerConnection>, TransportError>;
}
