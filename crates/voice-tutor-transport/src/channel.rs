//! Event channel: typed events over a raw data channel.
//!
//! The channel is an explicit `Connecting -> Open -> Closed` state machine.
//! Each transition happens at most once, so the open reaction (session
//! setup) cannot run twice.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use voice_tutor_core::Event;

use crate::{
    peer::{DataChannel, TransportError},
    protocol::encode_event,
};

/// Lifecycle state of an event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Send error.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not open yet")]
    NotReady,
    #[error("Channel closed")]
    Closed,
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Ordered, reliable event channel layered on a [`DataChannel`].
pub struct EventChannel {
    raw: Arc<dyn DataChannel>,
    state: Mutex<ChannelState>,
}

impl EventChannel {
    /// Wrap a freshly created data channel.
    #[must_use]
    pub fn new(raw: Arc<dyn DataChannel>) -> Self {
        Self {
            raw,
            state: Mutex::new(ChannelState::Connecting),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        self.raw.label()
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Transition `Connecting -> Open`.
    ///
    /// Returns `true` only for the transition itself; repeated or late open
    /// notifications return `false`.
    pub fn mark_open(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == ChannelState::Connecting {
            *state = ChannelState::Open;
            true
        } else {
            false
        }
    }

    /// Transition to `Closed`. Returns `true` the first time only.
    pub fn mark_closed(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == ChannelState::Closed {
            false
        } else {
            *state = ChannelState::Closed;
            true
        }
    }

    /// Transmit one event as it currently stands.
    ///
    /// # Errors
    /// Returns [`ChannelError::NotReady`] before the channel opens and
    /// [`ChannelError::Closed`] after it closes.
    pub fn send(&self, event: &Event) -> Result<(), ChannelError> {
        match self.state() {
            ChannelState::Connecting => return Err(ChannelError::NotReady),
            ChannelState::Closed => return Err(ChannelError::Closed),
            ChannelState::Open => {}
        }
        let payload = encode_event(event)?;
        self.raw.send_text(&payload)?;
        Ok(())
    }

    /// Close the channel. Closing an already closed channel is a no-op.
    ///
    /// # Errors
    /// Returns error if the underlying channel fails to close.
    pub fn close(&self) -> Result<(), ChannelError> {
        if self.mark_closed() {
            self.raw.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDataChannel;

    #[test]
    fn test_send_before_open_is_rejected() {
        let (raw, _signals) = MemoryDataChannel::new("oai-events");
        let channel = EventChannel::new(raw.clone());

        let err = channel.send(&Event::new("response.create")).unwrap_err();
        assert!(matches!(err, ChannelError::NotReady));
        assert!(raw.sent().is_empty());
    }

    #[test]
    fn test_open_fires_once() {
        let (raw, _signals) = MemoryDataChannel::new("oai-events");
        let channel = EventChannel::new(raw);
        assert!(channel.mark_open());
        assert!(!channel.mark_open());
        assert!(channel.is_open());
        assert_eq!(channel.label(), "oai-events");
    }

    #[test]
    fn test_send_after_close_is_rejected() {
        let (raw, mut signals) = MemoryDataChannel::new("oai-events");
        let channel = EventChannel::new(raw.clone());
        channel.mark_open();

        channel.send(&Event::new("response.create")).unwrap();
        channel.close().unwrap();
        channel.close().unwrap();

        let err = channel.send(&Event::new("response.create")).unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
        assert_eq!(raw.sent(), [r#"{"type":"response.create"}"#]);
        assert_eq!(signals.try_recv().ok(), Some(crate::peer::ChannelSignal::Closed));
        assert!(signals.try_recv().is_err());
        // A closed channel never reopens.
        assert!(!channel.mark_open());
    }
}
