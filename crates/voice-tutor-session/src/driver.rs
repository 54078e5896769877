//! Session protocol driver.
//!
//! Reacts to event channel notifications: sends the session setup once the
//! channel opens, records every event in the raw log and feeds chat-relevant
//! ones to the transcript.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::mpsc;
use voice_tutor_core::{
    ClientEvent, Event, EventLog, RealtimeConfig, Role, SessionSettings,
};
use voice_tutor_transport::{
    ChannelError, ChannelMessage, ChannelSignal, EventChannel, protocol::decode_message,
};

use crate::view::TranscriptView;

/// What the driver sends when the channel opens.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub settings: SessionSettings,
    /// Opaque system instructions sent as the first conversation item.
    pub instructions: String,
}

impl SessionSetup {
    #[must_use]
    pub fn new(settings: SessionSettings, instructions: impl Into<String>) -> Self {
        Self {
            settings,
            instructions: instructions.into(),
        }
    }

    /// Setup requesting transcription with the configured model.
    #[must_use]
    pub fn from_config(config: &RealtimeConfig, instructions: impl Into<String>) -> Self {
        Self::new(
            SessionSettings::with_transcription(&config.transcription_model),
            instructions,
        )
    }
}

/// Drives one session over one event channel.
pub struct SessionDriver {
    channel: Arc<EventChannel>,
    log: Arc<EventLog>,
    transcript: Option<Arc<TranscriptView>>,
    setup: SessionSetup,
    active: AtomicBool,
    initialized: AtomicBool,
}

impl SessionDriver {
    #[must_use]
    pub fn new(channel: Arc<EventChannel>, log: Arc<EventLog>, setup: SessionSetup) -> Self {
        Self {
            channel,
            log,
            transcript: None,
            setup,
            active: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
        }
    }

    /// Feed chat-relevant events into `transcript`.
    #[must_use]
    pub fn with_transcript(mut self, transcript: Arc<TranscriptView>) -> Self {
        self.transcript = Some(transcript);
        self
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn channel(&self) -> &Arc<EventChannel> {
        &self.channel
    }

    /// Dispatch one channel notification.
    pub fn handle_signal(&self, signal: ChannelSignal) {
        match signal {
            ChannelSignal::Open => {
                self.on_open();
            }
            ChannelSignal::Message(message) => {
                self.on_message(&message);
            }
            ChannelSignal::Closed => self.on_closed(),
        }
    }

    /// Channel opened: activate and send setup.
    ///
    /// Returns `false` if setup already ran for this channel.
    pub fn on_open(&self) -> bool {
        if !self.channel.mark_open() || self.initialized.swap(true, Ordering::SeqCst) {
            tracing::debug!("Ignoring repeated open notification");
            return false;
        }

        self.active.store(true, Ordering::SeqCst);
        self.log.clear();

        let setup = [
            ClientEvent::SessionUpdate {
                session: self.setup.settings.clone(),
            },
            ClientEvent::message(Role::System, self.setup.instructions.clone()),
        ];
        for event in setup {
            if let Err(e) = self.send_client_event(event) {
                tracing::error!("Failed to send session setup: {e}");
            }
        }

        tracing::info!(label = self.channel.label(), "Session active");
        true
    }

    /// Inbound frame: parse, stamp, record and project.
    ///
    /// Malformed frames are logged and dropped.
    pub fn on_message(&self, message: &ChannelMessage) -> Option<Event> {
        let mut event = match decode_message(message) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Dropping inbound frame: {e}");
                return None;
            }
        };

        event.stamp_if_missing();
        self.record(&event);
        Some(event)
    }

    /// Channel closed by either side.
    pub fn on_closed(&self) {
        self.channel.mark_closed();
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::info!(label = self.channel.label(), "Session inactive");
        }
    }

    /// Send an event, assigning an id if it has none.
    ///
    /// The event is transmitted before the local timestamp is added, so the
    /// timestamp never reaches the wire. Returns the event as recorded.
    ///
    /// # Errors
    /// Returns [`ChannelError`] if the channel is not open; the event is not
    /// recorded in that case.
    pub fn send_event(&self, mut event: Event) -> Result<Event, ChannelError> {
        event.ensure_event_id();

        if let Err(e) = self.channel.send(&event) {
            tracing::warn!(kind = %event.kind, "Dropping outbound event: {e}");
            return Err(e);
        }

        event.stamp_if_missing();
        self.record(&event);
        Ok(event)
    }

    /// Send a typed event.
    ///
    /// # Errors
    /// As [`send_event`](Self::send_event).
    pub fn send_client_event(&self, event: ClientEvent) -> Result<Event, ChannelError> {
        self.send_event(event.into_event()?)
    }

    /// Send a user text message followed by a response request.
    ///
    /// # Errors
    /// Returns the first send failure; the response request is not sent if
    /// the message was not.
    pub fn send_user_text(&self, text: impl Into<String>) -> Result<(), ChannelError> {
        self.send_client_event(ClientEvent::message(Role::User, text))?;
        self.send_client_event(ClientEvent::ResponseCreate)?;
        Ok(())
    }

    /// Consume channel notifications until the channel closes.
    pub async fn run(self: Arc<Self>, mut signals: mpsc::UnboundedReceiver<ChannelSignal>) {
        while let Some(signal) = signals.recv().await {
            let closed = signal == ChannelSignal::Closed;
            self.handle_signal(signal);
            if closed {
                break;
            }
        }
        self.on_closed();
    }

    fn record(&self, event: &Event) {
        self.log.push(event.clone());
        if let Some(transcript) = &self.transcript {
            transcript.apply(event);
        }
    }
}
