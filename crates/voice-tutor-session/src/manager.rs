//! Session manager for realtime voice sessions.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use voice_tutor_core::{
    CredentialError, CredentialProvider, Event, EventLog, RealtimeConfig, TranscriptEntry,
    TranscriptStore,
};
use voice_tutor_transport::{
    ChannelError, ChannelState, ConnectError, Connected, HttpCredentialProvider, HttpSignaling,
    MediaPlatform, Negotiator, TrackSink, TransportConnection, peer::DiscardSink, stop_connection,
};

use crate::{
    driver::{SessionDriver, SessionSetup},
    view::TranscriptView,
};

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("Microphone access denied: {0}")]
    MediaAccessDenied(String),
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),
    #[error("Session already active")]
    AlreadyActive,
    #[error("Session stopped during setup")]
    Cancelled,
    #[error("No active session")]
    NotActive,
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl From<ConnectError> for SessionError {
    fn from(e: ConnectError) -> Self {
        match e {
            ConnectError::Credential(e) => Self::Credential(e),
            ConnectError::MediaAccessDenied(e) => Self::MediaAccessDenied(e.to_string()),
            ConnectError::NegotiationFailed(reason) => Self::NegotiationFailed(reason),
        }
    }
}

/// Live session resources.
struct ActiveSession {
    connection: Option<TransportConnection>,
    driver: Arc<SessionDriver>,
    pump: JoinHandle<()>,
}

impl ActiveSession {
    fn shutdown(self) {
        self.pump.abort();
        self.release();
    }

    fn release(mut self) {
        stop_connection(&mut self.connection);
        self.driver.on_closed();
    }
}

enum Phase {
    Idle,
    Starting,
    Active(ActiveSession),
}

struct SessionState {
    phase: Phase,
    /// Bumped on every start and stop so a stale negotiation can tell it
    /// was cancelled.
    generation: u64,
}

/// Tear down the session started as `generation` once its channel has
/// closed from the remote side.
fn release_closed(state: &Mutex<SessionState>, generation: u64) {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    if state.generation != generation || !matches!(state.phase, Phase::Active(_)) {
        return;
    }
    if let Phase::Active(active) = std::mem::replace(&mut state.phase, Phase::Idle) {
        tracing::info!("Event channel closed remotely, releasing transport");
        active.release();
    }
}

/// One client's realtime session.
///
/// At most one session is live at a time. The raw event log and the
/// transcript view outlive individual sessions.
pub struct RealtimeSession {
    negotiator: Negotiator,
    credentials: Arc<dyn CredentialProvider>,
    sink: Arc<dyn TrackSink>,
    setup: SessionSetup,
    log: Arc<EventLog>,
    transcript: Arc<TranscriptView>,
    state: Arc<Mutex<SessionState>>,
}

impl RealtimeSession {
    /// Create a session manager.
    ///
    /// The transcript is hydrated from `store` immediately.
    #[must_use]
    pub fn new(
        negotiator: Negotiator,
        credentials: Arc<dyn CredentialProvider>,
        setup: SessionSetup,
        store: Arc<dyn TranscriptStore>,
    ) -> Self {
        Self {
            negotiator,
            credentials,
            sink: Arc::new(DiscardSink),
            setup,
            log: Arc::new(EventLog::new()),
            transcript: Arc::new(TranscriptView::hydrate(store)),
            state: Arc::new(Mutex::new(SessionState {
                phase: Phase::Idle,
                generation: 0,
            })),
        }
    }

    /// Wire a session to the HTTP token and signaling endpoints in `config`.
    #[must_use]
    pub fn from_config(
        config: &RealtimeConfig,
        platform: Arc<dyn MediaPlatform>,
        store: Arc<dyn TranscriptStore>,
        instructions: impl Into<String>,
    ) -> Self {
        let negotiator = Negotiator::new(
            platform,
            Arc::new(HttpSignaling::new(config.signaling_url())),
            &config.channel_label,
        );
        Self::new(
            negotiator,
            Arc::new(HttpCredentialProvider::new(&config.token_url)),
            SessionSetup::from_config(config, instructions),
            store,
        )
        .with_log(Arc::new(EventLog::with_capacity(config.log_capacity)))
    }

    /// Route remote audio to `sink`.
    #[must_use]
    pub fn with_track_sink(mut self, sink: Arc<dyn TrackSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: Arc<EventLog>) -> Self {
        self.log = log;
        self
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Obtain a credential, negotiate the transport and start the driver.
    ///
    /// The session becomes active once the event channel opens.
    ///
    /// # Errors
    /// Returns [`SessionError::AlreadyActive`] if a session is starting or
    /// live, [`SessionError::Cancelled`] if [`stop`](Self::stop) ran while
    /// negotiating, and the credential, media or negotiation failure
    /// otherwise.
    pub async fn start(&self) -> Result<(), SessionError> {
        let generation = {
            let mut state = self.state();
            let closed_remotely = matches!(
                &state.phase,
                Phase::Active(active) if active.driver.channel().state() == ChannelState::Closed
            );
            if closed_remotely {
                tracing::debug!("Reaping session closed by the remote peer");
                if let Phase::Active(stale) = std::mem::replace(&mut state.phase, Phase::Idle) {
                    stale.shutdown();
                }
            }
            if !matches!(state.phase, Phase::Idle) {
                return Err(SessionError::AlreadyActive);
            }
            state.phase = Phase::Starting;
            state.generation += 1;
            state.generation
        };

        let result = self
            .negotiator
            .connect(self.credentials.as_ref(), Arc::clone(&self.sink))
            .await;

        let mut state = self.state();
        if state.generation != generation {
            if let Ok(connected) = result {
                stop_connection(&mut Some(connected.connection));
            }
            tracing::info!("Session start cancelled");
            return Err(SessionError::Cancelled);
        }

        let Connected {
            connection,
            channel,
            signals,
        } = match result {
            Ok(connected) => connected,
            Err(e) => {
                state.phase = Phase::Idle;
                tracing::warn!("Session start failed: {e}");
                return Err(e.into());
            }
        };

        let driver = Arc::new(
            SessionDriver::new(channel, Arc::clone(&self.log), self.setup.clone())
                .with_transcript(Arc::clone(&self.transcript)),
        );
        let pump = tokio::spawn({
            let driver = Arc::clone(&driver);
            let shared = Arc::clone(&self.state);
            async move {
                driver.run(signals).await;
                release_closed(&shared, generation);
            }
        });
        state.phase = Phase::Active(ActiveSession {
            connection: Some(connection),
            driver,
            pump,
        });

        tracing::info!("Session started");
        Ok(())
    }

    /// Stop the session and clear the shared transcript.
    ///
    /// Safe at any point, including mid-negotiation and when nothing is
    /// running.
    pub fn stop(&self) {
        let previous = {
            let mut state = self.state();
            state.generation += 1;
            std::mem::replace(&mut state.phase, Phase::Idle)
        };

        match previous {
            Phase::Idle => return,
            Phase::Starting => {}
            Phase::Active(active) => active.shutdown(),
        }

        self.transcript.clear();
        tracing::info!("Session stopped");
    }

    /// `true` while the event channel is open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        match &self.state().phase {
            Phase::Active(active) => active.driver.is_active(),
            Phase::Idle | Phase::Starting => false,
        }
    }

    fn driver(&self) -> Result<Arc<SessionDriver>, SessionError> {
        match &self.state().phase {
            Phase::Active(active) => Ok(Arc::clone(&active.driver)),
            Phase::Idle | Phase::Starting => Err(SessionError::NotActive),
        }
    }

    /// Send an event over the live session.
    ///
    /// # Errors
    /// Returns [`SessionError::NotActive`] without a session and
    /// [`SessionError::Channel`] if the channel is not open.
    pub fn send_event(&self, event: Event) -> Result<Event, SessionError> {
        Ok(self.driver()?.send_event(event)?)
    }

    /// Send a user text message and request a response.
    ///
    /// # Errors
    /// As [`send_event`](Self::send_event).
    pub fn send_user_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        Ok(self.driver()?.send_user_text(text)?)
    }

    /// Raw event log, most recent first.
    #[must_use]
    pub fn events(&self) -> Arc<EventLog> {
        Arc::clone(&self.log)
    }

    #[must_use]
    pub fn transcript(&self) -> Arc<TranscriptView> {
        Arc::clone(&self.transcript)
    }

    /// Current transcript entries.
    #[must_use]
    pub fn transcript_entries(&self) -> Vec<TranscriptEntry> {
        self.transcript.entries()
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Phase::Active(active) = std::mem::replace(&mut state.phase, Phase::Idle) {
            active.shutdown();
        }
    }
}
