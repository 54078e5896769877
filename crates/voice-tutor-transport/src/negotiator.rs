//! Transport negotiation and teardown.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use voice_tutor_core::{Credential, CredentialError, CredentialProvider};

use crate::{
    channel::EventChannel,
    peer::{ChannelSignal, MediaError, MediaPlatform, MediaTrack, PeerConnection, TrackSink},
    protocol::SessionDescription,
    signaling::{SignalingClient, SignalingError},
};

/// Connection setup error.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("Microphone access denied: {0}")]
    MediaAccessDenied(#[from] MediaError),
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),
}

impl From<SignalingError> for ConnectError {
    fn from(e: SignalingError) -> Self {
        Self::NegotiationFailed(e.to_string())
    }
}

/// The negotiated media + data connection.
pub struct TransportConnection {
    peer: Arc<dyn PeerConnection>,
    tracks: Vec<Arc<dyn MediaTrack>>,
    channel: Option<Arc<EventChannel>>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
}

impl TransportConnection {
    fn new(peer: Arc<dyn PeerConnection>) -> Self {
        Self {
            peer,
            tracks: Vec::new(),
            channel: None,
            local_description: None,
            remote_description: None,
        }
    }

    #[must_use]
    pub fn channel(&self) -> Option<&Arc<EventChannel>> {
        self.channel.as_ref()
    }

    #[must_use]
    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    #[must_use]
    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    /// Tear down in order: event channel, outbound tracks, connection.
    ///
    /// Every step runs even if an earlier one fails. Returns the number of
    /// steps that reported an error.
    pub fn close(self) -> usize {
        let mut failures = 0;

        if let Some(channel) = &self.channel {
            if let Err(e) = channel.close() {
                tracing::error!(label = channel.label(), "Failed to close event channel: {e}");
                failures += 1;
            }
        }

        for track in &self.tracks {
            if let Err(e) = track.stop() {
                tracing::error!(track = track.id(), "Failed to stop track: {e}");
                failures += 1;
            }
        }

        if let Err(e) = self.peer.close() {
            tracing::error!("Failed to close peer connection: {e}");
            failures += 1;
        }

        failures
    }
}

/// Result of a successful negotiation.
pub struct Connected {
    pub connection: TransportConnection,
    pub channel: Arc<EventChannel>,
    /// Lifecycle and message notifications for `channel`.
    pub signals: mpsc::UnboundedReceiver<ChannelSignal>,
}

/// Establishes connections via offer/answer.
pub struct Negotiator {
    platform: Arc<dyn MediaPlatform>,
    signaling: Arc<dyn SignalingClient>,
    channel_label: String,
}

impl Negotiator {
    #[must_use]
    pub fn new(
        platform: Arc<dyn MediaPlatform>,
        signaling: Arc<dyn SignalingClient>,
        channel_label: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            signaling,
            channel_label: channel_label.into(),
        }
    }

    /// Fetch a credential, then [`start_connection`](Self::start_connection).
    ///
    /// # Errors
    /// Returns [`ConnectError::Credential`] if no credential can be obtained,
    /// otherwise as `start_connection`.
    pub async fn connect(
        &self,
        credentials: &dyn CredentialProvider,
        sink: Arc<dyn TrackSink>,
    ) -> Result<Connected, ConnectError> {
        let credential = credentials.fetch_credential().await?;
        self.start_connection(&credential, sink).await
    }

    /// Negotiate a new connection with the remote endpoint.
    ///
    /// On failure, anything acquired so far (microphone track, connection)
    /// is released before returning.
    ///
    /// # Errors
    /// Returns [`ConnectError::MediaAccessDenied`] if the microphone is
    /// refused and [`ConnectError::NegotiationFailed`] if the transport or
    /// the remote endpoint rejects the exchange.
    pub async fn start_connection(
        &self,
        credential: &Credential,
        sink: Arc<dyn TrackSink>,
    ) -> Result<Connected, ConnectError> {
        let microphone = self.platform.request_microphone().await?;

        let peer = match self.platform.create_peer_connection() {
            Ok(peer) => peer,
            Err(e) => {
                if let Err(stop_err) = microphone.stop() {
                    tracing::error!("Failed to stop track: {stop_err}");
                }
                return Err(ConnectError::NegotiationFailed(e.to_string()));
            }
        };

        let mut connection = TransportConnection::new(peer);
        connection.tracks.push(Arc::clone(&microphone));

        match self.negotiate(&mut connection, microphone, credential, sink).await {
            Ok((channel, signals)) => {
                tracing::debug!(label = channel.label(), "Transport negotiated");
                Ok(Connected {
                    connection,
                    channel,
                    signals,
                })
            }
            Err(e) => {
                tracing::warn!("Negotiation failed, releasing transport: {e}");
                connection.close();
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        connection: &mut TransportConnection,
        microphone: Arc<dyn MediaTrack>,
        credential: &Credential,
        sink: Arc<dyn TrackSink>,
    ) -> Result<(Arc<EventChannel>, mpsc::UnboundedReceiver<ChannelSignal>), ConnectError> {
        let peer = Arc::clone(&connection.peer);
        let failed = |e: crate::peer::TransportError| ConnectError::NegotiationFailed(e.to_string());

        peer.set_track_sink(sink);
        peer.add_track(microphone).map_err(failed)?;

        let handle = peer.create_data_channel(&self.channel_label).map_err(failed)?;
        let channel = Arc::new(EventChannel::new(handle.channel));
        connection.channel = Some(Arc::clone(&channel));

        let offer = peer.create_offer().await.map_err(failed)?;
        peer.set_local_description(offer.clone()).await.map_err(failed)?;
        connection.local_description = Some(offer.clone());

        let answer = self.signaling.exchange(&offer, credential).await?;
        peer.set_remote_description(answer.clone()).await.map_err(failed)?;
        connection.remote_description = Some(answer);

        Ok((channel, handle.signals))
    }
}

/// Tear down the connection in `slot`, leaving it empty.
///
/// Calling this on an empty slot is a no-op.
pub fn stop_connection(slot: &mut Option<TransportConnection>) {
    let Some(connection) = slot.take() else {
        return;
    };
    let failures = connection.close();
    if failures > 0 {
        tracing::warn!(failures, "Connection teardown finished with errors");
    } else {
        tracing::debug!("Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{channel::ChannelState, memory::MemoryPlatform, peer::DiscardSink};

    struct FixedAnswer;

    #[async_trait]
    impl SignalingClient for FixedAnswer {
        async fn exchange(
            &self,
            offer: &SessionDescription,
            credential: &Credential,
        ) -> Result<SessionDescription, SignalingError> {
            assert_eq!(credential.expose(), "ek_test");
            assert!(offer.sdp.starts_with("v=0"));
            Ok(SessionDescription::answer("v=0 answer"))
        }
    }

    struct Rejecting;

    #[async_trait]
    impl SignalingClient for Rejecting {
        async fn exchange(
            &self,
            _offer: &SessionDescription,
            _credential: &Credential,
        ) -> Result<SessionDescription, SignalingError> {
            Err(SignalingError::Rejected {
                status: 400,
                body: "bad offer".to_string(),
            })
        }
    }

    struct NoCredentials;

    #[async_trait]
    impl CredentialProvider for NoCredentials {
        async fn fetch_credential(&self) -> Result<Credential, CredentialError> {
            Err(CredentialError::Status(500))
        }
    }

    fn credential() -> Credential {
        Credential::new("ek_test")
    }

    #[tokio::test]
    async fn test_start_connection_negotiates() {
        let platform = Arc::new(MemoryPlatform::new());
        let negotiator = Negotiator::new(platform.clone(), Arc::new(FixedAnswer), "oai-events");

        let connected = tokio_test::assert_ok!(
            negotiator
                .start_connection(&credential(), Arc::new(DiscardSink))
                .await
        );

        let peer = platform.last_peer().unwrap();
        assert_eq!(peer.track_count(), 1);
        assert_eq!(peer.remote_description(), Some(SessionDescription::answer("v=0 answer")));
        assert_eq!(peer.local_description(), connected.connection.local_description().cloned());
        assert_eq!(connected.channel.label(), "oai-events");
        assert_eq!(connected.channel.state(), ChannelState::Connecting);
    }

    #[tokio::test]
    async fn test_microphone_denied() {
        let platform = Arc::new(MemoryPlatform::denying_microphone());
        let negotiator = Negotiator::new(platform.clone(), Arc::new(FixedAnswer), "oai-events");

        let result = negotiator
            .start_connection(&credential(), Arc::new(DiscardSink))
            .await;

        assert!(matches!(result, Err(ConnectError::MediaAccessDenied(_))));
        assert!(platform.last_peer().is_none());
    }

    #[tokio::test]
    async fn test_rejected_offer_releases_resources() {
        let platform = Arc::new(MemoryPlatform::new());
        let negotiator = Negotiator::new(platform.clone(), Arc::new(Rejecting), "oai-events");

        let result = negotiator
            .start_connection(&credential(), Arc::new(DiscardSink))
            .await;

        assert!(matches!(result, Err(ConnectError::NegotiationFailed(_))));
        let peer = platform.last_peer().unwrap();
        assert!(peer.is_closed());
        assert!(peer.channel().unwrap().is_closed());
        assert!(platform.tracks().iter().all(|t| t.is_stopped()));
    }

    #[tokio::test]
    async fn test_credential_failure_surfaces() {
        let platform = Arc::new(MemoryPlatform::new());
        let negotiator = Negotiator::new(platform.clone(), Arc::new(FixedAnswer), "oai-events");

        let result = negotiator.connect(&NoCredentials, Arc::new(DiscardSink)).await;

        assert!(matches!(result, Err(ConnectError::Credential(_))));
        assert!(platform.tracks().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_runs_every_step() {
        let platform = Arc::new(MemoryPlatform::with_failing_teardown());
        let negotiator = Negotiator::new(platform.clone(), Arc::new(FixedAnswer), "oai-events");
        let connected = negotiator
            .start_connection(&credential(), Arc::new(DiscardSink))
            .await
            .unwrap();

        let mut slot = Some(connected.connection);
        stop_connection(&mut slot);

        assert!(slot.is_none());
        let peer = platform.last_peer().unwrap();
        assert!(peer.channel().unwrap().is_closed());
        assert!(platform.tracks().iter().all(|t| t.is_stopped()));
        assert!(peer.is_closed());
        assert_eq!(connected.channel.state(), ChannelState::Closed);
    }

    #[test]
    fn test_stop_without_connection_is_noop() {
        let mut slot: Option<TransportConnection> = None;
        stop_connection(&mut slot);
        stop_connection(&mut slot);
        assert!(slot.is_none());
    }

    #[tokio::test]
    async fn test_close_reports_failures() {
        let platform = Arc::new(MemoryPlatform::with_failing_teardown());
        let negotiator = Negotiator::new(platform, Arc::new(FixedAnswer), "oai-events");
        let connected = negotiator
            .start_connection(&credential(), Arc::new(DiscardSink))
            .await
            .unwrap();

        assert_eq!(connected.connection.close(), 3);
    }
}
