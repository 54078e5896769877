//! In-process media platform.
//!
//! Useful for development and tests: the "remote" side of each connection
//! is driven by hand through [`MemoryPeer`].

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    peer::{
        ChannelHandle, ChannelSignal, DataChannel, MediaError, MediaPlatform, MediaTrack,
        PeerConnection, RemoteTrack, TrackSink, TransportError,
    },
    protocol::{ChannelMessage, SessionDescription},
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Local audio track.
pub struct MemoryTrack {
    id: String,
    stopped: AtomicBool,
    fail_stop: bool,
}

impl MemoryTrack {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stopped: AtomicBool::new(false),
            fail_stop: false,
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MemoryTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) -> Result<(), TransportError> {
        self.stopped.store(true, Ordering::SeqCst);
        if self.fail_stop {
            return Err(TransportError::new("track refused to stop"));
        }
        Ok(())
    }
}

/// Data channel whose sent frames are recorded.
pub struct MemoryDataChannel {
    label: String,
    sent: Mutex<Vec<String>>,
    signals: mpsc::UnboundedSender<ChannelSignal>,
    closed: AtomicBool,
    fail_close: bool,
}

impl MemoryDataChannel {
    /// Create a channel and the receiver for its notifications.
    #[must_use]
    pub fn new(label: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelSignal>) {
        Self::build(label.into(), false)
    }

    fn build(label: String, fail_close: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelSignal>) {
        let (signals, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            label,
            sent: Mutex::new(Vec::new()),
            signals,
            closed: AtomicBool::new(false),
            fail_close,
        });
        (channel, rx)
    }

    /// Frames transmitted so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Simulate the channel opening.
    pub fn open(&self) {
        let _ = self.signals.send(ChannelSignal::Open);
    }

    /// Simulate a frame arriving from the peer.
    pub fn deliver(&self, text: &str) {
        let _ = self
            .signals
            .send(ChannelSignal::Message(ChannelMessage::from(text)));
    }

    /// Simulate the peer closing the channel.
    pub fn remote_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.signals.send(ChannelSignal::Closed);
    }
}

impl DataChannel for MemoryDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::new("data channel closed"));
        }
        lock(&self.sent).push(text.to_string());
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.signals.send(ChannelSignal::Closed);
        }
        if self.fail_close {
            return Err(TransportError::new("data channel refused to close"));
        }
        Ok(())
    }
}

/// Peer connection state inspectable from tests.
#[derive(Default)]
pub struct MemoryPeer {
    tracks: Mutex<Vec<Arc<dyn MediaTrack>>>,
    sink: Mutex<Option<Arc<dyn TrackSink>>>,
    channel: Mutex<Option<Arc<MemoryDataChannel>>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    closed: AtomicBool,
    fail_teardown: bool,
}

impl MemoryPeer {
    /// The data channel created on this peer, if any.
    #[must_use]
    pub fn channel(&self) -> Option<Arc<MemoryDataChannel>> {
        lock(&self.channel).clone()
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        lock(&self.tracks).len()
    }

    #[must_use]
    pub fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.local).clone()
    }

    #[must_use]
    pub fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.remote).clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver a remote track to the registered sink.
    pub fn emit_track(&self, id: &str) {
        if let Some(sink) = lock(&self.sink).as_ref() {
            sink.attach(RemoteTrack { id: id.to_string() });
        }
    }
}

#[async_trait]
impl PeerConnection for MemoryPeer {
    fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), TransportError> {
        lock(&self.tracks).push(track);
        Ok(())
    }

    fn set_track_sink(&self, sink: Arc<dyn TrackSink>) {
        *lock(&self.sink) = Some(sink);
    }

    fn create_data_channel(&self, label: &str) -> Result<ChannelHandle, TransportError> {
        let (channel, signals) = MemoryDataChannel::build(label.to_string(), self.fail_teardown);
        *lock(&self.channel) = Some(Arc::clone(&channel));
        Ok(ChannelHandle { channel, signals })
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer("v=0\r\no=memory 0 0 IN IP4 127.0.0.1\r\n"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        *lock(&self.local) = Some(desc);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        *lock(&self.remote) = Some(desc);
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_teardown {
            return Err(TransportError::new("peer connection refused to close"));
        }
        Ok(())
    }
}

/// In-process [`MediaPlatform`].
#[derive(Default)]
pub struct MemoryPlatform {
    deny_microphone: bool,
    fail_teardown: bool,
    peers: Mutex<Vec<Arc<MemoryPeer>>>,
    tracks: Mutex<Vec<Arc<MemoryTrack>>>,
    next_id: AtomicUsize,
}

impl MemoryPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A platform whose microphone prompt is always refused.
    #[must_use]
    pub fn denying_microphone() -> Self {
        Self {
            deny_microphone: true,
            ..Self::default()
        }
    }

    /// A platform whose channel close, track stop and connection close
    /// all report errors (while still taking effect).
    #[must_use]
    pub fn with_failing_teardown() -> Self {
        Self {
            fail_teardown: true,
            ..Self::default()
        }
    }

    /// Most recently created peer connection.
    #[must_use]
    pub fn last_peer(&self) -> Option<Arc<MemoryPeer>> {
        lock(&self.peers).last().cloned()
    }

    /// Every microphone track handed out.
    #[must_use]
    pub fn tracks(&self) -> Vec<Arc<MemoryTrack>> {
        lock(&self.tracks).clone()
    }
}

#[async_trait]
impl MediaPlatform for MemoryPlatform {
    async fn request_microphone(&self) -> Result<Arc<dyn MediaTrack>, MediaError> {
        if self.deny_microphone {
            return Err(MediaError::PermissionDenied("user dismissed the prompt".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let track = Arc::new(MemoryTrack {
            id: format!("mic-{id}"),
            stopped: AtomicBool::new(false),
            fail_stop: self.fail_teardown,
        });
        lock(&self.tracks).push(Arc::clone(&track));
        Ok(track)
    }

    fn create_peer_connection(&self) -> Result<Arc<dyn PeerConnection>, TransportError> {
        let peer = Arc::new(MemoryPeer {
            fail_teardown: self.fail_teardown,
            ..MemoryPeer::default()
        });
        lock(&self.peers).push(Arc::clone(&peer));
        Ok(peer)
    }
}
