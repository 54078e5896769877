//! Append-only raw event log with live broadcast.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::Event;

/// Default number of events retained.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// In-memory log of every event sent or received during a session.
///
/// The canonical order is most-recent-first. Recorded events are never
/// mutated; once the log is full the oldest entry is evicted.
pub struct EventLog {
    entries: RwLock<VecDeque<Event>>,
    capacity: usize,
    sender: broadcast::Sender<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create a log with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    /// Create a log retaining at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            sender,
        }
    }

    /// Record an event at the head of the log and notify live listeners.
    pub fn push(&self, event: Event) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.capacity {
            entries.pop_back();
        }
        entries.push_front(event.clone());
        // Sent under the write lock; `history_plus_stream` subscribes under the read lock.
        let _ = self.sender.send(event);
    }

    /// Drop every recorded event.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most-recent-first copy of the log.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Arrival-order copy of the log.
    #[must_use]
    pub fn chronological(&self) -> Vec<Event> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Stream that yields recorded events in arrival order, then live ones.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, Event> {
        let (history, rx) = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            let rx = self.sender.subscribe();
            (entries.iter().rev().cloned().collect::<Vec<_>>(), rx)
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}
