//! Per-context transcript kept in sync with the shared record.

use std::sync::{Arc, PoisonError, RwLock};

use futures::StreamExt;
use tokio::{sync::watch, task::JoinHandle};
use voice_tutor_core::{
    Event, Transcript, TranscriptEntry, TranscriptSource, TranscriptStore,
};

/// In-memory transcript for one execution context.
///
/// Local changes update memory first and then overwrite the shared record;
/// changes from other contexts arrive through [`follow`](Self::follow).
pub struct TranscriptView {
    transcript: RwLock<Transcript>,
    store: Arc<dyn TranscriptStore>,
    updates: watch::Sender<Vec<TranscriptEntry>>,
}

impl TranscriptView {
    /// Create a view seeded from the shared record.
    #[must_use]
    pub fn hydrate(store: Arc<dyn TranscriptStore>) -> Self {
        let transcript = Transcript::from_entries(store.load());
        let (updates, _) = watch::channel(transcript.entries().to_vec());
        Self {
            transcript: RwLock::new(transcript),
            store,
            updates,
        }
    }

    /// Project one event. If it adds an entry, persist the full list.
    pub fn apply(&self, event: &Event) -> Option<TranscriptEntry> {
        let (entry, snapshot) = {
            let mut transcript = self
                .transcript
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let entry = transcript.apply(event)?.clone();
            (entry, transcript.entries().to_vec())
        };

        if let Err(e) = self.store.save(&snapshot) {
            tracing::warn!("Failed to persist transcript: {e}");
        }
        self.updates.send_replace(snapshot);
        Some(entry)
    }

    /// Adopt a list written by another context.
    pub fn replace(&self, entries: Vec<TranscriptEntry>) {
        let snapshot = {
            let mut transcript = self
                .transcript
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            transcript.replace(entries);
            transcript.entries().to_vec()
        };
        self.updates.send_replace(snapshot);
    }

    /// Forget the transcript here and in the shared record.
    pub fn clear(&self) {
        self.transcript
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if let Err(e) = self.store.clear() {
            tracing::warn!("Failed to clear shared transcript: {e}");
        }
        self.updates.send_replace(Vec::new());
    }

    #[must_use]
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.transcript
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
            .to_vec()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transcript
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver that always holds the latest list.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Vec<TranscriptEntry>> {
        self.updates.subscribe()
    }

    /// Follow writes made by other contexts until the task is aborted.
    #[must_use]
    pub fn follow(self: &Arc<Self>) -> JoinHandle<()> {
        let view = Arc::clone(self);
        let mut changes = self.store.subscribe();
        tokio::spawn(async move {
            while let Some(entries) = changes.next().await {
                tracing::debug!(entries = entries.len(), "Transcript changed in another context");
                view.replace(entries);
            }
        })
    }
}

impl TranscriptSource for TranscriptView {
    fn current(&self) -> Vec<TranscriptEntry> {
        self.entries()
    }
}
