//! In-memory per-origin storage shared by several execution contexts.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use futures::{StreamExt, future, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use uuid::Uuid;
use voice_tutor_core::{StoreError, TranscriptEntry, TranscriptStore};

/// Identifier of one execution context (tab, window, worker).
pub type ContextId = Uuid;

/// Change notification for one named slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// Context that made the write.
    pub source: ContextId,
}

/// Named-slot string store for one origin.
///
/// Every write is broadcast to all contexts; contexts filter out their own
/// writes. No locking across contexts: the last write wins.
pub struct LocalOrigin {
    slots: RwLock<HashMap<String, String>>,
    sender: broadcast::Sender<StorageChange>,
}

impl Default for LocalOrigin {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalOrigin {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            slots: RwLock::new(HashMap::new()),
            sender,
        }
    }

    /// Open a transcript store for a new execution context.
    #[must_use]
    pub fn context(self: &Arc<Self>, key: impl Into<String>) -> OriginStore {
        OriginStore {
            origin: Arc::clone(self),
            context: Uuid::new_v4(),
            key: key.into(),
        }
    }

    #[must_use]
    pub fn get_item(&self, key: &str) -> Option<String> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Write a slot on behalf of `source`.
    pub fn set_item(&self, source: ContextId, key: &str, value: String) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let old_value = slots.insert(key.to_string(), value.clone());
        let _ = self.sender.send(StorageChange {
            key: key.to_string(),
            old_value,
            new_value: Some(value),
            source,
        });
    }

    /// Remove a slot on behalf of `source`.
    pub fn remove_item(&self, source: ContextId, key: &str) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let Some(old_value) = slots.remove(key) else {
            return;
        };
        let _ = self.sender.send(StorageChange {
            key: key.to_string(),
            old_value: Some(old_value),
            new_value: None,
            source,
        });
    }

    /// Receiver for every change made in this origin.
    #[must_use]
    pub fn changes(&self) -> broadcast::Receiver<StorageChange> {
        self.sender.subscribe()
    }
}

fn parse_entries(raw: Option<&str>) -> Vec<TranscriptEntry> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!("Ignoring unparseable transcript record: {e}");
        Vec::new()
    })
}

/// One context's view of the shared transcript slot.
#[derive(Clone)]
pub struct OriginStore {
    origin: Arc<LocalOrigin>,
    context: ContextId,
    key: String,
}

impl OriginStore {
    #[must_use]
    pub const fn context_id(&self) -> ContextId {
        self.context
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl TranscriptStore for OriginStore {
    fn load(&self) -> Vec<TranscriptEntry> {
        parse_entries(self.origin.get_item(&self.key).as_deref())
    }

    fn save(&self, entries: &[TranscriptEntry]) -> Result<(), StoreError> {
        let value = serde_json::to_string(entries)?;
        self.origin.set_item(self.context, &self.key, value);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.origin.remove_item(self.context, &self.key);
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, Vec<TranscriptEntry>> {
        let origin = Arc::clone(&self.origin);
        let key = self.key.clone();
        let context = self.context;

        BroadcastStream::new(self.origin.changes())
            .filter_map(move |res| {
                let next = match res {
                    Ok(change) if change.source != context && change.key == key => {
                        Some(parse_entries(change.new_value.as_deref()))
                    }
                    Ok(_) => None,
                    // Missed notifications: resync from the slot itself.
                    Err(BroadcastStreamRecvError::Lagged(_)) => {
                        Some(parse_entries(origin.get_item(&key).as_deref()))
                    }
                };
                future::ready(next)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use voice_tutor_core::Role;

    use super::*;

    fn entry(key: &str, text: &str) -> TranscriptEntry {
        TranscriptEntry {
            key: key.to_string(),
            role: Role::User,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_load_missing_or_garbage_is_empty() {
        let origin = Arc::new(LocalOrigin::new());
        let store = origin.context("transcript");
        assert!(store.load().is_empty());

        origin.set_item(Uuid::new_v4(), "transcript", "{not json".to_string());
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_overwrites_full_list() {
        let origin = Arc::new(LocalOrigin::new());
        let store = origin.context("transcript");

        store.save(&[entry("a", "one")]).unwrap();
        store.save(&[entry("a", "one"), entry("b", "two")]).unwrap();

        assert_eq!(store.load().len(), 2);
        store.clear().unwrap();
        assert!(store.load().is_empty());
        assert!(origin.get_item("transcript").is_none());
    }

    #[tokio::test]
    async fn test_subscribers_see_other_contexts_only() {
        let origin = Arc::new(LocalOrigin::new());
        let tab_a = origin.context("transcript");
        let tab_b = origin.context("transcript");

        let mut a_changes = tab_a.subscribe();
        let mut b_changes = tab_b.subscribe();

        tab_a.save(&[entry("a", "hello")]).unwrap();
        tab_b.clear().unwrap();

        let seen_by_b = b_changes.next().await.unwrap();
        assert_eq!(seen_by_b, vec![entry("a", "hello")]);

        // A only hears about B's clear, never its own save.
        let seen_by_a = a_changes.next().await.unwrap();
        assert!(seen_by_a.is_empty());
    }

    #[tokio::test]
    async fn test_other_slots_are_ignored() {
        let origin = Arc::new(LocalOrigin::new());
        let store = origin.context("transcript");
        let mut changes = store.subscribe();

        origin.set_item(Uuid::new_v4(), "theme", "dark".to_string());
        origin.set_item(Uuid::new_v4(), "transcript", "[]".to_string());

        assert!(changes.next().await.unwrap().is_empty());
    }
}
