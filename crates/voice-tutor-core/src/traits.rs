//! Collaborator traits: credentials, transcript storage and summarization.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::TranscriptEntry;

/// Short-lived bearer secret for the signaling exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for building an `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Credential error.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential request failed: {0}")]
    Request(String),
    #[error("Credential endpoint returned status {0}")]
    Status(u16),
    #[error("Credential response has no client secret")]
    MissingSecret,
}

/// Supplies bearer credentials on demand.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a fresh credential.
    async fn fetch_credential(&self) -> Result<Credential, CredentialError>;
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to encode transcript: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Persisted transcript shared between execution contexts (tabs).
///
/// Writers overwrite the whole list; the last write wins.
pub trait TranscriptStore: Send + Sync {
    /// Read the shared record, or an empty list if absent or unparseable.
    fn load(&self) -> Vec<TranscriptEntry>;

    /// Overwrite the shared record with `entries`.
    ///
    /// # Errors
    /// Returns error if the entries cannot be encoded or written.
    fn save(&self, entries: &[TranscriptEntry]) -> Result<(), StoreError>;

    /// Remove the shared record.
    ///
    /// # Errors
    /// Returns error if the backing store is unusable.
    fn clear(&self) -> Result<(), StoreError>;

    /// Changes made by *other* contexts, delivered as the newly parsed list.
    ///
    /// Writes made through this handle are not echoed back.
    fn subscribe(&self) -> BoxStream<'static, Vec<TranscriptEntry>>;
}

/// Read access to the current transcript, evaluated each time it is called.
pub trait TranscriptSource: Send + Sync {
    fn current(&self) -> Vec<TranscriptEntry>;
}

impl<F> TranscriptSource for F
where
    F: Fn() -> Vec<TranscriptEntry> + Send + Sync,
{
    fn current(&self) -> Vec<TranscriptEntry> {
        self()
    }
}

/// One message of a summarization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Summarization error.
#[derive(Debug, Error)]
pub enum SummarizationError {
    #[error("Summarization request failed: {0}")]
    Request(String),
    #[error("Summarization endpoint returned status {0}")]
    Status(u16),
    #[error("Summarization response has no content")]
    MissingContent,
}

/// Remote text-completion collaborator.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `messages` under the given system instructions.
    async fn summarize(
        &self,
        instructions: &str,
        messages: &[ChatMessage],
    ) -> Result<String, SummarizationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("ek_secret");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
        assert_eq!(credential.expose(), "ek_secret");
    }
}
