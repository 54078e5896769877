//! HTTP credential and signaling clients.

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Deserialize;
use thiserror::Error;
use voice_tutor_core::{Credential, CredentialError, CredentialProvider};

use crate::protocol::{SDP_CONTENT_TYPE, SessionDescription};

/// Credential endpoint response: `{"client_secret": {"value": "..."}}`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    client_secret: Option<ClientSecret>,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: Option<String>,
}

/// Fetches short-lived credentials with a single GET.
#[derive(Debug, Clone)]
pub struct HttpCredentialProvider {
    client: Client,
    url: String,
}

impl HttpCredentialProvider {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), url)
    }

    #[must_use]
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch_credential(&self) -> Result<Credential, CredentialError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::Status(status.as_u16()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        body.client_secret
            .and_then(|secret| secret.value)
            .filter(|value| !value.is_empty())
            .map(Credential::new)
            .ok_or(CredentialError::MissingSecret)
    }
}

/// Signaling error.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("Signaling request failed: {0}")]
    Request(String),
    #[error("Signaling endpoint rejected the offer with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Offer/answer exchange with the remote endpoint.
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Send the local offer and return the remote answer.
    async fn exchange(
        &self,
        offer: &SessionDescription,
        credential: &Credential,
    ) -> Result<SessionDescription, SignalingError>;
}

/// Posts the SDP offer to the realtime endpoint.
#[derive(Debug, Clone)]
pub struct HttpSignaling {
    client: Client,
    url: String,
}

impl HttpSignaling {
    /// `url` is the full signaling URL, including the model parameter.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), url)
    }

    #[must_use]
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl SignalingClient for HttpSignaling {
    async fn exchange(
        &self,
        offer: &SessionDescription,
        credential: &Credential,
    ) -> Result<SessionDescription, SignalingError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(credential.expose())
            .header(header::CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer.sdp.clone())
            .send()
            .await
            .map_err(|e| SignalingError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SignalingError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(SignalingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(SessionDescription::answer(body))
    }
}
