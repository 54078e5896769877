//! Relay server holding the provider API key.
//!
//! Clients never see the long-lived key: `GET /token` mints a short-lived
//! realtime credential and `POST /analyze` forwards summarization requests.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use reqwest::Client;
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Provider API base, e.g. `https://api.openai.com/v1`.
    pub upstream: String,
    pub api_key: String,
    /// Realtime model the minted credential is scoped to.
    pub model: String,
    pub voice: String,
}

impl RelayConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            upstream: "https://api.openai.com/v1".to_string(),
            api_key: api_key.into(),
            model: voice_tutor_core::config::DEFAULT_MODEL.to_string(),
            voice: "verse".to_string(),
        }
    }
}

/// Relay handler state.
#[derive(Clone)]
pub struct RelayState {
    client: Client,
    config: Arc<RelayConfig>,
}

impl RelayState {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.upstream.trim_end_matches('/'))
    }

    async fn forward(&self, path: &str, body: &Value) -> Response {
        let result = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => return bad_gateway(&format!("upstream request failed: {e}")),
        };

        let status = response.status();
        if !status.is_success() {
            return bad_gateway(&format!("upstream returned {status}"));
        }

        match response.json::<Value>().await {
            Ok(value) => Json(value).into_response(),
            Err(e) => bad_gateway(&format!("invalid upstream body: {e}")),
        }
    }
}

fn bad_gateway(message: &str) -> Response {
    tracing::warn!("Relay error: {message}");
    (StatusCode::BAD_GATEWAY, Json(json!({ "error": message }))).into_response()
}

/// Mint a short-lived realtime credential.
pub async fn token_handler(State(state): State<RelayState>) -> Response {
    let body = json!({
        "model": state.config.model,
        "voice": state.config.voice,
    });
    state.forward("/realtime/sessions", &body).await
}

/// Server-mediated transcript analysis.
pub async fn analyze_handler(State(state): State<RelayState>, Json(body): Json<Value>) -> Response {
    state.forward("/chat/completions", &body).await
}

/// Create the relay router.
///
/// # Example
/// ```ignore
/// let app = create_relay_router(RelayConfig::new(api_key));
/// axum::serve(listener, app).await?;
/// ```
#[must_use]
pub fn create_relay_router(config: RelayConfig) -> Router {
    Router::new()
        .route("/token", get(token_handler))
        .route("/analyze", post(analyze_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(RelayState::new(config))
}
