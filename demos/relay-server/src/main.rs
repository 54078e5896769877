//! Relay server that keeps the provider key off the client.
//!
//! Run with: OPENAI_API_KEY=sk-... cargo run -p relay-server-example
//!
//! Clients then fetch credentials from `http://127.0.0.1:3000/token` and send
//! analysis requests to `http://127.0.0.1:3000/analyze`.

use std::net::SocketAddr;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_tutor_core::load_config;
use voice_tutor_transport::server::{RelayConfig, create_relay_router};

const DEFAULT_ADDR: &str = "127.0.0.1:3000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?;
    let client_config = load_config(None);

    let mut relay = RelayConfig::new(api_key);
    relay.model = client_config.model;
    if let Ok(upstream) = std::env::var("RELAY_UPSTREAM") {
        relay.upstream = upstream;
    }

    let addr: SocketAddr = std::env::var("RELAY_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .context("RELAY_ADDR is not a socket address")?;

    let app = create_relay_router(relay);

    tracing::info!("Relay listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
