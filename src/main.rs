//! SCRUD event relay
//!
//! Re-streams a backend chat session's event stream to browser clients,
//! normalizing its loosely structured lines into JSON frames.

mod api;
mod config;
mod relay;
mod upstream;

use api::{create_router, AppState};
use axum::http::{header, Method};
use config::RelayConfig;
use relay::Relay;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upstream::{HttpUpstream, RetryingUpstream};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scrud_relay=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = RelayConfig::from_env().inspect_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
    })?;

    tracing::info!(
        upstream = %config.upstream_base_url,
        idle_timeout_secs = config.relay.idle_timeout.as_secs(),
        max_attempts = config.retry.max_attempts,
        "Relay configured"
    );

    // Upstream client, wrapped with the retry policy
    let http = HttpUpstream::new(config.upstream_base_url.clone(), config.connect_timeout)?;
    let upstream = RetryingUpstream::new(Arc::new(http), config.retry);
    let relay = Relay::new(Arc::new(upstream), config.relay);

    // Create application state
    let state = AppState::new(relay);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("SCRUD relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
