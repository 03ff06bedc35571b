use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use healthcheck_api::config::Config;
use healthcheck_api::handlers::health::{health_check, AppState};
use healthcheck_api::registry::ConnectionRegistry;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "healthcheck_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let registry = Arc::new(ConnectionRegistry::new(config.clone()));
    let state = AppState {
        config: config.clone(),
        registry,
    };

    let app = Router::new()
        .route("/api/health-check", get(health_check))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    tracing::info!("Starting health-check server on {}", config.server_addr);

    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .unwrap();
    axum::serve(listener, app).await.unwrap();
}
