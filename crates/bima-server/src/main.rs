//! Bima Vehicle Compliance Platform - Main Server

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use bima_api::AppState;
use bima_db::{create_pool, run_migrations, DatabaseConfig};
use config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    let settings = Settings::load().context("Failed to load configuration")?;

    info!(
        "Starting Bima Vehicle Compliance Platform v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Database
    info!("Connecting to PostgreSQL...");
    let db_config = DatabaseConfig {
        url: settings.database.url.clone(),
        max_connections: settings.database.max_connections,
        min_connections: 2,
        acquire_timeout_secs: 30,
        idle_timeout_secs: 600,
    };
    let db_pool = create_pool(&db_config).await?;
    run_migrations(&db_pool).await?;

    anyhow::ensure!(
        settings.session.secret.len() >= 32,
        "session.secret must be at least 32 characters"
    );

    // Application state
    let state = AppState::new(
        db_pool,
        settings.session.ttl_hours,
        settings.defaults.expiry_reminder_days,
    );

    // Background reconciler: daily expiry sweep + reminders
    let shutdown = Arc::new(AtomicBool::new(false));
    let reconciler = Arc::new(state.reconciler());
    let reconciler_handle = tokio::spawn(reconciler.run(
        Duration::from_secs(settings.reconciler.interval_secs),
        shutdown.clone(),
    ));
    info!(
        interval_secs = settings.reconciler.interval_secs,
        "Reconciler scheduled"
    );
    if let Some(broker) = &settings.reconciler.broker_url {
        info!(broker = %broker, "Broker configured for external delivery adapters");
    }

    // HTTP server
    let app = create_app(state);
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("Invalid server address")?;

    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.store(true, Ordering::Relaxed);
    reconciler_handle.abort();
    info!("Server stopped");

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bima=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn create_app(state: AppState) -> Router {
    bima_api::create_router_with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
