//! # Realtime Audio Relay - Main Application Entry Point
//!
//! Boots an Actix-web server that accepts browser WebSocket connections carrying
//! raw audio frames and relays them to an upstream realtime speech API, sending
//! finished transcripts back down the same socket.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: Every connection is an actor driven by the async runtime
//! - **modules**: Transport, protocol and relay logic live in separate modules
//! - **Result<T, E>**: Startup failures bubble up through `anyhow::Result`
//! - **Arc & RwLock**: Shared config, metrics and the session registry
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, TOML file, environment variables)
//! - **state**: Shared application state, metrics and the session registry
//! - **audio**: Per-session relay state machine (frame buffer, commit scheduling, response tracking)
//! - **realtime**: Upstream wire protocol and the upstream WebSocket client
//! - **websocket**: The actor that bridges one downstream client to one upstream connection
//! - **health / handlers**: Operational HTTP endpoints
//! - **middleware**: Request metrics
//! - **error**: Error types and HTTP error responses

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod realtime;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** through `tracing`
/// 3. **Creates shared application state** used by every connection
/// 4. **Starts the HTTP/WebSocket server**
/// 5. **Stops gracefully** on SIGINT or SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting realtime-audio-relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} -> {} (model {})",
        config.server.host, config.server.port, config.upstream.url, config.upstream.model
    );

    if !config.upstream.has_api_key() {
        warn!("No upstream API key configured; upstream handshakes will be sent without Authorization");
    }

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Listening for relay clients on ws://{}/", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .route("/", web::get().to(websocket::relay_websocket))
            .route("/ws", web::get().to(websocket::relay_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/sessions", web::get().to(handlers::list_sessions))
                    .route("/sessions/{session_id}", web::get().to(handlers::get_session)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            match signal {
                Ok(name) => info!("Received {}, stopping server...", name),
                Err(e) => error!("Signal handler failed ({}), stopping server...", e),
            }
            // Graceful stop lets the relay actors run their teardown.
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// `RUST_LOG` controls the filter; it defaults to
/// `realtime_audio_relay=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realtime_audio_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves with the name of the first shutdown signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
