use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qpulse_api::background::sampler::Sampler;
use qpulse_api::config::ServerConfig;
use qpulse_api::router::build_app_router;
use qpulse_api::state::AppState;
use qpulse_api::ws;
use qpulse_store::{RedisConfig, RedisStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "qpulse_api=info,qpulse_store=info,tower_http=info".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let subscriber = tracing_subscriber::registry().with(filter);
    if json_logs {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid server configuration");
        std::process::exit(1);
    });
    let redis_config = RedisConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid Redis configuration");
        std::process::exit(1);
    });
    tracing::info!(
        host = %config.host,
        port = config.port,
        redis = %redis_config.url(),
        interval_ms = config.sampler.interval.as_millis() as u64,
        "Loaded configuration",
    );

    // --- Store ---
    let store = RedisStore::new(redis_config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to configure Redis client");
        std::process::exit(1);
    });

    // --- App state ---
    let state = AppState::new(config.clone());
    let cancel = CancellationToken::new();

    // --- Sampler ---
    let sampler = Sampler::new(
        Arc::new(store),
        state.hub.clone(),
        config.sampler.key_patterns(),
    );
    let sampler_handle = tokio::spawn(sampler.run(
        config.sampler.interval,
        Arc::clone(&state.sampler_nudge),
        cancel.clone(),
    ));

    // --- Heartbeat + poll sweeper ---
    let heartbeat_handle =
        ws::start_heartbeat(Arc::clone(&state.registry), config.transport.heartbeat_interval);
    let sweeper_handle = tokio::spawn(ws::poll::run_sweeper(state.clone(), cancel.clone()));

    tracing::info!("Background services started (sampler, heartbeat, poll sweeper)");

    // --- Router ---
    let app = build_app_router(state.clone(), &config);

    // --- Start server ---
    let ip: IpAddr = config.host.parse().unwrap_or_else(|e| {
        tracing::error!(host = %config.host, error = %e, "Invalid HOST address");
        std::process::exit(1);
    });
    let addr = SocketAddr::new(ip, config.port);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind listening port");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "Dashboard server ready");

    // On signal: stop background loops and close every viewer session so
    // in-flight long polls return before the server drains.
    let shutdown = {
        let state = state.clone();
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
            let viewers = state.registry.connection_count().await;
            tracing::info!(viewers, "Closing viewer sessions");
            state.registry.shutdown_all().await;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // The sampler finishes its in-flight tick before stopping.
    cancel.cancel();
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let _ = tokio::time::timeout(shutdown_timeout, sampler_handle).await;
    let _ = tokio::time::timeout(shutdown_timeout, sweeper_handle).await;
    tracing::info!("Sampler and poll sweeper stopped");

    heartbeat_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
