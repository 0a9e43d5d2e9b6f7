//! SPID Service Provider server.

mod audit;
mod config;
mod logging;

use axum::{routing::get, Router};
use config::Config;
use spid_api_saml::events::DEFAULT_EVENT_CAPACITY;
use spid_api_saml::{
    run_migrations, spid_router, EventPublisher, IdpRegistry, InMemoryReplayCache,
    InMemorySessionStore, OpensslToolkit, PostgresReplayCache, PostgresSessionStore, ReplayCache,
    SessionStore, SpidState,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: failed to load .env: {e}");
        }
    }

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        env = %config.app_env,
        entity_id = %config.entity_id,
        "Starting SPID service provider"
    );

    let sp = match config.sp_config() {
        Ok(sp) => sp,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };

    let registry = match IdpRegistry::from_file(&config.idp_registry_file) {
        Ok(registry) => {
            info!(providers = registry.len(), "Identity provider registry loaded");
            registry
        }
        Err(e) => {
            tracing::error!(
                path = %config.idp_registry_file.display(),
                "Failed to load identity provider registry: {e}"
            );
            std::process::exit(1);
        }
    };

    let toolkit = match OpensslToolkit::new(&sp) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            tracing::error!("Invalid SP credentials: {e}");
            std::process::exit(1);
        }
    };

    let session_lifetime = Duration::from_secs(sp.session_lifetime_seconds);
    let (replay_cache, session_store): (Arc<dyn ReplayCache>, Arc<dyn SessionStore>) =
        match &config.database_url {
            Some(database_url) => {
                let pool = match PgPoolOptions::new()
                    .max_connections(10)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(database_url)
                    .await
                {
                    Ok(pool) => {
                        info!("Database connection established");
                        pool
                    }
                    Err(e) => {
                        tracing::error!("Failed to connect to database: {e}");
                        std::process::exit(1);
                    }
                };

                if let Err(e) = run_migrations(&pool).await {
                    tracing::error!("Failed to run migrations: {e}");
                    std::process::exit(1);
                }

                let cache =
                    Arc::new(PostgresReplayCache::new(pool.clone(), sp.clock_skew_seconds));
                let sessions = Arc::new(PostgresSessionStore::new(pool, session_lifetime));
                spawn_cleanup(cache.clone(), sessions.clone());
                (cache, sessions)
            }
            None => {
                info!("DATABASE_URL not set, using in-memory replay cache and session store");
                (
                    Arc::new(InMemoryReplayCache::new(sp.clock_skew_seconds)),
                    Arc::new(InMemorySessionStore::new(session_lifetime)),
                )
            }
        };

    let (events, receiver) = EventPublisher::new(DEFAULT_EVENT_CAPACITY);
    audit::start_audit_observer(receiver);

    let state = SpidState::new(sp, registry, toolkit, session_store, replay_cache, events);

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(spid_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let addr: SocketAddr = match config.bind_addr().parse() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("Invalid bind address '{}': {e}", config.bind_addr());
            std::process::exit(1);
        }
    };

    info!(%addr, "Server listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to address {addr}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }

    info!("Server shutdown complete");
}

/// Periodically delete consumed-assertion and session rows past their expiry.
fn spawn_cleanup(cache: Arc<PostgresReplayCache>, sessions: Arc<PostgresSessionStore>) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(15 * 60);
        loop {
            tokio::time::sleep(interval).await;
            match cache.cleanup_expired().await {
                Ok(count) if count > 0 => {
                    tracing::info!(
                        target: "security",
                        deleted = count,
                        "Cleaned up expired consumed assertions"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        target: "security",
                        error = %e,
                        "Failed to clean up expired consumed assertions"
                    );
                }
            }
            if let Err(e) = sessions.cleanup_expired().await {
                tracing::warn!(error = %e, "Failed to clean up idle browser sessions");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
