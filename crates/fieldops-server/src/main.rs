//! FieldOps Server - Main entry point

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use fieldops_common::logging::{init_logging, LogConfig};
use serde_json::json;
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tracing::{info, warn};

use fieldops_server::{
    config::Config,
    db,
    entities::{PgEntityWriter, PgRecordSource, PgReferenceLookup},
    features::{self, FeatureState},
    jobs::{
        self, processor::RendererRegistry, validator::Validator, Collaborators, ExpiryReaper,
        JobRunner, JobStore, PgJobStore, TaskQueue, WorkerPool,
    },
    middleware, storage,
};

/// Application state for the top-level routes
#[derive(Clone)]
struct AppState {
    db: PgPool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("fieldops-server")
        .filter_directives("fieldops_server=debug,tower_http=debug,sqlx=info")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    info!(
        host = %hostname::get().map(|h| h.to_string_lossy().into_owned()).unwrap_or_default(),
        "Starting FieldOps server"
    );

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to the database")?;
    db::MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    info!("Database migrations completed");

    let artifacts = storage::from_config(&config.storage)
        .await
        .context("Failed to initialize artifact storage")?;
    info!(backend = ?config.storage.backend, "Artifact storage initialized");

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let renderers = RendererRegistry::with_defaults();
    let collaborators = Collaborators {
        entities: Arc::new(PgEntityWriter::new(pool.clone())),
        references: Arc::new(PgReferenceLookup::new(pool.clone())),
        records: Arc::new(PgRecordSource::new(pool.clone())),
        renderers: renderers.clone(),
    };
    let validator = Arc::new(Validator::new()?);
    let runner = Arc::new(JobRunner::new(
        store.clone(),
        artifacts.clone(),
        validator,
        collaborators,
        config.jobs.runner_settings(),
    ));

    let shutdown = CancellationToken::new();
    let (queue, receiver) = TaskQueue::channel(config.jobs.queue_capacity);
    let pool_handle = WorkerPool::spawn(runner, receiver, config.jobs.workers, shutdown.clone());

    // Workers are already draining the queue, so requeueing cannot stall on capacity
    jobs::recover(store.as_ref(), &queue, config.jobs.retention())
        .await
        .context("Failed to recover jobs from a previous run")?;

    let reaper_handle = ExpiryReaper::new(store.clone(), artifacts.clone(), config.jobs.reaper_interval())
        .spawn(shutdown.clone());

    let feature_state = FeatureState::new(store, artifacts, queue, config.jobs.max_upload_bytes)
        .with_renderers(renderers);
    let app = create_router(AppState { db: pool }, feature_state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    let grace = Duration::from_secs(config.server.shutdown_timeout_secs);
    wait_for("worker pool", pool_handle, grace).await;
    wait_for("expiry reaper", reaper_handle, grace).await;

    info!("Server shut down gracefully");

    Ok(())
}

/// Create the application router with all routes and middleware
fn create_router(state: AppState, feature_state: FeatureState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v1", features::router(feature_state))
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn health_check(State(state): State<AppState>) -> Result<Response, StatusCode> {
    match db::health_check(&state.db).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}

/// Jobs still running after the grace period are failed by recovery on the next start
async fn wait_for(name: &str, handle: JoinHandle<()>, grace: Duration) {
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(())) => info!("{} stopped", name),
        Ok(Err(e)) => warn!(error = %e, "{} task ended abnormally", name),
        Err(_) => warn!(grace_secs = grace.as_secs(), "{} did not stop in time", name),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
