//! Server setup and initialization
//!
//! Wires storage, the version manager, the upstream client, the backup
//! scheduler and the HTTP routes into one axum application.

use crate::{
    api::{create_webhook_routes, create_workflow_routes, AppState},
    compare::ComparisonRules,
    config::Config,
    hubspot::HubSpotClient,
    runtime::BackupScheduler,
    versioning::{SyncService, VersionManager},
    workflow::storage::WorkflowStorage,
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Everything a running server holds on to.
pub struct Application {
    pub router: Router,
    pub scheduler: Arc<BackupScheduler>,
}

/// Build the router over already-constructed services.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_webhook_routes())
        .with_state(state)
}

/// Create the application with all components wired together.
pub async fn create_app(config: Config) -> Result<Application> {
    let db_path = config.database.database_path();
    tracing::info!("📋 Initializing workflow storage");
    let storage = WorkflowStorage::connect(&db_path, config.database.max_connections).await?;

    let manager = Arc::new(VersionManager::new(
        storage,
        Arc::new(ComparisonRules::default()),
        config.versioning.max_retries,
    ));

    tracing::info!("🌍 Initializing HubSpot client for {}", config.hubspot.api_base);
    if config.hubspot.access_token.is_empty() {
        tracing::warn!("⚠️ HUBSPOT_ACCESS_TOKEN is not set; upstream calls will be unauthenticated");
    }
    let client = HubSpotClient::new(&config.hubspot)?;
    let sync = Arc::new(SyncService::new(Arc::clone(&manager), Arc::new(client)));

    tracing::info!("⏰ Initializing backup scheduler");
    let scheduler = Arc::new(
        BackupScheduler::new(
            Arc::clone(&sync),
            Arc::clone(&manager),
            config.scheduler.clone(),
        )
        .await
        .context("failed to initialize backup scheduler")?,
    );

    let router = build_router(AppState { manager, sync });
    tracing::info!("✅ Application initialized successfully");

    Ok(Application { router, scheduler })
}

/// Start the HTTP server with the given configuration.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("workflowguard=info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting WorkflowGuard server...");

    let app = create_app(config.clone()).await?;

    let scheduler = Arc::clone(&app.scheduler);
    tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            tracing::error!("❌ Failed to start backup scheduler: {}", e);
        }
    });

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.router.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
