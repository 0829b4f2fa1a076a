//! CRM API Server
//!
//! REST server for the multi-tenant auth core.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use crm_api::{create_router, state::AppState};
use crm_core::{AppConfig, AuthStore, MemoryStore, PgStore, StoreBackend};

fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("CRM_CONFIG") {
        Ok(path) => AppConfig::from_file(&path)
            .with_context(|| format!("loading configuration from {path}"))?
            .with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    Ok(config)
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn AuthStore>> {
    match config.database.backend {
        StoreBackend::Postgres => {
            let store = PgStore::connect(&config.database).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; all data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Periodically delete sessions past their refresh expiry
fn spawn_session_sweeper(state: Arc<AppState>) {
    let secs = state.config.auth.sweep_interval_secs;
    if secs == 0 {
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(secs));
        loop {
            interval.tick().await;
            if let Err(e) = state.auth.sweep_expired_sessions(Utc::now()).await {
                tracing::warn!(error = %e, "Session sweep failed");
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("crm_api={0},tower_http={0}", config.logging.level).into());
    if config.logging.json_format {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let store = open_store(&config).await?;
    tracing::info!(backend = store.backend_name(), "Auth store ready");

    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Create application state
    let state = Arc::new(AppState::new(config, store));
    spawn_session_sweeper(state.clone());

    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("CRM API Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
