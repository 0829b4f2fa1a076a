//! CRM API - multi-tenant auth, session and authorization core
//!
//! Provides the authentication engine, session validation, role resolution
//! and the authorization guards every tenant-scoped handler goes through,
//! plus a thin REST surface to exercise them.

pub mod audit;
pub mod auth;
pub mod cookies;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the application router with all layers applied
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .merge(routes::health_routes())
        .nest("/api/v1", routes::api_routes())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(axum::middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Cookies are credentials, so only listed origins are allowed; an empty
/// list means same-origin only.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter(|origin| {
            let wildcard = origin.trim() == "*";
            if wildcard {
                tracing::warn!("Ignoring wildcard CORS origin; credentials require explicit origins");
            }
            !wildcard
        })
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Helpers for tests: in-memory store and cheap hashing parameters
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use crate::auth::{CredentialHasher, PasswordConfig};
    use crm_core::{AppConfig, MemoryStore};

    /// State over a fresh [`MemoryStore`]
    pub fn test_state() -> Arc<AppState> {
        test_state_with_store(Arc::new(MemoryStore::new()))
    }

    /// State over a caller-provided store, for seeding data directly
    pub fn test_state_with_store(store: Arc<MemoryStore>) -> Arc<AppState> {
        let mut config = AppConfig::default();
        config.auth.cookies.secure = false;
        Arc::new(AppState::with_hasher(
            config,
            store,
            CredentialHasher::new(PasswordConfig::insecure_fast()),
        ))
    }

    /// Create router for testing
    pub fn create_router_for_testing() -> Router {
        create_router(test_state())
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use testing::create_router_for_testing;
