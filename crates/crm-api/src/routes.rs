//! API route definitions

use crate::handlers::{auth, health, tenants};
use crate::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

/// Liveness and readiness probes
pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
}

/// Create API v1 routes
///
/// Guards live in the handlers' extractors, so public and protected routes
/// can share one router.
pub fn api_routes() -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/accept-invitation", post(auth::accept_invitation_handler));

    // Authenticated, any tenant
    let session_routes = Router::new()
        .route("/auth/logout-all", post(auth::logout_all_handler))
        .route("/auth/change-password", post(auth::change_password_handler))
        .route("/auth/me", get(auth::me_handler));

    // Authenticated, bound to the :tenant segment
    let tenant_routes = Router::new()
        .route("/tenants/:tenant/context", get(tenants::context_handler))
        .route(
            "/tenants/:tenant/invitations",
            post(tenants::create_invitation_handler),
        )
        .route("/tenants/:tenant/members", get(tenants::list_members_handler))
        .route(
            "/tenants/:tenant/members/:user_id",
            axum::routing::delete(tenants::deactivate_member_handler),
        )
        .route(
            "/tenants/:tenant/members/:user_id/role",
            put(tenants::change_role_handler),
        );

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .merge(tenant_routes)
}
