//! OpenAPI document served at `/api-docs/openapi.json`

use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::auth::models;
use crate::error::ApiError;
use crate::handlers::{auth, health, tenants};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "CRM Auth API",
        description = "Multi-tenant authentication, session and authorization core"
    ),
    paths(
        health::health_check,
        health::readiness_check,
        auth::register_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::logout_all_handler,
        auth::refresh_handler,
        auth::accept_invitation_handler,
        auth::change_password_handler,
        auth::me_handler,
        tenants::context_handler,
        tenants::create_invitation_handler,
        tenants::list_members_handler,
        tenants::change_role_handler,
        tenants::deactivate_member_handler,
    ),
    components(schemas(
        ApiError,
        health::HealthResponse,
        health::ReadinessResponse,
        health::ReadinessChecks,
        models::RegisterRequest,
        models::LoginRequest,
        models::RefreshRequest,
        models::AcceptInvitationRequest,
        models::ChangePasswordRequest,
        models::CreateInvitationRequest,
        models::ChangeRoleRequest,
        models::UserInfo,
        models::TenantInfo,
        models::MembershipInfo,
        models::RegisterResponse,
        models::LoginResponse,
        models::RefreshResponse,
        models::ContextResponse,
        models::InvitationResponse,
        models::MemberInfo,
        models::SessionsRevokedResponse,
        models::MessageResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Liveness and readiness"),
        (name = "auth", description = "Login, sessions and credentials"),
        (name = "tenants", description = "Tenant-scoped membership administration"),
    )
)]
pub struct ApiDoc;

/// Registers the `bearer_auth` scheme referenced by protected paths
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("Opaque session token"))
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();

        assert!(paths.iter().any(|p| p.as_str() == "/api/v1/auth/login"));
        assert!(paths
            .iter()
            .any(|p| p.as_str() == "/api/v1/tenants/{tenant}/members/{user_id}/role"));
        assert_eq!(doc.paths.paths.len(), 15);
    }

    #[test]
    fn test_bearer_scheme_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
