//! Authorization guards
//!
//! Every protected handler goes through exactly one of [`require_auth`] or
//! [`require_tenant_auth`] (usually via the [`RequireAuth`] and
//! [`RequireTenantAuth`] extractors). The [`AuthContext`] they return is the
//! only place a handler may take a tenant id from.
//!
//! ```ignore
//! async fn list_contacts(
//!     RequireTenantAuth(ctx): RequireTenantAuth,
//! ) -> Result<Json<Vec<Contact>>, AppError> {
//!     require_permission(&ctx, "contacts", "read")?;
//!     Ok(Json(contacts_for(ctx.tenant_id()).await?))
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Path},
    http::{header, request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use crm_core::{AccessDenial, Role};
use thiserror::Error;

use super::validator::{AuthContext, Rejection};
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::error::{ApiError, AppError};
use crate::state::AppState;

/// Guard failures
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing, invalid, expired or timed-out token. Deliberately one variant.
    #[error("Authentication required")]
    Unauthenticated,

    #[error("session is not valid for tenant '{requested}'")]
    TenantMismatch { requested: String },

    #[error("requires one of roles: {}", role_list(.required))]
    MissingRole { required: Vec<Role> },

    #[error("requires permission {resource}:{action}")]
    MissingPermission { resource: String, action: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

fn role_list(roles: &[Role]) -> String {
    roles.iter().map(Role::as_str).collect::<Vec<_>>().join(", ")
}

impl AuthError {
    fn denial(&self) -> Option<AccessDenial> {
        match self {
            AuthError::TenantMismatch { requested } => Some(AccessDenial::TenantMismatch {
                requested: requested.clone(),
            }),
            AuthError::MissingRole { required } => Some(AccessDenial::MissingRole {
                required: required.clone(),
            }),
            AuthError::MissingPermission { resource, action } => {
                Some(AccessDenial::MissingPermission {
                    resource: resource.clone(),
                    action: action.clone(),
                })
            }
            AuthError::Unauthenticated | AuthError::Internal(_) => None,
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err.denial() {
            Some(denial) => AppError::Forbidden(ApiError::forbidden(denial.to_string())),
            None => match err {
                AuthError::Internal(msg) => AppError::Internal(msg),
                _ => AppError::Unauthorized(ApiError::unauthorized()),
            },
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

/// Session token from the request: cookie first, then `Authorization: Bearer`
///
/// Empty values count as absent, so a cleared cookie does not shadow the header.
pub fn extract_session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(cookie_name).filter(|c| !c.value().trim().is_empty()) {
        return Some(cookie.value().trim().to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Authenticate the request
pub async fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
    let token = extract_session_token(headers, &state.config.auth.cookies.session_cookie_name);

    match state.validator.validate_session(token.as_deref()).await {
        Ok(ctx) => Ok(ctx),
        Err(Rejection::Missing) => Err(AuthError::Unauthenticated),
        Err(Rejection::Store(err)) => Err(AuthError::Internal(err.to_string())),
        Err(rejection) => {
            audit_log(&AuditEvent::InvalidSession {
                reason: rejection.kind().to_string(),
                ip_address: extract_ip_address(headers),
                user_agent: extract_user_agent(headers),
            });
            Err(AuthError::Unauthenticated)
        }
    }
}

/// Authenticate the request and require its session to belong to `tenant_ident`
///
/// The identifier may be the tenant's slug or its id.
pub async fn require_tenant_auth(
    state: &AppState,
    headers: &HeaderMap,
    tenant_ident: &str,
) -> Result<AuthContext, AuthError> {
    let ctx = require_auth(state, headers).await?;

    if !ctx.tenant.matches_ident(tenant_ident) {
        let err = AuthError::TenantMismatch {
            requested: tenant_ident.to_string(),
        };
        audit_denied(&ctx, &format!("tenant:{tenant_ident}"), &err, Some(headers));
        return Err(err);
    }
    Ok(ctx)
}

pub fn require_permission(ctx: &AuthContext, resource: &str, action: &str) -> Result<(), AuthError> {
    if ctx.has_permission(resource, action) {
        return Ok(());
    }
    let err = AuthError::MissingPermission {
        resource: resource.to_string(),
        action: action.to_string(),
    };
    audit_denied(ctx, &format!("{resource}:{action}"), &err, None);
    Err(err)
}

pub fn require_role(ctx: &AuthContext, roles: &[Role]) -> Result<(), AuthError> {
    if roles.contains(&ctx.role()) {
        return Ok(());
    }
    let err = AuthError::MissingRole {
        required: roles.to_vec(),
    };
    audit_denied(ctx, &format!("roles:{}", role_list(roles)), &err, None);
    Err(err)
}

pub fn require_admin(ctx: &AuthContext) -> Result<(), AuthError> {
    require_role(ctx, &Role::ADMINS)
}

fn audit_denied(ctx: &AuthContext, resource: &str, err: &AuthError, headers: Option<&HeaderMap>) {
    audit_log(&AuditEvent::AccessDenied {
        user_id: Some(ctx.user.id),
        tenant: Some(ctx.tenant.slug.clone()),
        resource: resource.to_string(),
        reason: err.to_string(),
        ip_address: headers.and_then(extract_ip_address),
        user_agent: headers.and_then(extract_user_agent),
    });
}

/// Extractor for an authenticated caller
pub struct RequireAuth(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        require_auth(&app_state, &parts.headers).await.map(RequireAuth)
    }
}

/// Extractor for a caller whose session belongs to the `:tenant` path segment
pub struct RequireTenantAuth(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequireTenantAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|e| AuthError::Internal(format!("tenant path parameter: {e}")))?;
        let tenant_ident = params
            .get("tenant")
            .ok_or_else(|| AuthError::Internal("route has no :tenant segment".to_string()))?;

        require_tenant_auth(&app_state, &parts.headers, tenant_ident)
            .await
            .map(RequireTenantAuth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use crm_core::{Tenant, User, UserTenantRole};
    use chrono::Utc;
    use uuid::Uuid;

    fn context(role: Role) -> AuthContext {
        let tenant = Tenant::new("demo", "Demo").unwrap();
        let user = User {
            id: Uuid::new_v4(),
            email: "jan@example.com".to_string(),
            name: "Jan".to_string(),
            email_verified: true,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login: None,
        };
        let user_role = UserTenantRole::new(user.id, Some(tenant.id), role);
        AuthContext {
            permissions: role.permissions(),
            user,
            tenant,
            user_role,
            session_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_cookie_takes_precedence_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(
            extract_session_token(&headers, "session-token").as_deref(),
            Some("from-header")
        );

        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session-token=from-cookie"),
        );
        assert_eq!(
            extract_session_token(&headers, "session-token").as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn test_empty_cookie_falls_back_to_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        headers.insert(header::COOKIE, HeaderValue::from_static("session-token="));
        assert_eq!(
            extract_session_token(&headers, "session-token").as_deref(),
            Some("from-header")
        );

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_session_token(&headers, "session-token"), None);
    }

    #[test]
    fn test_non_bearer_scheme_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_session_token(&headers, "session-token"), None);
    }

    #[test]
    fn test_permission_guard() {
        let ctx = context(Role::Agent);
        assert!(require_permission(&ctx, "leads", "write").is_ok());
        let err = require_permission(&ctx, "users", "write").unwrap_err();
        assert_eq!(err.to_string(), "requires permission users:write");
    }

    #[test]
    fn test_role_guards() {
        let agent = context(Role::Agent);
        let err = require_admin(&agent).unwrap_err();
        assert_eq!(
            err.to_string(),
            "requires one of roles: platform_admin, tenant_owner, tenant_admin"
        );
        assert!(require_role(&agent, &[Role::Agent, Role::Assistant]).is_ok());
        assert!(require_admin(&context(Role::TenantOwner)).is_ok());
    }

    #[test]
    fn test_status_of_guard_failures() {
        use axum::http::StatusCode;

        assert_eq!(
            AppError::from(AuthError::Unauthenticated).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(AuthError::TenantMismatch {
                requested: "other".into()
            })
            .status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(AuthError::Internal("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
