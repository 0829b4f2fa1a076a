//! Authentication API handlers
//!
//! Thin wrappers over [`AuthService`](crate::auth::AuthService) and
//! [`TokenRefreshManager`](crate::auth::TokenRefreshManager) that add cookies
//! and audit records.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use axum_extra::extract::CookieJar;
use crm_core::{AuthFailure, CrmError};
use validator::Validate;

use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::auth::middleware::{extract_session_token, RequireAuth};
use crate::auth::models::{
    parse_role, permission_list, AcceptInvitationRequest, ChangePasswordRequest,
    ContextResponse, LoginRequest, LoginResponse, MembershipInfo, MessageResponse,
    RefreshRequest, RefreshResponse, RegisterRequest, RegisterResponse,
    SessionsRevokedResponse, TenantInfo, UserInfo,
};
use crate::auth::Registration;
use crate::cookies::{clear_session_cookies, refresh_token_from, set_session_cookies};
use crate::error::AppError;
use crate::state::AppState;

const TOKEN_TYPE: &str = "Bearer";

/// Register a user into a tenant
///
/// Does not log the user in.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = RegisterResponse),
        (status = 400, description = "Invalid input or weak password", body = crate::error::ApiError),
        (status = 404, description = "Tenant not found", body = crate::error::ApiError),
        (status = 409, description = "Email already registered", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    request.validate()?;
    let ip_address = extract_ip_address(&headers);
    let user_agent = extract_user_agent(&headers);

    let result = match parse_role(&request.role) {
        Ok(role) => {
            state
                .auth
                .register_user(Registration {
                    email: request.email.clone(),
                    password: request.password,
                    name: request.name,
                    tenant_slug: request.tenant_slug.clone(),
                    role,
                })
                .await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok((user, membership)) => {
            audit_log(&AuditEvent::RegistrationSuccess {
                user_id: user.id,
                email: user.email.clone(),
                tenant: request.tenant_slug,
                role: membership.role.to_string(),
                ip_address,
                user_agent,
            });
            Ok((
                StatusCode::CREATED,
                Json(RegisterResponse {
                    user: UserInfo::from(&user),
                    membership: MembershipInfo::from(&membership),
                }),
            ))
        }
        Err(err) => {
            audit_log(&AuditEvent::RegistrationFailure {
                email: request.email,
                tenant: request.tenant_slug,
                reason: err.to_string(),
                ip_address,
                user_agent,
            });
            Err(err.into())
        }
    }
}

/// Log in to one tenant
///
/// Sets the session and refresh cookies and also returns both tokens.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 403, description = "No access to this tenant", body = crate::error::ApiError),
        (status = 404, description = "Tenant not found", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), AppError> {
    request.validate()?;
    let ip_address = extract_ip_address(&headers);
    let user_agent = extract_user_agent(&headers);

    let outcome = match state
        .auth
        .login_user(&request.email, &request.password, &request.tenant_slug)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            audit_log(&AuditEvent::LoginFailure {
                email: request.email,
                tenant: request.tenant_slug,
                reason: err.to_string(),
                ip_address,
                user_agent,
            });
            return Err(err.into());
        }
    };

    audit_log(&AuditEvent::LoginSuccess {
        user_id: outcome.user.id,
        email: outcome.user.email.clone(),
        tenant: outcome.tenant.slug.clone(),
        session_id: outcome.session.id,
        ip_address,
        user_agent,
    });

    let jar = set_session_cookies(
        jar,
        &state.config.auth,
        &outcome.session_token,
        &outcome.refresh_token,
    );
    let response = LoginResponse {
        user: UserInfo::from(&outcome.user),
        tenant: TenantInfo::from(&outcome.tenant),
        role: outcome.user_role.role.to_string(),
        permissions: permission_list(&outcome.permissions),
        session_token: outcome.session_token,
        refresh_token: outcome.refresh_token,
        token_type: TOKEN_TYPE.to_string(),
        expires_at: outcome.session.expires_at,
        refresh_expires_at: outcome.session.refresh_expires_at,
    };

    Ok((jar, Json(response)))
}

/// End the current session
///
/// Always succeeds, even for unknown or already-expired tokens.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), AppError> {
    let cookies = &state.config.auth.cookies;

    if let Some(token) = extract_session_token(&headers, &cookies.session_cookie_name) {
        let removed = state.auth.logout_user(&token).await?;
        audit_log(&AuditEvent::Logout {
            user_id: removed.as_ref().map(|session| session.user_id),
            session_id: removed.as_ref().map(|session| session.id),
            logout_all_devices: false,
            sessions_revoked: u64::from(removed.is_some()),
            ip_address: extract_ip_address(&headers),
        });
    }

    Ok((
        clear_session_cookies(jar, cookies),
        Json(MessageResponse::new("Logged out")),
    ))
}

/// End every session of the caller
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout-all",
    tag = "auth",
    responses(
        (status = 200, description = "All sessions revoked", body = SessionsRevokedResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout_all_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RequireAuth(ctx): RequireAuth,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SessionsRevokedResponse>), AppError> {
    let sessions_revoked = state.auth.logout_all(ctx.user.id).await?;

    audit_log(&AuditEvent::Logout {
        user_id: Some(ctx.user.id),
        session_id: Some(ctx.session_id),
        logout_all_devices: true,
        sessions_revoked,
        ip_address: extract_ip_address(&headers),
    });

    Ok((
        clear_session_cookies(jar, &state.config.auth.cookies),
        Json(SessionsRevokedResponse { sessions_revoked }),
    ))
}

/// Rotate the session's token pair
///
/// The refresh token is read from its cookie, else from the body. Each
/// refresh token works exactly once.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "auth",
    request_body(content = RefreshRequest, description = "Needed only without the refresh cookie"),
    responses(
        (status = 200, description = "New token pair", body = RefreshResponse),
        (status = 401, description = "Invalid, expired or reused refresh token", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, Json<RefreshResponse>), AppError> {
    let ip_address = extract_ip_address(&headers);
    let user_agent = extract_user_agent(&headers);

    let refresh_token = refresh_token_from(&jar, &state.config.auth.cookies)
        .or_else(|| body.and_then(|Json(request)| request.refresh_token))
        .ok_or(CrmError::Authentication(AuthFailure::MissingToken))?;

    let refreshed = match state.refresher.refresh_session(&refresh_token).await {
        Ok(refreshed) => refreshed,
        Err(err) => {
            if let CrmError::Authentication(AuthFailure::RefreshTokenReused { session_id }) = &err
            {
                audit_log(&AuditEvent::RefreshTokenReuse {
                    session_id: *session_id,
                    family_revoked: state.config.auth.revoke_family_on_refresh_reuse,
                    ip_address,
                    user_agent,
                });
            }
            return Err(err.into());
        }
    };

    audit_log(&AuditEvent::SessionRefresh {
        user_id: refreshed.session.user_id,
        session_id: refreshed.session.id,
        ip_address,
        user_agent,
    });

    let jar = set_session_cookies(
        jar,
        &state.config.auth,
        &refreshed.session_token,
        &refreshed.refresh_token,
    );
    Ok((
        jar,
        Json(RefreshResponse {
            session_token: refreshed.session_token,
            refresh_token: refreshed.refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_at: refreshed.expires_at,
            refresh_expires_at: refreshed.refresh_expires_at,
        }),
    ))
}

/// Redeem an invitation token
#[utoipa::path(
    post,
    path = "/api/v1/auth/accept-invitation",
    tag = "auth",
    request_body = AcceptInvitationRequest,
    responses(
        (status = 200, description = "Membership granted", body = MembershipInfo),
        (status = 400, description = "Invitation expired, invalid or already used", body = crate::error::ApiError),
        (status = 409, description = "Already a member", body = crate::error::ApiError),
    )
)]
pub async fn accept_invitation_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AcceptInvitationRequest>,
) -> Result<Json<MembershipInfo>, AppError> {
    request.validate()?;

    let grant = state
        .auth
        .accept_invitation(&request.token, &request.password, request.name.as_deref())
        .await?;

    if let Some(tenant_id) = grant.tenant_id {
        audit_log(&AuditEvent::InvitationAccepted {
            user_id: grant.user_id,
            tenant_id,
            role: grant.role.to_string(),
            ip_address: extract_ip_address(&headers),
        });
    }

    Ok(Json(MembershipInfo::from(&grant)))
}

/// Change the caller's password
///
/// Other sessions of the caller are revoked; this one survives.
#[utoipa::path(
    post,
    path = "/api/v1/auth/change-password",
    tag = "auth",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = SessionsRevokedResponse),
        (status = 400, description = "New password too weak", body = crate::error::ApiError),
        (status = 401, description = "Current password incorrect", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RequireAuth(ctx): RequireAuth,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<SessionsRevokedResponse>, AppError> {
    let sessions_revoked = state
        .auth
        .change_password(
            ctx.user.id,
            &request.current_password,
            &request.new_password,
            Some(ctx.session_id),
        )
        .await?;

    audit_log(&AuditEvent::PasswordChange {
        user_id: ctx.user.id,
        email: ctx.user.email.clone(),
        sessions_revoked,
        ip_address: extract_ip_address(&headers),
    });

    Ok(Json(SessionsRevokedResponse { sessions_revoked }))
}

/// The caller's identity, tenant, role and permissions
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current context", body = ContextResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn me_handler(RequireAuth(ctx): RequireAuth) -> Json<ContextResponse> {
    Json(ContextResponse::from(&ctx))
}
