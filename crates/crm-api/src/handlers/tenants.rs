//! Tenant-scoped handlers
//!
//! Every route here carries a `:tenant` segment (slug or id) and goes through
//! [`RequireTenantAuth`], so the tenant acted on is always the session's own.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::audit::{audit_log, AuditEvent};
use crate::auth::middleware::{require_permission, RequireTenantAuth};
use crate::auth::models::{
    parse_role, ChangeRoleRequest, ContextResponse, CreateInvitationRequest,
    InvitationResponse, MemberInfo, MembershipInfo,
};
use crate::error::AppError;
use crate::state::AppState;

/// The caller's context within the tenant
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{tenant}/context",
    tag = "tenants",
    params(("tenant" = String, Path, description = "Tenant slug or id")),
    responses(
        (status = 200, description = "Caller context", body = ContextResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ApiError),
        (status = 403, description = "Session belongs to another tenant", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn context_handler(RequireTenantAuth(ctx): RequireTenantAuth) -> Json<ContextResponse> {
    Json(ContextResponse::from(&ctx))
}

/// Invite an email address into the tenant
///
/// The raw token is returned once; delivering it is up to the caller.
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{tenant}/invitations",
    tag = "tenants",
    params(("tenant" = String, Path, description = "Tenant slug or id")),
    request_body = CreateInvitationRequest,
    responses(
        (status = 201, description = "Invitation created", body = InvitationResponse),
        (status = 403, description = "Missing users:write or role not grantable", body = crate::error::ApiError),
        (status = 409, description = "Already a member", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_invitation_handler(
    State(state): State<Arc<AppState>>,
    RequireTenantAuth(ctx): RequireTenantAuth,
    Json(request): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<InvitationResponse>), AppError> {
    require_permission(&ctx, "users", "write")?;
    request.validate()?;
    let role = parse_role(&request.role)?;

    let issued = state
        .auth
        .create_invitation(&ctx, &request.email, role)
        .await?;

    audit_log(&AuditEvent::InvitationCreated {
        invitation_id: issued.invitation.id,
        tenant_id: issued.invitation.tenant_id,
        email: issued.invitation.email.clone(),
        role: issued.invitation.role.to_string(),
        invited_by: ctx.user.id,
    });

    Ok((
        StatusCode::CREATED,
        Json(InvitationResponse::new(&issued.invitation, issued.token)),
    ))
}

/// Active members of the tenant
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{tenant}/members",
    tag = "tenants",
    params(("tenant" = String, Path, description = "Tenant slug or id")),
    responses(
        (status = 200, description = "Members", body = Vec<MemberInfo>),
        (status = 403, description = "Missing users:read", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_members_handler(
    State(state): State<Arc<AppState>>,
    RequireTenantAuth(ctx): RequireTenantAuth,
) -> Result<Json<Vec<MemberInfo>>, AppError> {
    require_permission(&ctx, "users", "read")?;

    let members = state.members.list_members(&ctx).await?;
    Ok(Json(members.iter().map(MemberInfo::from).collect()))
}

#[utoipa::path(
    put,
    path = "/api/v1/tenants/{tenant}/members/{user_id}/role",
    tag = "tenants",
    params(
        ("tenant" = String, Path, description = "Tenant slug or id"),
        ("user_id" = Uuid, Path, description = "Member's user id"),
    ),
    request_body = ChangeRoleRequest,
    responses(
        (status = 200, description = "Role changed", body = MembershipInfo),
        (status = 400, description = "Unknown role or own membership", body = crate::error::ApiError),
        (status = 403, description = "Role not grantable", body = crate::error::ApiError),
        (status = 404, description = "Not a member", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn change_role_handler(
    State(state): State<Arc<AppState>>,
    RequireTenantAuth(ctx): RequireTenantAuth,
    Path((_tenant, user_id)): Path<(String, Uuid)>,
    Json(request): Json<ChangeRoleRequest>,
) -> Result<Json<MembershipInfo>, AppError> {
    require_permission(&ctx, "users", "write")?;
    let role = parse_role(&request.role)?;

    let change = state
        .members
        .change_member_role(&ctx, user_id, role)
        .await?;

    if change.previous != change.current.role {
        audit_log(&AuditEvent::MembershipChanged {
            actor_id: ctx.user.id,
            user_id,
            tenant_id: ctx.tenant_id(),
            old_role: change.previous.to_string(),
            new_role: Some(change.current.role.to_string()),
        });
    }

    Ok(Json(MembershipInfo::from(&change.current)))
}

/// Remove a member from the tenant
///
/// The member's open sessions for this tenant stop validating immediately.
#[utoipa::path(
    delete,
    path = "/api/v1/tenants/{tenant}/members/{user_id}",
    tag = "tenants",
    params(
        ("tenant" = String, Path, description = "Tenant slug or id"),
        ("user_id" = Uuid, Path, description = "Member's user id"),
    ),
    responses(
        (status = 204, description = "Member deactivated"),
        (status = 400, description = "Own membership", body = crate::error::ApiError),
        (status = 403, description = "Member not manageable", body = crate::error::ApiError),
        (status = 404, description = "Not a member", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn deactivate_member_handler(
    State(state): State<Arc<AppState>>,
    RequireTenantAuth(ctx): RequireTenantAuth,
    Path((_tenant, user_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, AppError> {
    require_permission(&ctx, "users", "write")?;

    let previous = state.members.deactivate_member(&ctx, user_id).await?;

    audit_log(&AuditEvent::MembershipChanged {
        actor_id: ctx.user.id,
        user_id,
        tenant_id: ctx.tenant_id(),
        old_role: previous.role.to_string(),
        new_role: None,
    });

    Ok(StatusCode::NO_CONTENT)
}
