//! Request and response bodies for the auth endpoints
//!
//! Domain records from `crm_core` never go over the wire directly; these
//! views drop hashes and other internals.

use chrono::{DateTime, Utc};
use crm_core::{
    InvitationToken, Member, PermissionSet, Role, Tenant, User, UserTenantRole,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::validator::AuthContext;

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 254))]
    pub email: String,
    pub password: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[schema(example = "demo")]
    pub tenant_slug: String,
    /// Any role except `platform_admin`
    #[schema(example = "agent")]
    pub role: String,
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct LoginRequest {
    #[validate(length(max = 254))]
    pub email: String,
    pub password: String,
    #[schema(example = "demo")]
    pub tenant_slug: String,
}

/// Token refresh request. The refresh cookie wins when both are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct AcceptInvitationRequest {
    pub token: String,
    pub password: String,
    /// Display name for a newly created account
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct CreateInvitationRequest {
    #[validate(length(min = 3, max = 254))]
    pub email: String,
    #[schema(example = "viewer")]
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangeRoleRequest {
    #[schema(example = "assistant")]
    pub role: String,
}

/// Public view of a user
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            email_verified: user.email_verified,
            active: user.active,
            created_at: user.created_at,
            last_login: user.last_login,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TenantInfo {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub status: String,
}

impl From<&Tenant> for TenantInfo {
    fn from(tenant: &Tenant) -> Self {
        Self {
            id: tenant.id,
            slug: tenant.slug.clone(),
            name: tenant.name.clone(),
            status: tenant.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MembershipInfo {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Absent for platform-wide grants
    pub tenant_id: Option<Uuid>,
    pub role: String,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
}

impl From<&UserTenantRole> for MembershipInfo {
    fn from(grant: &UserTenantRole) -> Self {
        Self {
            id: grant.id,
            user_id: grant.user_id,
            tenant_id: grant.tenant_id,
            role: grant.role.as_str().to_string(),
            active: grant.active,
            joined_at: grant.joined_at,
        }
    }
}

/// Permissions as `resource:action` strings
pub fn permission_list(permissions: &PermissionSet) -> Vec<String> {
    permissions.iter().map(|p| p.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub user: UserInfo,
    pub membership: MembershipInfo,
}

/// Login response with both raw tokens
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub user: UserInfo,
    pub tenant: TenantInfo,
    pub role: String,
    pub permissions: Vec<String>,
    pub session_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub session_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// What the server knows about the caller
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContextResponse {
    pub user: UserInfo,
    pub tenant: TenantInfo,
    pub role: String,
    pub permissions: Vec<String>,
}

impl From<&AuthContext> for ContextResponse {
    fn from(ctx: &AuthContext) -> Self {
        Self {
            user: UserInfo::from(&ctx.user),
            tenant: TenantInfo::from(&ctx.tenant),
            role: ctx.role().as_str().to_string(),
            permissions: permission_list(&ctx.permissions),
        }
    }
}

/// A created invitation. `token` is shown once and never stored in clear.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InvitationResponse {
    pub id: Uuid,
    pub email: String,
    pub tenant_id: Uuid,
    pub role: String,
    pub expires_at: DateTime<Utc>,
    pub token: String,
}

impl InvitationResponse {
    pub fn new(invitation: &InvitationToken, token: String) -> Self {
        Self {
            id: invitation.id,
            email: invitation.email.clone(),
            tenant_id: invitation.tenant_id,
            role: invitation.role.as_str().to_string(),
            expires_at: invitation.expires_at,
            token,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MemberInfo {
    pub user: UserInfo,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

impl From<&Member> for MemberInfo {
    fn from(member: &Member) -> Self {
        Self {
            user: UserInfo::from(&member.user),
            role: member.membership.role.as_str().to_string(),
            joined_at: member.membership.joined_at,
        }
    }
}

/// Result of an operation that revokes sessions
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionsRevokedResponse {
    pub sessions_revoked: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parse a role name from a request body
pub fn parse_role(name: &str) -> crm_core::Result<Role> {
    name.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn test_permission_list_format() {
        let list = permission_list(&Role::Viewer.permissions());
        assert!(list.contains(&"leads:read".to_string()));
        assert!(!list.iter().any(|p| p.ends_with(":write")));
    }

    #[test]
    fn test_register_request_shape() {
        let mut request = RegisterRequest {
            email: "jan@example.com".into(),
            password: "Str0ngPass!".into(),
            name: "Jan".into(),
            tenant_slug: "demo".into(),
            role: "agent".into(),
        };
        assert!(request.validate().is_ok());

        request.name = String::new();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_parse_role() {
        assert_eq!(parse_role("tenant_admin").unwrap(), Role::TenantAdmin);
        assert!(parse_role("superuser").is_err());
    }

    #[test]
    fn test_user_info_hides_nothing_sensitive() {
        let user = crm_core::NewUser::new("Jan@Example.com", "Jan")
            .unwrap()
            .into_user();
        let json = serde_json::to_value(UserInfo::from(&user)).unwrap();
        assert_eq!(json["email"], "jan@example.com");
        assert!(json.get("password_hash").is_none());
    }
}
