//! Session validation
//!
//! Maps an opaque bearer token to an [`AuthContext`] or a precise
//! [`Rejection`]. Nothing is cached: the user, tenant and role grant are
//! re-read on every call so a revocation is visible to the very next request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crm_core::{AuthStore, CrmError, PermissionSet, Role, Tenant, User, UserTenantRole};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::resolver::RoleResolver;
use super::token::{hash_token, is_well_formed};

/// Everything a handler may know about the caller
///
/// This is the only legitimate source of the tenant id for tenant-scoped queries.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub user: User,
    pub tenant: Tenant,
    pub user_role: UserTenantRole,
    pub permissions: PermissionSet,
    #[serde(skip)]
    pub session_id: Uuid,
}

impl AuthContext {
    pub fn tenant_id(&self) -> Uuid {
        self.tenant.id
    }

    pub fn role(&self) -> Role {
        self.user_role.role
    }

    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        self.permissions.allows(resource, action)
    }
}

/// Why a token did not validate
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("token missing")]
    Missing,

    /// Malformed, unknown, or bound to something no longer active
    #[error("token invalid")]
    Invalid,

    /// Known session past its expiry; the caller may try a refresh
    #[error("token expired")]
    Expired,

    /// A store call missed its deadline. Never treated as a pass.
    #[error("validation timed out")]
    Timeout,

    #[error("store failure: {0}")]
    Store(CrmError),
}

impl Rejection {
    /// Short machine-readable reason for audit records
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::Missing => "missing",
            Rejection::Invalid => "invalid",
            Rejection::Expired => "expired",
            Rejection::Timeout => "timeout",
            Rejection::Store(_) => "store_error",
        }
    }
}

/// Run a store call under a deadline
pub(crate) async fn with_deadline<T, F>(limit: Duration, call: F) -> Result<T, Rejection>
where
    F: Future<Output = crm_core::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Rejection::Store(err)),
        Err(_) => Err(Rejection::Timeout),
    }
}

/// Read-side token to identity mapping
#[derive(Clone)]
pub struct SessionValidator {
    store: Arc<dyn AuthStore>,
    resolver: RoleResolver,
    timeout: Duration,
}

impl SessionValidator {
    pub fn new(store: Arc<dyn AuthStore>, timeout: Duration) -> Self {
        Self {
            resolver: RoleResolver::new(store.clone()),
            store,
            timeout,
        }
    }

    /// Validate a bearer token
    ///
    /// Checks run in order, each with its own failure: shape, session lookup,
    /// expiry, user and tenant still active, role grant still active.
    pub async fn validate_session(&self, token: Option<&str>) -> Result<AuthContext, Rejection> {
        let token = token.ok_or(Rejection::Missing)?;
        if !is_well_formed(token) {
            return Err(Rejection::Invalid);
        }

        let session = with_deadline(
            self.timeout,
            self.store.find_session_by_token(&hash_token(token)),
        )
        .await?
        .ok_or(Rejection::Invalid)?;

        if session.is_expired(Utc::now()) {
            return Err(Rejection::Expired);
        }

        let user = with_deadline(self.timeout, self.store.find_user(session.user_id))
            .await?
            .filter(|user| user.active)
            .ok_or(Rejection::Invalid)?;

        let tenant = with_deadline(self.timeout, self.store.find_tenant(session.tenant_id))
            .await?
            .filter(Tenant::is_active)
            .ok_or(Rejection::Invalid)?;

        let user_role = with_deadline(
            self.timeout,
            self.resolver.resolve_role(user.id, tenant.id),
        )
        .await?
        .ok_or(Rejection::Invalid)?;

        let permissions = user_role.role.permissions();

        Ok(AuthContext {
            user,
            tenant,
            user_role,
            permissions,
            session_id: session.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::TokenPair;
    use chrono::Duration as ChronoDuration;
    use crm_core::{
        MembershipStore, MemoryStore, NewSession, NewUser, SessionStore, TenantStatus,
        TenantStore, UserStore,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        validator: SessionValidator,
        user: User,
        tenant: Tenant,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(NewUser::new("jan@example.com", "Jan").unwrap(), "hash".into())
            .await
            .unwrap();
        let tenant = store
            .create_tenant(Tenant::new("demo", "Demo").unwrap())
            .await
            .unwrap();
        store
            .grant_role(user.id, Some(tenant.id), Role::Agent)
            .await
            .unwrap();

        let validator = SessionValidator::new(store.clone(), Duration::from_secs(2));
        Fixture {
            store,
            validator,
            user,
            tenant,
        }
    }

    async fn open_session(f: &Fixture, ttl: ChronoDuration) -> String {
        let pair = TokenPair::generate();
        f.store
            .create_session(NewSession::new(
                f.user.id,
                f.tenant.id,
                pair.session_hash(),
                pair.refresh_hash(),
                ttl,
                ChronoDuration::days(7),
            ))
            .await
            .unwrap();
        pair.session_token
    }

    #[tokio::test]
    async fn test_valid_session_builds_context() {
        let f = fixture().await;
        let token = open_session(&f, ChronoDuration::hours(24)).await;

        let ctx = f.validator.validate_session(Some(&token)).await.unwrap();
        assert_eq!(ctx.user.id, f.user.id);
        assert_eq!(ctx.tenant_id(), f.tenant.id);
        assert_eq!(ctx.role(), Role::Agent);
        assert!(ctx.has_permission("contacts", "write"));
        assert!(!ctx.has_permission("users", "write"));
    }

    #[tokio::test]
    async fn test_missing_and_malformed_tokens() {
        let f = fixture().await;
        assert!(matches!(
            f.validator.validate_session(None).await,
            Err(Rejection::Missing)
        ));
        assert!(matches!(
            f.validator.validate_session(Some("not-a-token")).await,
            Err(Rejection::Invalid)
        ));
        let unknown = crate::auth::token::generate_token();
        assert!(matches!(
            f.validator.validate_session(Some(&unknown)).await,
            Err(Rejection::Invalid)
        ));
    }

    #[tokio::test]
    async fn test_expired_is_distinct_from_invalid() {
        let f = fixture().await;
        let token = open_session(&f, ChronoDuration::seconds(-1)).await;
        let err = f.validator.validate_session(Some(&token)).await.unwrap_err();
        assert_eq!(err.kind(), "expired");
    }

    #[tokio::test]
    async fn test_revoked_role_fails_next_validation() {
        let f = fixture().await;
        let token = open_session(&f, ChronoDuration::hours(24)).await;
        assert!(f.validator.validate_session(Some(&token)).await.is_ok());

        f.store.deactivate_role(f.user.id, f.tenant.id).await.unwrap();

        assert!(matches!(
            f.validator.validate_session(Some(&token)).await,
            Err(Rejection::Invalid)
        ));
    }

    #[tokio::test]
    async fn test_inactive_user_or_tenant_invalidates() {
        let f = fixture().await;
        let token = open_session(&f, ChronoDuration::hours(24)).await;

        f.store
            .set_tenant_status(f.tenant.id, TenantStatus::Suspended)
            .await
            .unwrap();
        assert!(matches!(
            f.validator.validate_session(Some(&token)).await,
            Err(Rejection::Invalid)
        ));

        f.store
            .set_tenant_status(f.tenant.id, TenantStatus::Active)
            .await
            .unwrap();
        f.store.set_user_active(f.user.id, false).await.unwrap();
        assert!(matches!(
            f.validator.validate_session(Some(&token)).await,
            Err(Rejection::Invalid)
        ));
    }

    #[tokio::test]
    async fn test_deadline_miss_is_rejection() {
        let result: Result<(), Rejection> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Rejection::Timeout)));
    }
}
