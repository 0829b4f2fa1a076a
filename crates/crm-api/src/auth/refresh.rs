//! Refresh token rotation
//!
//! Session states: `active` rotates to `active'` (same id, new secrets);
//! `active` becomes `expired` once the refresh expiry passes; `active`
//! becomes `revoked` on logout. Expired and revoked are terminal. A session
//! whose user, tenant or role grant stopped being active is revoked on its
//! next refresh.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use crm_core::config::AuthConfig;
use crm_core::{AuthFailure, AuthStore, CrmError, RotateOutcome, Session, SessionRotation};

use super::resolver::RoleResolver;
use super::token::{hash_token, is_well_formed, TokenPair};

/// A freshly rotated session with its new raw secrets
#[derive(Debug, Clone)]
pub struct RefreshedSession {
    pub session: Session,
    pub session_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenRefreshManager {
    store: Arc<dyn AuthStore>,
    resolver: RoleResolver,
    config: AuthConfig,
}

impl TokenRefreshManager {
    pub fn new(store: Arc<dyn AuthStore>, config: AuthConfig) -> Self {
        Self {
            resolver: RoleResolver::new(store.clone()),
            store,
            config,
        }
    }

    /// Whether the user, tenant and role grant behind a session are all still active
    async fn bindings_active(&self, session: &Session) -> crm_core::Result<bool> {
        let user_active = self
            .store
            .find_user(session.user_id)
            .await?
            .is_some_and(|user| user.active);
        if !user_active {
            return Ok(false);
        }
        let tenant_active = self
            .store
            .find_tenant(session.tenant_id)
            .await?
            .is_some_and(|tenant| tenant.is_active());
        if !tenant_active {
            return Ok(false);
        }
        Ok(self
            .resolver
            .resolve_role(session.user_id, session.tenant_id)
            .await?
            .is_some())
    }

    /// Spend a refresh token for a new token pair on the same session
    ///
    /// The swap is one conditional write in the store, so two concurrent
    /// calls with the same token produce exactly one success.
    pub async fn refresh_session(&self, refresh_token: &str) -> crm_core::Result<RefreshedSession> {
        if !is_well_formed(refresh_token) {
            return Err(CrmError::Authentication(AuthFailure::InvalidToken));
        }

        let now = Utc::now();
        let pair = TokenPair::generate();
        let rotation = SessionRotation {
            presented_refresh_hash: hash_token(refresh_token),
            new_token_hash: pair.session_hash(),
            new_refresh_hash: pair.refresh_hash(),
            expires_at: now + self.config.session_ttl(),
            refresh_expires_at: now + self.config.refresh_ttl(),
            now,
        };

        match self.store.rotate_session(rotation).await? {
            RotateOutcome::Rotated(session) => {
                if !self.bindings_active(&session).await? {
                    tracing::debug!(session_id = %session.id, "Session binding revoked, deleting");
                    self.store.delete_session(session.id).await?;
                    return Err(CrmError::Authentication(AuthFailure::InvalidToken));
                }
                Ok(RefreshedSession {
                    expires_at: session.expires_at,
                    refresh_expires_at: session.refresh_expires_at,
                    session,
                    session_token: pair.session_token,
                    refresh_token: pair.refresh_token,
                })
            }
            RotateOutcome::Reused { session_id } => {
                if self.config.revoke_family_on_refresh_reuse {
                    self.store.delete_session(session_id).await?;
                }
                Err(CrmError::Authentication(AuthFailure::RefreshTokenReused {
                    session_id,
                }))
            }
            RotateOutcome::Expired { session_id } => {
                self.store.delete_session(session_id).await?;
                Err(CrmError::Authentication(AuthFailure::ExpiredToken))
            }
            RotateOutcome::Unknown => Err(CrmError::Authentication(AuthFailure::InvalidToken)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crm_core::{
        MembershipStore, MemoryStore, NewSession, NewUser, Role, SessionStore, Tenant,
        TenantStatus, TenantStore, User, UserStore,
    };

    async fn member(store: &MemoryStore) -> (User, Tenant) {
        let user = store
            .create_user(NewUser::new("jan@example.com", "Jan").unwrap(), "h".into())
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
        (user, tenant)
    }

    async fn session_with(store: &MemoryStore, refresh_ttl: Duration) -> TokenPair {
        let (user, tenant) = member(store).await;
        let pair = TokenPair::generate();
        store
            .create_session(NewSession::new(
                user.id,
                tenant.id,
                pair.session_hash(),
                pair.refresh_hash(),
                Duration::hours(24),
                refresh_ttl,
            ))
            .await
            .unwrap();
        pair
    }

    #[tokio::test]
    async fn test_rotation_invalidates_old_pair() {
        let store = Arc::new(MemoryStore::new());
        let manager = TokenRefreshManager::new(store.clone(), AuthConfig::default());
        let pair = session_with(&store, Duration::days(7)).await;

        let refreshed = manager.refresh_session(&pair.refresh_token).await.unwrap();
        assert_ne!(refreshed.session_token, pair.session_token);
        assert!(store
            .find_session_by_token(&pair.session_hash())
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_session_by_token(&hash_token(&refreshed.session_token))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_reuse_revokes_family() {
        let store = Arc::new(MemoryStore::new());
        let manager = TokenRefreshManager::new(store.clone(), AuthConfig::default());
        let pair = session_with(&store, Duration::days(7)).await;

        let refreshed = manager.refresh_session(&pair.refresh_token).await.unwrap();
        let err = manager.refresh_session(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(
            err,
            CrmError::Authentication(AuthFailure::RefreshTokenReused { .. })
        ));

        // The legitimately rotated pair is gone too
        assert!(store
            .find_session_by_token(&hash_token(&refreshed.session_token))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reuse_without_family_revocation() {
        let store = Arc::new(MemoryStore::new());
        let config = AuthConfig {
            revoke_family_on_refresh_reuse: false,
            ..AuthConfig::default()
        };
        let manager = TokenRefreshManager::new(store.clone(), config);
        let pair = session_with(&store, Duration::days(7)).await;

        let refreshed = manager.refresh_session(&pair.refresh_token).await.unwrap();
        assert!(manager.refresh_session(&pair.refresh_token).await.is_err());
        assert!(manager.refresh_session(&refreshed.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_refresh_token_is_terminal() {
        let store = Arc::new(MemoryStore::new());
        let manager = TokenRefreshManager::new(store.clone(), AuthConfig::default());
        let pair = session_with(&store, Duration::seconds(-1)).await;

        let err = manager.refresh_session(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(
            err,
            CrmError::Authentication(AuthFailure::ExpiredToken)
        ));
        let again = manager.refresh_session(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(
            again,
            CrmError::Authentication(AuthFailure::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rejected_once_binding_is_revoked() {
        let store = Arc::new(MemoryStore::new());
        let manager = TokenRefreshManager::new(store.clone(), AuthConfig::default());
        let pair = session_with(&store, Duration::days(7)).await;
        let session = store
            .find_session_by_token(&pair.session_hash())
            .await
            .unwrap()
            .unwrap();

        store
            .deactivate_role(session.user_id, session.tenant_id)
            .await
            .unwrap();
        assert!(matches!(
            manager.refresh_session(&pair.refresh_token).await,
            Err(CrmError::Authentication(AuthFailure::InvalidToken))
        ));
        // Already deleted by the rejected refresh
        assert!(!store.delete_session(session.id).await.unwrap());
        assert!(manager.refresh_session(&pair.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_rejected_for_suspended_tenant_or_inactive_user() {
        let store = Arc::new(MemoryStore::new());
        let manager = TokenRefreshManager::new(store.clone(), AuthConfig::default());
        let pair = session_with(&store, Duration::days(7)).await;
        let session = store
            .find_session_by_token(&pair.session_hash())
            .await
            .unwrap()
            .unwrap();

        store
            .set_tenant_status(session.tenant_id, TenantStatus::Suspended)
            .await
            .unwrap();
        assert!(manager.refresh_session(&pair.refresh_token).await.is_err());
        assert!(!store.delete_session(session.id).await.unwrap());

        let other = Arc::new(MemoryStore::new());
        let manager = TokenRefreshManager::new(other.clone(), AuthConfig::default());
        let pair = session_with(&other, Duration::days(7)).await;
        let session = other
            .find_session_by_token(&pair.session_hash())
            .await
            .unwrap()
            .unwrap();
        other.set_user_active(session.user_id, false).await.unwrap();
        assert!(matches!(
            manager.refresh_session(&pair.refresh_token).await,
            Err(CrmError::Authentication(AuthFailure::InvalidToken))
        ));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_tokens() {
        let manager = TokenRefreshManager::new(Arc::new(MemoryStore::new()), AuthConfig::default());
        let unknown = crate::auth::token::generate_token();
        for token in ["", "garbage", unknown.as_str()] {
            assert!(matches!(
                manager.refresh_session(token).await,
                Err(CrmError::Authentication(AuthFailure::InvalidToken))
            ));
        }
    }
}
