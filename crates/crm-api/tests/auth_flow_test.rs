//! Auth core scenarios exercised below the HTTP layer
//!
//! Services are driven directly over an in-memory store so each property is
//! checked without transport concerns.

use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue};
use crm_api::auth::{
    require_tenant_auth, AuthContext, AuthError, CredentialHasher, PasswordConfig,
    Registration, Rejection,
};
use crm_api::state::AppState;
use crm_api::testing::test_state_with_store;
use crm_core::{
    AccessDenial, AppConfig, AuthFailure, CrmError, MembershipStore, MemoryStore, Role, Tenant,
    TenantStore, ValidationFailure,
};
use proptest::prelude::*;

struct Fixture {
    store: Arc<MemoryStore>,
    state: Arc<AppState>,
}

async fn seed_tenants(store: &MemoryStore) {
    for (slug, name) in [("demo", "Demo Realty"), ("other", "Other Realty")] {
        store
            .create_tenant(Tenant::new(slug, name).unwrap())
            .await
            .unwrap();
    }
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    seed_tenants(&store).await;
    Fixture {
        state: test_state_with_store(store.clone()),
        store,
    }
}

/// Same as [`fixture`] but with a custom configuration
async fn fixture_with(config: AppConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    seed_tenants(&store).await;
    let state = Arc::new(AppState::with_hasher(
        config,
        store.clone(),
        CredentialHasher::new(PasswordConfig::insecure_fast()),
    ));
    Fixture { store, state }
}

fn registration(email: &str, tenant: &str, role: Role) -> Registration {
    Registration {
        email: email.to_string(),
        password: "Str0ngPass!".to_string(),
        name: "Test User".to_string(),
        tenant_slug: tenant.to_string(),
        role,
    }
}

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    headers
}

async fn logged_in(f: &Fixture, email: &str, tenant: &str, role: Role) -> (String, AuthContext) {
    f.state
        .auth
        .register_user(registration(email, tenant, role))
        .await
        .unwrap();
    let outcome = f
        .state
        .auth
        .login_user(email, "Str0ngPass!", tenant)
        .await
        .unwrap();
    let ctx = f
        .state
        .validator
        .validate_session(Some(&outcome.session_token))
        .await
        .unwrap();
    (outcome.session_token, ctx)
}

#[tokio::test]
async fn test_register_login_change_password_scenario() {
    let f = fixture().await;
    let auth = &f.state.auth;

    let (user, _) = auth
        .register_user(registration("jan@example.com", "demo", Role::Agent))
        .await
        .unwrap();

    let outcome = auth
        .login_user("jan@example.com", "Str0ngPass!", "demo")
        .await
        .unwrap();
    assert_eq!(outcome.user_role.role, Role::Agent);

    let ctx = f
        .state
        .validator
        .validate_session(Some(&outcome.session_token))
        .await
        .unwrap();
    assert_eq!(ctx.user.id, user.id);
    assert_eq!(ctx.tenant.slug, "demo");

    assert!(matches!(
        auth.login_user("jan@example.com", "wrong", "demo").await,
        Err(CrmError::Authentication(AuthFailure::InvalidCredentials))
    ));

    auth.change_password(user.id, "Str0ngPass!", "NewPass1!", None)
        .await
        .unwrap();
    assert!(auth
        .login_user("jan@example.com", "Str0ngPass!", "demo")
        .await
        .is_err());
    assert!(auth
        .login_user("jan@example.com", "NewPass1!", "demo")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_refresh_round_trip() {
    let f = fixture().await;
    f.state
        .auth
        .register_user(registration("jan@example.com", "demo", Role::Agent))
        .await
        .unwrap();
    let outcome = f
        .state
        .auth
        .login_user("jan@example.com", "Str0ngPass!", "demo")
        .await
        .unwrap();

    let refreshed = f
        .state
        .refresher
        .refresh_session(&outcome.refresh_token)
        .await
        .unwrap();
    assert_eq!(refreshed.session.id, outcome.session.id);
    assert!(f
        .state
        .validator
        .validate_session(Some(&refreshed.session_token))
        .await
        .is_ok());

    assert!(matches!(
        f.state.refresher.refresh_session(&outcome.refresh_token).await,
        Err(CrmError::Authentication(AuthFailure::RefreshTokenReused { .. }))
    ));
}

#[tokio::test]
async fn test_concurrent_refresh_has_one_winner() {
    let f = fixture().await;
    f.state
        .auth
        .register_user(registration("jan@example.com", "demo", Role::Agent))
        .await
        .unwrap();
    let outcome = f
        .state
        .auth
        .login_user("jan@example.com", "Str0ngPass!", "demo")
        .await
        .unwrap();

    let refresher = &f.state.refresher;
    let (a, b) = tokio::join!(
        refresher.refresh_session(&outcome.refresh_token),
        refresher.refresh_session(&outcome.refresh_token),
    );

    assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);
}

#[tokio::test]
async fn test_tenant_isolation() {
    let f = fixture().await;
    let (token, _) = logged_in(&f, "jan@example.com", "demo", Role::TenantAdmin).await;
    let headers = bearer(&token);

    assert!(require_tenant_auth(&f.state, &headers, "demo").await.is_ok());
    assert!(matches!(
        require_tenant_auth(&f.state, &headers, "other").await,
        Err(AuthError::TenantMismatch { .. })
    ));
}

#[tokio::test]
async fn test_platform_admin_stays_in_session_tenant() {
    let f = fixture().await;
    let (user, _) = f
        .state
        .auth
        .register_user(registration("root@example.com", "demo", Role::Agent))
        .await
        .unwrap();
    f.store
        .grant_role(user.id, None, Role::PlatformAdmin)
        .await
        .unwrap();

    // No grant in `other`, the platform grant applies
    let outcome = f
        .state
        .auth
        .login_user("root@example.com", "Str0ngPass!", "other")
        .await
        .unwrap();
    assert_eq!(outcome.user_role.role, Role::PlatformAdmin);

    let headers = bearer(&outcome.session_token);
    assert!(require_tenant_auth(&f.state, &headers, "other").await.is_ok());
    assert!(require_tenant_auth(&f.state, &headers, "demo").await.is_err());
}

#[tokio::test]
async fn test_revocation_is_immediate() {
    let f = fixture().await;
    let (_, owner_ctx) = logged_in(&f, "owner@example.com", "demo", Role::TenantOwner).await;
    let (agent_token, agent_ctx) = logged_in(&f, "agent@example.com", "demo", Role::Agent).await;

    f.state
        .members
        .deactivate_member(&owner_ctx, agent_ctx.user.id)
        .await
        .unwrap();

    assert!(matches!(
        f.state
            .validator
            .validate_session(Some(&agent_token))
            .await,
        Err(Rejection::Invalid)
    ));
}

#[tokio::test]
async fn test_suspended_tenant_invalidates_sessions() {
    let f = fixture().await;
    let (token, ctx) = logged_in(&f, "jan@example.com", "demo", Role::Agent).await;

    f.store
        .set_tenant_status(ctx.tenant_id(), crm_core::TenantStatus::Suspended)
        .await
        .unwrap();

    assert!(f
        .state
        .validator
        .validate_session(Some(&token))
        .await
        .is_err());
}

#[tokio::test]
async fn test_invitation_reuse_is_invalid() {
    let f = fixture().await;
    let (_, admin) = logged_in(&f, "admin@example.com", "demo", Role::TenantAdmin).await;

    let issued = f
        .state
        .auth
        .create_invitation(&admin, "new@example.com", Role::Viewer)
        .await
        .unwrap();

    let grant = f
        .state
        .auth
        .accept_invitation(&issued.token, "anyPass1!", None)
        .await
        .unwrap();
    assert_eq!(grant.role, Role::Viewer);

    assert!(matches!(
        f.state
            .auth
            .accept_invitation(&issued.token, "anyPass1!", None)
            .await,
        Err(CrmError::Validation(ValidationFailure::InvitationInvalid))
    ));
}

#[tokio::test]
async fn test_expired_invitation() {
    let mut config = AppConfig::default();
    config.auth.invitation_ttl_secs = 0;
    let f = fixture_with(config).await;
    let (_, admin) = logged_in(&f, "admin@example.com", "demo", Role::TenantAdmin).await;

    let issued = f
        .state
        .auth
        .create_invitation(&admin, "late@example.com", Role::Viewer)
        .await
        .unwrap();

    let err = f
        .state
        .auth
        .accept_invitation(&issued.token, "anyPass1!", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CrmError::Validation(ValidationFailure::InvitationExpired { .. })
    ));
    assert!(err.to_string().contains("expired"));
}

#[tokio::test]
async fn test_invite_requires_users_write() {
    let f = fixture().await;
    let (_, agent) = logged_in(&f, "agent@example.com", "demo", Role::Agent).await;

    assert!(matches!(
        f.state
            .auth
            .create_invitation(&agent, "friend@example.com", Role::Viewer)
            .await,
        Err(CrmError::Authorization(AccessDenial::MissingPermission { .. }))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// A wrong password and an unknown account fail identically
    #[test]
    fn prop_login_failures_indistinguishable(password in "[A-Za-z0-9!]{1,24}") {
        prop_assume!(password != "Str0ngPass!");
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let f = fixture().await;
            f.state
                .auth
                .register_user(registration("jan@example.com", "demo", Role::Agent))
                .await
                .unwrap();

            let wrong = f.state.auth.login_user("jan@example.com", &password, "demo").await;
            let unknown = f.state.auth.login_user("ghost@example.com", &password, "demo").await;

            let wrong = wrong.unwrap_err();
            let unknown = unknown.unwrap_err();
            assert!(matches!(
                wrong,
                CrmError::Authentication(AuthFailure::InvalidCredentials)
            ));
            assert_eq!(wrong.to_string(), unknown.to_string());
        });
    }
}
