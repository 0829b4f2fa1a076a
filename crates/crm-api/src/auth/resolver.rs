//! Role and permission resolution
//!
//! A user's effective role in a tenant is their active grant for that
//! tenant, or failing that an active platform-wide grant. Permissions are
//! then a pure function of the role.

use std::sync::Arc;

use crm_core::{AuthStore, UserTenantRole};
use uuid::Uuid;

#[derive(Clone)]
pub struct RoleResolver {
    store: Arc<dyn AuthStore>,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Active grant in effect for (user, tenant)
    pub async fn resolve_role(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> crm_core::Result<Option<UserTenantRole>> {
        if let Some(grant) = self.store.find_active_role(user_id, tenant_id).await? {
            return Ok(Some(grant));
        }
        self.store.find_platform_role(user_id).await
    }

    /// Whether the user's current role in the tenant allows `resource:action`
    ///
    /// Unknown resources, actions or roles, and store failures, all deny.
    pub async fn user_has_permission(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        resource: &str,
        action: &str,
    ) -> bool {
        match self.resolve_role(user_id, tenant_id).await {
            Ok(Some(grant)) => grant.role.permissions().allows(resource, action),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(%user_id, %tenant_id, error = %e, "Permission lookup failed, denying");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_core::{MembershipStore, MemoryStore, NewUser, Role, Tenant, TenantStore, UserStore};

    async fn setup() -> (Arc<MemoryStore>, RoleResolver, Uuid, Tenant, Tenant) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(NewUser::new("a@example.com", "A").unwrap(), "h".into())
            .await
            .unwrap();
        let a = store.create_tenant(Tenant::new("tenant-a", "A").unwrap()).await.unwrap();
        let b = store.create_tenant(Tenant::new("tenant-b", "B").unwrap()).await.unwrap();
        let resolver = RoleResolver::new(store.clone());
        (store, resolver, user.id, a, b)
    }

    #[tokio::test]
    async fn test_permission_follows_tenant_grant() {
        let (store, resolver, user_id, a, b) = setup().await;
        store.grant_role(user_id, Some(a.id), Role::Viewer).await.unwrap();

        assert!(resolver.user_has_permission(user_id, a.id, "leads", "read").await);
        assert!(!resolver.user_has_permission(user_id, a.id, "leads", "write").await);
        assert!(!resolver.user_has_permission(user_id, b.id, "leads", "read").await);
    }

    #[tokio::test]
    async fn test_unknown_names_deny() {
        let (store, resolver, user_id, a, _) = setup().await;
        store.grant_role(user_id, Some(a.id), Role::TenantOwner).await.unwrap();

        assert!(!resolver.user_has_permission(user_id, a.id, "invoices", "read").await);
        assert!(!resolver.user_has_permission(user_id, a.id, "leads", "approve").await);
    }

    #[tokio::test]
    async fn test_platform_grant_applies_everywhere() {
        let (store, resolver, user_id, a, b) = setup().await;
        store.grant_role(user_id, None, Role::PlatformAdmin).await.unwrap();

        for tenant in [&a, &b] {
            let grant = resolver.resolve_role(user_id, tenant.id).await.unwrap().unwrap();
            assert_eq!(grant.role, Role::PlatformAdmin);
        }
        assert!(resolver.user_has_permission(user_id, a.id, "tenants", "write").await);
    }

    #[tokio::test]
    async fn test_tenant_grant_wins_over_platform_grant() {
        let (store, resolver, user_id, a, _) = setup().await;
        store.grant_role(user_id, None, Role::PlatformAdmin).await.unwrap();
        store.grant_role(user_id, Some(a.id), Role::Viewer).await.unwrap();

        let grant = resolver.resolve_role(user_id, a.id).await.unwrap().unwrap();
        assert_eq!(grant.role, Role::Viewer);
    }
}
