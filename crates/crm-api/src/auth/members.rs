//! Membership administration within the caller's tenant

use std::sync::Arc;

use crm_core::{
    AccessDenial, AuthStore, CrmError, EntityKind, Member, Role, UserTenantRole,
    ValidationFailure,
};
use uuid::Uuid;

use super::validator::AuthContext;

/// Outcome of a role change
#[derive(Debug, Clone)]
pub struct RoleChange {
    pub previous: Role,
    pub current: UserTenantRole,
}

#[derive(Clone)]
pub struct MembershipService {
    store: Arc<dyn AuthStore>,
}

fn require(ctx: &AuthContext, resource: &str, action: &str) -> crm_core::Result<()> {
    if ctx.has_permission(resource, action) {
        Ok(())
    } else {
        Err(CrmError::Authorization(AccessDenial::MissingPermission {
            resource: resource.to_string(),
            action: action.to_string(),
        }))
    }
}

impl MembershipService {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Active members of the caller's tenant
    pub async fn list_members(&self, ctx: &AuthContext) -> crm_core::Result<Vec<Member>> {
        require(ctx, "users", "read")?;
        self.store.list_members(ctx.tenant_id()).await
    }

    /// Active grant of a member other than the caller, checked for manageability
    async fn manageable_grant(
        &self,
        ctx: &AuthContext,
        user_id: Uuid,
    ) -> crm_core::Result<UserTenantRole> {
        require(ctx, "users", "write")?;
        if user_id == ctx.user.id {
            return Err(CrmError::Validation(ValidationFailure::SelfModification));
        }

        let current = self
            .store
            .find_active_role(user_id, ctx.tenant_id())
            .await?
            .ok_or(CrmError::NotFound(EntityKind::Membership))?;

        // Owners can only be touched by owners
        if !ctx.role().can_grant(current.role) {
            return Err(CrmError::Authorization(AccessDenial::CannotGrant {
                role: current.role,
            }));
        }
        Ok(current)
    }

    /// Replace a member's role; the old grant row is kept as inactive history
    pub async fn change_member_role(
        &self,
        ctx: &AuthContext,
        user_id: Uuid,
        role: Role,
    ) -> crm_core::Result<RoleChange> {
        let existing = self.manageable_grant(ctx, user_id).await?;
        if !ctx.role().can_grant(role) {
            return Err(CrmError::Authorization(AccessDenial::CannotGrant { role }));
        }
        let previous = existing.role;
        let current = if previous == role {
            existing
        } else {
            self.store.change_role(user_id, ctx.tenant_id(), role).await?
        };
        Ok(RoleChange { previous, current })
    }

    /// Remove a member from the caller's tenant
    ///
    /// Their open sessions for this tenant fail the next validation.
    pub async fn deactivate_member(
        &self,
        ctx: &AuthContext,
        user_id: Uuid,
    ) -> crm_core::Result<UserTenantRole> {
        let current = self.manageable_grant(ctx, user_id).await?;
        if !self.store.deactivate_role(user_id, ctx.tenant_id()).await? {
            return Err(CrmError::NotFound(EntityKind::Membership));
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_core::{
        MembershipStore, MemoryStore, NewUser, Tenant, TenantStore, User, UserStore,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        service: MembershipService,
        tenant: Tenant,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let tenant = store
            .create_tenant(Tenant::new("demo", "Demo").unwrap())
            .await
            .unwrap();
        Fixture {
            service: MembershipService::new(store.clone()),
            store,
            tenant,
        }
    }

    async fn member(f: &Fixture, email: &str, role: Role) -> (User, UserTenantRole) {
        let user = f
            .store
            .create_user(NewUser::new(email, "Member").unwrap(), "hash".into())
            .await
            .unwrap();
        let grant = f
            .store
            .grant_role(user.id, Some(f.tenant.id), role)
            .await
            .unwrap();
        (user, grant)
    }

    fn context(f: &Fixture, user: User, user_role: UserTenantRole) -> AuthContext {
        AuthContext {
            permissions: user_role.role.permissions(),
            user,
            tenant: f.tenant.clone(),
            user_role,
            session_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_admin_lists_and_changes_roles() {
        let f = fixture().await;
        let (admin, admin_grant) = member(&f, "admin@example.com", Role::TenantAdmin).await;
        let (agent, _) = member(&f, "agent@example.com", Role::Agent).await;
        let ctx = context(&f, admin, admin_grant);

        assert_eq!(f.service.list_members(&ctx).await.unwrap().len(), 2);

        let change = f
            .service
            .change_member_role(&ctx, agent.id, Role::Viewer)
            .await
            .unwrap();
        assert_eq!(change.previous, Role::Agent);
        assert_eq!(change.current.role, Role::Viewer);
        let resolved = f
            .store
            .find_active_role(agent.id, f.tenant.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.role, Role::Viewer);
    }

    #[tokio::test]
    async fn test_cannot_modify_self() {
        let f = fixture().await;
        let (admin, admin_grant) = member(&f, "admin@example.com", Role::TenantAdmin).await;
        let admin_id = admin.id;
        let ctx = context(&f, admin, admin_grant);

        assert!(matches!(
            f.service.deactivate_member(&ctx, admin_id).await,
            Err(CrmError::Validation(ValidationFailure::SelfModification))
        ));
    }

    #[tokio::test]
    async fn test_admin_cannot_touch_owner() {
        let f = fixture().await;
        let (admin, admin_grant) = member(&f, "admin@example.com", Role::TenantAdmin).await;
        let (owner, _) = member(&f, "owner@example.com", Role::TenantOwner).await;
        let (agent, _) = member(&f, "agent@example.com", Role::Agent).await;
        let ctx = context(&f, admin, admin_grant);

        assert!(matches!(
            f.service.deactivate_member(&ctx, owner.id).await,
            Err(CrmError::Authorization(AccessDenial::CannotGrant { .. }))
        ));
        assert!(matches!(
            f.service
                .change_member_role(&ctx, agent.id, Role::TenantOwner)
                .await,
            Err(CrmError::Authorization(AccessDenial::CannotGrant { .. }))
        ));
    }

    #[tokio::test]
    async fn test_deactivation_removes_access() {
        let f = fixture().await;
        let (owner, owner_grant) = member(&f, "owner@example.com", Role::TenantOwner).await;
        let (agent, _) = member(&f, "agent@example.com", Role::Agent).await;
        let ctx = context(&f, owner, owner_grant);

        f.service.deactivate_member(&ctx, agent.id).await.unwrap();
        assert!(f
            .store
            .find_active_role(agent.id, f.tenant.id)
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            f.service.deactivate_member(&ctx, agent.id).await,
            Err(CrmError::NotFound(EntityKind::Membership))
        ));
    }

    #[tokio::test]
    async fn test_agents_cannot_manage_members() {
        let f = fixture().await;
        let (agent, agent_grant) = member(&f, "agent@example.com", Role::Agent).await;
        let (viewer, _) = member(&f, "viewer@example.com", Role::Viewer).await;
        let ctx = context(&f, agent, agent_grant);

        assert!(matches!(
            f.service.list_members(&ctx).await,
            Err(CrmError::Authorization(AccessDenial::MissingPermission { .. }))
        ));
        assert!(matches!(
            f.service.deactivate_member(&ctx, viewer.id).await,
            Err(CrmError::Authorization(AccessDenial::MissingPermission { .. }))
        ));
    }
}
