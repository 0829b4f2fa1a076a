//! In-process store
//!
//! Every operation runs under a single lock, which gives the same
//! atomicity the PostgreSQL store gets from conditional updates and
//! partial unique indexes. Intended for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AuthStore, InvitationStore, Invitee, Member, MembershipStore, RedeemOutcome, Redemption,
    RotateOutcome, SessionRotation, SessionStore, TenantStore, UserStore,
};
use crate::error::{ConflictKind, CrmError, EntityKind};
use crate::models::{
    Credential, InvitationToken, NewInvitation, NewSession, NewUser, Session, Tenant,
    TenantStatus, User, UserTenantRole,
};
use crate::role::Role;
use crate::Result;

#[derive(Debug)]
struct ConsumedRefresh {
    session_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    credentials: HashMap<Uuid, Credential>,
    tenants: HashMap<Uuid, Tenant>,
    roles: Vec<UserTenantRole>,
    sessions: HashMap<Uuid, Session>,
    consumed_refresh: HashMap<String, ConsumedRefresh>,
    invitations: HashMap<Uuid, InvitationToken>,
}

impl Inner {
    fn active_role_index(&self, user_id: Uuid, tenant_id: Option<Uuid>) -> Option<usize> {
        self.roles
            .iter()
            .position(|r| r.active && r.user_id == user_id && r.tenant_id == tenant_id)
    }
}

/// Process-local implementation of every store trait
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: NewUser, password_hash: String) -> Result<User> {
        let mut inner = self.inner.lock().await;
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(CrmError::Conflict(ConflictKind::EmailTaken));
        }

        let user = user.into_user();
        inner
            .credentials
            .insert(user.id, Credential::argon2id(user.id, password_hash));
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>> {
        Ok(self.inner.lock().await.credentials.get(&user_id).cloned())
    }

    async fn replace_credential(&self, user_id: Uuid, password_hash: String) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.users.contains_key(&user_id) {
            return Err(CrmError::NotFound(EntityKind::User));
        }
        inner
            .credentials
            .insert(user_id, Credential::argon2id(user_id, password_hash));
        Ok(())
    }

    async fn set_user_active(&self, user_id: Uuid, active: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(CrmError::NotFound(EntityKind::User))?;
        user.active = active;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn record_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(user) = self.inner.lock().await.users.get_mut(&user_id) {
            user.last_login = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn create_tenant(&self, tenant: Tenant) -> Result<Tenant> {
        let mut inner = self.inner.lock().await;
        if inner.tenants.values().any(|t| t.slug == tenant.slug) {
            return Err(CrmError::Conflict(ConflictKind::SlugTaken));
        }
        inner.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        let inner = self.inner.lock().await;
        Ok(inner.tenants.values().find(|t| t.slug == slug).cloned())
    }

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        Ok(self.inner.lock().await.tenants.get(&id).cloned())
    }

    async fn set_tenant_status(&self, id: Uuid, status: TenantStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let tenant = inner
            .tenants
            .get_mut(&id)
            .ok_or(CrmError::NotFound(EntityKind::Tenant))?;
        tenant.status = status;
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let inner = self.inner.lock().await;
        let mut tenants: Vec<Tenant> = inner.tenants.values().cloned().collect();
        tenants.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(tenants)
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn grant_role(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        role: Role,
    ) -> Result<UserTenantRole> {
        let mut inner = self.inner.lock().await;
        if inner.active_role_index(user_id, tenant_id).is_some() {
            return Err(CrmError::Conflict(ConflictKind::ActiveRoleExists));
        }
        let grant = UserTenantRole::new(user_id, tenant_id, role);
        inner.roles.push(grant.clone());
        Ok(grant)
    }

    async fn find_active_role(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<UserTenantRole>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .active_role_index(user_id, Some(tenant_id))
            .map(|i| inner.roles[i].clone()))
    }

    async fn find_platform_role(&self, user_id: Uuid) -> Result<Option<UserTenantRole>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .active_role_index(user_id, None)
            .map(|i| inner.roles[i].clone()))
    }

    async fn deactivate_role(&self, user_id: Uuid, tenant_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.active_role_index(user_id, Some(tenant_id)) {
            Some(i) => {
                let grant = &mut inner.roles[i];
                grant.active = false;
                grant.deactivated_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn change_role(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        role: Role,
    ) -> Result<UserTenantRole> {
        let mut inner = self.inner.lock().await;
        let i = inner
            .active_role_index(user_id, Some(tenant_id))
            .ok_or(CrmError::NotFound(EntityKind::Membership))?;

        let current = &mut inner.roles[i];
        current.active = false;
        current.deactivated_at = Some(Utc::now());

        let grant = UserTenantRole::new(user_id, Some(tenant_id), role);
        inner.roles.push(grant.clone());
        Ok(grant)
    }

    async fn list_memberships_for_user(&self, user_id: Uuid) -> Result<Vec<UserTenantRole>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .roles
            .iter()
            .filter(|r| r.active && r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_members(&self, tenant_id: Uuid) -> Result<Vec<Member>> {
        let inner = self.inner.lock().await;
        let mut members: Vec<Member> = inner
            .roles
            .iter()
            .filter(|r| r.active && r.tenant_id == Some(tenant_id))
            .filter_map(|r| {
                inner.users.get(&r.user_id).map(|user| Member {
                    user: user.clone(),
                    membership: r.clone(),
                })
            })
            .collect();
        members.sort_by(|a, b| a.user.email.cmp(&b.user.email));
        Ok(members)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: NewSession) -> Result<Session> {
        let session = session.into_session();
        self.inner
            .lock()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_session_by_token(&self, token_hash: &str) -> Result<Option<Session>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn delete_session_by_token(&self, token_hash: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.token_hash != token_hash);
        Ok(inner.sessions.len() < before)
    }

    async fn rotate_session(&self, rotation: SessionRotation) -> Result<RotateOutcome> {
        let mut inner = self.inner.lock().await;

        if let Some(spent) = inner.consumed_refresh.get(&rotation.presented_refresh_hash) {
            return Ok(RotateOutcome::Reused {
                session_id: spent.session_id,
            });
        }

        let Some(session) = inner
            .sessions
            .values_mut()
            .find(|s| s.refresh_token_hash == rotation.presented_refresh_hash)
        else {
            return Ok(RotateOutcome::Unknown);
        };

        if !session.is_refreshable(rotation.now) {
            return Ok(RotateOutcome::Expired {
                session_id: session.id,
            });
        }

        let spent = ConsumedRefresh {
            session_id: session.id,
            expires_at: session.refresh_expires_at,
        };
        session.token_hash = rotation.new_token_hash;
        session.refresh_token_hash = rotation.new_refresh_hash;
        session.expires_at = rotation.expires_at;
        session.refresh_expires_at = rotation.refresh_expires_at;
        let rotated = session.clone();

        inner
            .consumed_refresh
            .insert(rotation.presented_refresh_hash, spent);
        Ok(RotateOutcome::Rotated(rotated))
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .await
            .sessions
            .remove(&session_id)
            .is_some())
    }

    async fn delete_user_sessions(&self, user_id: Uuid, keep: Option<Uuid>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner
            .sessions
            .retain(|id, s| s.user_id != user_id || Some(*id) == keep);
        Ok((before - inner.sessions.len()) as u64)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.is_refreshable(now));
        inner.consumed_refresh.retain(|_, c| c.expires_at > now);
        Ok((before - inner.sessions.len()) as u64)
    }
}

#[async_trait]
impl InvitationStore for MemoryStore {
    async fn create_invitation(&self, invitation: NewInvitation) -> Result<InvitationToken> {
        let invitation = invitation.into_invitation();
        self.inner
            .lock()
            .await
            .invitations
            .insert(invitation.id, invitation.clone());
        Ok(invitation)
    }

    async fn find_invitation(&self, token_hash: &str) -> Result<Option<InvitationToken>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .invitations
            .values()
            .find(|i| i.token_hash == token_hash)
            .cloned())
    }

    async fn redeem_invitation(
        &self,
        token_hash: &str,
        invitee: Invitee,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        let mut inner = self.inner.lock().await;
        let Some(invitation) = inner
            .invitations
            .values()
            .find(|i| i.token_hash == token_hash)
            .cloned()
        else {
            return Ok(RedeemOutcome::Unknown);
        };

        if invitation.is_consumed() {
            return Ok(RedeemOutcome::AlreadyConsumed);
        }
        if invitation.is_expired(now) {
            return Ok(RedeemOutcome::Expired {
                invitation_id: invitation.id,
            });
        }

        // All checks happen before the first write so a conflict leaves nothing behind
        let tenant_id = Some(invitation.tenant_id);
        let user = match invitee {
            Invitee::Existing(user_id) => {
                if inner.active_role_index(user_id, tenant_id).is_some() {
                    return Err(CrmError::Conflict(ConflictKind::ActiveRoleExists));
                }
                let user = inner
                    .users
                    .get_mut(&user_id)
                    .ok_or(CrmError::NotFound(EntityKind::User))?;
                if !user.active {
                    user.active = true;
                    user.updated_at = now;
                }
                user.clone()
            }
            Invitee::New {
                user,
                password_hash,
            } => {
                if inner.users.values().any(|u| u.email == user.email) {
                    return Err(CrmError::Conflict(ConflictKind::EmailTaken));
                }
                let user = user.into_user();
                inner
                    .credentials
                    .insert(user.id, Credential::argon2id(user.id, password_hash));
                inner.users.insert(user.id, user.clone());
                user
            }
        };

        let grant = UserTenantRole::new(user.id, tenant_id, invitation.role);
        inner.roles.push(grant.clone());

        let stored = inner
            .invitations
            .get_mut(&invitation.id)
            .ok_or(CrmError::NotFound(EntityKind::Invitation))?;
        stored.consumed_at = Some(now);
        let invitation = stored.clone();

        Ok(RedeemOutcome::Redeemed(Redemption {
            invitation,
            user,
            grant,
        }))
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
