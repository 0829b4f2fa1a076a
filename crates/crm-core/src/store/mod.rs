//! Persistence interfaces for the auth core
//!
//! The store is the only shared mutable state. Everything that must be
//! atomic (session rotation, invitation consumption, the single active
//! role per tenant) is expressed as one conditional write inside the
//! store, never as a read followed by a write in the caller.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Credential, InvitationToken, NewInvitation, NewSession, NewUser, Session, Tenant,
    TenantStatus, User, UserTenantRole,
};
use crate::role::Role;
use crate::Result;

/// Replacement secrets for a session, keyed by the refresh token being spent
#[derive(Debug, Clone)]
pub struct SessionRotation {
    pub presented_refresh_hash: String,
    pub new_token_hash: String,
    pub new_refresh_hash: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

/// Result of a conditional session rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// Both secrets replaced; same session id
    Rotated(Session),
    /// The refresh token was already spent by an earlier rotation
    Reused { session_id: Uuid },
    /// Matching session whose refresh expiry has passed
    Expired { session_id: Uuid },
    Unknown,
}

/// Who an invitation is redeemed for
#[derive(Debug, Clone)]
pub enum Invitee {
    /// An existing account; reactivated if it was deactivated
    Existing(Uuid),
    /// A new account created together with its credential
    New { user: NewUser, password_hash: String },
}

/// Everything written by a successful redemption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub invitation: InvitationToken,
    pub user: User,
    pub grant: UserTenantRole,
}

/// Result of a conditional invitation redemption
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    Redeemed(Redemption),
    Expired { invitation_id: Uuid },
    AlreadyConsumed,
    Unknown,
}

/// A tenant member with the grant that makes them one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user: User,
    pub membership: UserTenantRole,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create a user and its credential together.
    /// Fails with `Conflict(EmailTaken)` when the email is in use.
    async fn create_user(&self, user: NewUser, password_hash: String) -> Result<User>;

    /// Lookup by already-normalized email
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_user(&self, id: Uuid) -> Result<Option<User>>;

    async fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>>;

    /// Replace the credential wholesale
    async fn replace_credential(&self, user_id: Uuid, password_hash: String) -> Result<()>;

    async fn set_user_active(&self, user_id: Uuid, active: bool) -> Result<()>;

    async fn record_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Fails with `Conflict(SlugTaken)` when the slug is in use
    async fn create_tenant(&self, tenant: Tenant) -> Result<Tenant>;

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>>;

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>>;

    async fn set_tenant_status(&self, id: Uuid, status: TenantStatus) -> Result<()>;

    async fn list_tenants(&self) -> Result<Vec<Tenant>>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Insert an active grant. `tenant_id` is `None` for platform grants.
    /// Fails with `Conflict(ActiveRoleExists)` if one is already active for the pair.
    async fn grant_role(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        role: Role,
    ) -> Result<UserTenantRole>;

    async fn find_active_role(&self, user_id: Uuid, tenant_id: Uuid)
        -> Result<Option<UserTenantRole>>;

    async fn find_platform_role(&self, user_id: Uuid) -> Result<Option<UserTenantRole>>;

    /// Flip the active grant to inactive. Returns false if there was none.
    async fn deactivate_role(&self, user_id: Uuid, tenant_id: Uuid) -> Result<bool>;

    /// Deactivate the current grant and insert a new active one in one step.
    /// Fails with `NotFound(Membership)` if no active grant exists.
    async fn change_role(&self, user_id: Uuid, tenant_id: Uuid, role: Role)
        -> Result<UserTenantRole>;

    /// Active grants of a user, platform grant included
    async fn list_memberships_for_user(&self, user_id: Uuid) -> Result<Vec<UserTenantRole>>;

    /// Active members of a tenant
    async fn list_members(&self, tenant_id: Uuid) -> Result<Vec<Member>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: NewSession) -> Result<Session>;

    async fn find_session_by_token(&self, token_hash: &str) -> Result<Option<Session>>;

    /// Returns whether a row was removed
    async fn delete_session_by_token(&self, token_hash: &str) -> Result<bool>;

    /// Atomically swap both secrets if `presented_refresh_hash` is current and unexpired.
    /// Of two concurrent rotations with the same token, at most one sees `Rotated`.
    async fn rotate_session(&self, rotation: SessionRotation) -> Result<RotateOutcome>;

    async fn delete_session(&self, session_id: Uuid) -> Result<bool>;

    /// Delete every session of a user except `keep`
    async fn delete_user_sessions(&self, user_id: Uuid, keep: Option<Uuid>) -> Result<u64>;

    /// Delete sessions that can no longer be refreshed, and spent refresh tokens past their expiry
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait InvitationStore: Send + Sync {
    async fn create_invitation(&self, invitation: NewInvitation) -> Result<InvitationToken>;

    async fn find_invitation(&self, token_hash: &str) -> Result<Option<InvitationToken>>;

    /// Consume the invitation and grant its role to `invitee` as one write.
    ///
    /// Only an unconsumed invitation unexpired at `now` is redeemed. A
    /// conflict (`EmailTaken`, `ActiveRoleExists`) fails the whole write and
    /// leaves the invitation unconsumed.
    async fn redeem_invitation(
        &self,
        token_hash: &str,
        invitee: Invitee,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome>;
}

/// Everything the auth core needs from persistence
#[async_trait]
pub trait AuthStore:
    UserStore + TenantStore + MembershipStore + SessionStore + InvitationStore
{
    /// Cheap round trip used by readiness checks
    async fn ping(&self) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}
