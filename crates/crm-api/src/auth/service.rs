//! Authentication engine
//!
//! Verifies identity claims and creates or destroys sessions. Registration
//! never opens a session; the user logs in separately.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use crm_core::config::AuthConfig;
use crm_core::models::normalize_email;
use crm_core::{
    AccessDenial, AuthFailure, AuthStore, ConflictKind, CrmError, EntityKind, InvitationToken,
    Invitee, NewInvitation, NewSession, NewUser, PermissionSet, RedeemOutcome, Role, Session,
    Tenant, User, UserTenantRole, ValidationFailure,
};
use uuid::Uuid;

use super::password::{CredentialHasher, PasswordPolicy};
use super::resolver::RoleResolver;
use super::token::{generate_token, hash_token, is_well_formed, TokenPair};
use super::validator::AuthContext;

/// Input to [`AuthService::register_user`]
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: String,
    pub tenant_slug: String,
    pub role: Role,
}

/// A successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub tenant: Tenant,
    pub user_role: UserTenantRole,
    pub permissions: PermissionSet,
    pub session: Session,
    pub session_token: String,
    pub refresh_token: String,
}

/// A stored invitation and the raw token to deliver to the invitee
#[derive(Debug, Clone)]
pub struct IssuedInvitation {
    pub invitation: InvitationToken,
    pub token: String,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    resolver: RoleResolver,
    hasher: CredentialHasher,
    policy: PasswordPolicy,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(store: Arc<dyn AuthStore>, hasher: CredentialHasher, config: AuthConfig) -> Self {
        Self {
            resolver: RoleResolver::new(store.clone()),
            policy: PasswordPolicy::from(&config.password_policy),
            store,
            hasher,
            config,
        }
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    async fn active_tenant(&self, slug: &str) -> crm_core::Result<Tenant> {
        self.store
            .find_tenant_by_slug(slug)
            .await?
            .filter(Tenant::is_active)
            .ok_or(CrmError::NotFound(EntityKind::Tenant))
    }

    /// Register a user into a tenant with the requested role
    ///
    /// Creates the user, its credential and an active grant. No session.
    pub async fn register_user(
        &self,
        registration: Registration,
    ) -> crm_core::Result<(User, UserTenantRole)> {
        if registration.role.is_platform() {
            return Err(CrmError::Validation(ValidationFailure::InvalidRole(
                "platform_admin cannot be requested at registration".to_string(),
            )));
        }
        self.policy.validate(&registration.password)?;
        let new_user = NewUser::new(&registration.email, &registration.name)?;

        if self.store.find_user_by_email(&new_user.email).await?.is_some() {
            return Err(CrmError::Conflict(ConflictKind::EmailTaken));
        }
        let tenant = self.active_tenant(&registration.tenant_slug).await?;

        let password_hash = self.hasher.hash(&registration.password).await?;
        let user = self.store.create_user(new_user, password_hash).await?;
        let grant = self
            .store
            .grant_role(user.id, Some(tenant.id), registration.role)
            .await?;

        tracing::debug!(user_id = %user.id, tenant = %tenant.slug, role = %grant.role, "User registered");
        Ok((user, grant))
    }

    /// Authenticate and open a session bound to one tenant
    ///
    /// Unknown email, missing credential, wrong password and deactivated
    /// account all fail with the same `InvalidCredentials`.
    pub async fn login_user(
        &self,
        email: &str,
        password: &str,
        tenant_slug: &str,
    ) -> crm_core::Result<LoginOutcome> {
        let user = self.verify_credentials(email, password).await?;

        let tenant = self.active_tenant(tenant_slug).await?;
        let user_role = self
            .resolver
            .resolve_role(user.id, tenant.id)
            .await?
            .ok_or(CrmError::Authorization(AccessDenial::NoTenantAccess))?;

        let pair = TokenPair::generate();
        let session = self
            .store
            .create_session(NewSession::new(
                user.id,
                tenant.id,
                pair.session_hash(),
                pair.refresh_hash(),
                self.config.session_ttl(),
                self.config.refresh_ttl(),
            ))
            .await?;

        if let Err(e) = self.store.record_login(user.id, Utc::now()).await {
            tracing::warn!(user_id = %user.id, error = %e, "Failed to record last login");
        }

        Ok(LoginOutcome {
            permissions: user_role.role.permissions(),
            user,
            tenant,
            user_role,
            session,
            session_token: pair.session_token,
            refresh_token: pair.refresh_token,
        })
    }

    async fn verify_credentials(&self, email: &str, password: &str) -> crm_core::Result<User> {
        let user = match normalize_email(email) {
            Ok(email) => self.store.find_user_by_email(&email).await?,
            Err(_) => None,
        };
        let credential = match &user {
            Some(user) => self.store.get_credential(user.id).await?,
            None => None,
        };

        let (Some(user), Some(credential)) = (user, credential) else {
            self.hasher.verify_dummy(password).await;
            return Err(CrmError::invalid_credentials());
        };

        if !self.hasher.verify(password, &credential.password_hash).await? || !user.active {
            return Err(CrmError::invalid_credentials());
        }
        Ok(user)
    }

    /// Destroy the session behind a token
    ///
    /// Idempotent: unknown, malformed and already-removed tokens succeed
    /// with no state change. Returns the removed session, if any.
    pub async fn logout_user(&self, session_token: &str) -> crm_core::Result<Option<Session>> {
        if !is_well_formed(session_token) {
            return Ok(None);
        }
        let token_hash = hash_token(session_token);
        let session = self.store.find_session_by_token(&token_hash).await?;
        self.store.delete_session_by_token(&token_hash).await?;
        Ok(session)
    }

    /// Destroy every session of a user
    pub async fn logout_all(&self, user_id: Uuid) -> crm_core::Result<u64> {
        self.store.delete_user_sessions(user_id, None).await
    }

    /// Delete sessions that can no longer be refreshed
    pub async fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> crm_core::Result<u64> {
        let removed = self.store.delete_expired_sessions(now).await?;
        if removed > 0 {
            tracing::info!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    /// Replace a user's credential
    ///
    /// Unless disabled in configuration, every other session of the user is
    /// revoked; `keep_session` survives. Returns the number revoked.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
        keep_session: Option<Uuid>,
    ) -> crm_core::Result<u64> {
        let current_ok = match self.store.get_credential(user_id).await? {
            Some(credential) => {
                self.hasher
                    .verify(current_password, &credential.password_hash)
                    .await?
            }
            None => {
                self.hasher.verify_dummy(current_password).await;
                false
            }
        };
        if !current_ok {
            return Err(CrmError::Authentication(AuthFailure::CurrentPasswordIncorrect));
        }

        self.policy.validate(new_password)?;
        let password_hash = self.hasher.hash(new_password).await?;
        self.store.replace_credential(user_id, password_hash).await?;

        if self.config.revoke_sessions_on_password_change {
            self.store.delete_user_sessions(user_id, keep_session).await
        } else {
            Ok(0)
        }
    }

    /// Invite an email into the caller's tenant with a role
    pub async fn create_invitation(
        &self,
        ctx: &AuthContext,
        email: &str,
        role: Role,
    ) -> crm_core::Result<IssuedInvitation> {
        if !ctx.has_permission("users", "write") {
            return Err(CrmError::Authorization(AccessDenial::MissingPermission {
                resource: "users".to_string(),
                action: "write".to_string(),
            }));
        }
        if !ctx.role().can_grant(role) {
            return Err(CrmError::Authorization(AccessDenial::CannotGrant { role }));
        }

        let email = normalize_email(email)?;
        if let Some(existing) = self.store.find_user_by_email(&email).await? {
            if self
                .store
                .find_active_role(existing.id, ctx.tenant_id())
                .await?
                .is_some()
            {
                return Err(CrmError::Conflict(ConflictKind::ActiveRoleExists));
            }
        }

        let token = generate_token();
        let invitation = self
            .store
            .create_invitation(NewInvitation {
                email,
                tenant_id: ctx.tenant_id(),
                role,
                token_hash: hash_token(&token),
                invited_by: ctx.user.id,
                expires_at: Utc::now() + self.config.invitation_ttl(),
            })
            .await?;

        Ok(IssuedInvitation { invitation, token })
    }

    /// Redeem an invitation
    ///
    /// Creates the invited account if none exists (email counts as verified),
    /// otherwise the supplied password must match the existing account. Every
    /// input is validated before the store consumes the token and writes the
    /// grant in one step, so a rejected attempt leaves the invitation usable.
    pub async fn accept_invitation(
        &self,
        invite_token: &str,
        password: &str,
        name: Option<&str>,
    ) -> crm_core::Result<UserTenantRole> {
        let invalid = || CrmError::Validation(ValidationFailure::InvitationInvalid);

        if !is_well_formed(invite_token) {
            return Err(invalid());
        }
        let token_hash = hash_token(invite_token);
        let invitation = self
            .store
            .find_invitation(&token_hash)
            .await?
            .filter(|invitation| !invitation.is_consumed())
            .ok_or_else(invalid)?;

        if invitation.is_expired(Utc::now()) {
            return Err(CrmError::Validation(ValidationFailure::InvitationExpired {
                invitation_id: invitation.id,
            }));
        }
        self.policy.validate(password)?;

        self.store
            .find_tenant(invitation.tenant_id)
            .await?
            .filter(Tenant::is_active)
            .ok_or(CrmError::NotFound(EntityKind::Tenant))?;

        let invitee = match self.store.find_user_by_email(&invitation.email).await? {
            Some(user) => {
                let credential = self
                    .store
                    .get_credential(user.id)
                    .await?
                    .ok_or_else(CrmError::invalid_credentials)?;
                if !self.hasher.verify(password, &credential.password_hash).await? {
                    return Err(CrmError::invalid_credentials());
                }
                if self
                    .store
                    .find_active_role(user.id, invitation.tenant_id)
                    .await?
                    .is_some()
                {
                    return Err(CrmError::Conflict(ConflictKind::ActiveRoleExists));
                }
                Invitee::Existing(user.id)
            }
            None => {
                let default_name = invitation
                    .email
                    .split('@')
                    .next()
                    .unwrap_or(invitation.email.as_str());
                let user =
                    NewUser::new(&invitation.email, name.unwrap_or(default_name))?.verified();
                Invitee::New {
                    user,
                    password_hash: self.hasher.hash(password).await?,
                }
            }
        };

        match self
            .store
            .redeem_invitation(&token_hash, invitee, Utc::now())
            .await?
        {
            RedeemOutcome::Redeemed(redemption) => {
                tracing::debug!(
                    invitation_id = %redemption.invitation.id,
                    user_id = %redemption.user.id,
                    role = %redemption.grant.role,
                    "Invitation redeemed"
                );
                Ok(redemption.grant)
            }
            RedeemOutcome::Expired { invitation_id } => Err(CrmError::Validation(
                ValidationFailure::InvitationExpired { invitation_id },
            )),
            RedeemOutcome::AlreadyConsumed | RedeemOutcome::Unknown => Err(invalid()),
        }
    }
}
