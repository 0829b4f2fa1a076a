//! Identity and access models
//!
//! Rows as the stores hand them out. Secrets are never held in plaintext:
//! sessions and invitations only carry SHA-256 hashes of their tokens.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CrmError, ValidationFailure};
use crate::role::Role;

/// Hashing algorithm tag written next to every credential
pub const PASSWORD_ALGORITHM: &str = "argon2id";

const MAX_NAME_LEN: usize = 200;
const MAX_EMAIL_LEN: usize = 254;

/// A human identity. Not tenant-scoped; one user may belong to many tenants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Always stored lowercased
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    /// Users are soft-deactivated, never deleted
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Password material for a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: Uuid,
    pub algorithm: String,
    /// PHC string, salt included
    pub password_hash: String,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn argon2id(user_id: Uuid, password_hash: String) -> Self {
        Self {
            user_id,
            algorithm: PASSWORD_ALGORITHM.to_string(),
            password_hash,
            updated_at: Utc::now(),
        }
    }
}

/// Tenant lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
        }
    }

    /// Unknown values are read as suspended so a corrupt row never grants access
    pub fn from_db(value: &str) -> Self {
        match value {
            "active" => TenantStatus::Active,
            _ => TenantStatus::Suspended,
        }
    }
}

/// An isolated organization namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    /// URL-safe and immutable once created
    pub slug: String,
    pub name: String,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(slug: &str, name: &str) -> crate::Result<Self> {
        validate_slug(slug)?;
        validate_name(name)?;
        Ok(Self {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            name: name.trim().to_string(),
            status: TenantStatus::Active,
            created_at: Utc::now(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }

    /// Matches either the tenant id or its slug
    pub fn matches_ident(&self, ident: &str) -> bool {
        self.slug == ident || self.id.to_string() == ident.to_ascii_lowercase()
    }
}

/// Grant of a role to a user within a tenant, or platform-wide when `tenant_id` is `None`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTenantRole {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub role: Role,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl UserTenantRole {
    pub fn new(user_id: Uuid, tenant_id: Option<Uuid>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            tenant_id,
            role,
            active: true,
            joined_at: Utc::now(),
            deactivated_at: None,
        }
    }

    pub fn is_platform(&self) -> bool {
        self.tenant_id.is_none()
    }
}

/// Server-side session bound to a (user, tenant) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub token_hash: String,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_refreshable(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at > now
    }
}

/// Input for a new session; the store assigns nothing but persists as given
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub token_hash: String,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl NewSession {
    pub fn new(
        user_id: Uuid,
        tenant_id: Uuid,
        token_hash: String,
        refresh_token_hash: String,
        session_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            tenant_id,
            token_hash,
            refresh_token_hash,
            expires_at: now + session_ttl,
            refresh_expires_at: now + refresh_ttl,
        }
    }

    pub fn into_session(self) -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            tenant_id: self.tenant_id,
            token_hash: self.token_hash,
            refresh_token_hash: self.refresh_token_hash,
            expires_at: self.expires_at,
            refresh_expires_at: self.refresh_expires_at,
            created_at: Utc::now(),
        }
    }
}

/// Single-use, time-limited invitation into a tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationToken {
    pub id: Uuid,
    pub email: String,
    pub tenant_id: Uuid,
    pub role: Role,
    pub token_hash: String,
    pub invited_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InvitationToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub email: String,
    pub tenant_id: Uuid,
    pub role: Role,
    pub token_hash: String,
    pub invited_by: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl NewInvitation {
    pub fn into_invitation(self) -> InvitationToken {
        InvitationToken {
            id: Uuid::new_v4(),
            email: self.email,
            tenant_id: self.tenant_id,
            role: self.role,
            token_hash: self.token_hash,
            invited_by: self.invited_by,
            expires_at: self.expires_at,
            consumed_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Input for a new user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub email_verified: bool,
}

impl NewUser {
    /// Normalizes and validates email and name
    pub fn new(email: &str, name: &str) -> crate::Result<Self> {
        let email = normalize_email(email)?;
        validate_name(name)?;
        Ok(Self {
            email,
            name: name.trim().to_string(),
            email_verified: false,
        })
    }

    pub fn verified(mut self) -> Self {
        self.email_verified = true;
        self
    }

    pub fn into_user(self) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: self.email,
            name: self.name,
            email_verified: self.email_verified,
            active: true,
            created_at: now,
            updated_at: now,
            last_login: None,
        }
    }
}

/// Trim and lowercase an email, rejecting obviously malformed input
pub fn normalize_email(email: &str) -> crate::Result<String> {
    let email = email.trim().to_lowercase();
    let valid = email.len() <= MAX_EMAIL_LEN
        && !email.chars().any(char::is_whitespace)
        && match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            }
            None => false,
        };

    if valid {
        Ok(email)
    } else {
        Err(CrmError::Validation(ValidationFailure::InvalidEmail))
    }
}

fn validate_name(name: &str) -> crate::Result<()> {
    let len = name.trim().chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(CrmError::Validation(ValidationFailure::InvalidName));
    }
    Ok(())
}

/// Slugs are 2-63 chars of `[a-z0-9]` separated by single hyphens
pub fn validate_slug(slug: &str) -> crate::Result<()> {
    let well_formed = (2..=63).contains(&slug.len())
        && slug
            .split('-')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));

    if well_formed {
        Ok(())
    } else {
        Err(CrmError::Validation(ValidationFailure::InvalidSlug))
    }
}
