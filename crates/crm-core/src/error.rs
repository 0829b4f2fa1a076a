//! Error taxonomy for the auth core
//!
//! Every failure carries a structured kind. Callers match on variants,
//! never on message text.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::role::Role;

/// Core error type shared by stores, the authentication engine and guards
#[derive(Error, Debug)]
pub enum CrmError {
    /// Bad input shape or policy violation; the caller can fix the input
    #[error("Validation error: {0}")]
    Validation(ValidationFailure),

    /// Identity could not be established
    #[error("Authentication failed: {0}")]
    Authentication(AuthFailure),

    /// Identity established but rights are insufficient
    #[error("Access denied: {0}")]
    Authorization(AccessDenial),

    /// Uniqueness violation
    #[error("Conflict: {0}")]
    Conflict(ConflictKind),

    /// Referenced entity is absent
    #[error("{0} not found")]
    NotFound(EntityKind),

    /// Store failure or unexpected condition
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CrmError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn invalid_credentials() -> Self {
        Self::Authentication(AuthFailure::InvalidCredentials)
    }
}

/// Input and policy failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    WeakPassword(String),
    InvalidEmail,
    InvalidName,
    InvalidSlug,
    InvalidRole(String),
    InvitationExpired { invitation_id: Uuid },
    InvitationInvalid,
    SelfModification,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WeakPassword(reason) => write!(f, "{reason}"),
            Self::InvalidEmail => write!(f, "email address is not valid"),
            Self::InvalidName => write!(f, "name must be between 1 and 200 characters"),
            Self::InvalidSlug => write!(
                f,
                "slug must be 2-63 lowercase letters, digits or single hyphens"
            ),
            Self::InvalidRole(reason) => write!(f, "{reason}"),
            Self::InvitationExpired { .. } => write!(f, "invitation has expired"),
            Self::InvitationInvalid => write!(f, "invitation is invalid or has already been used"),
            Self::SelfModification => write!(f, "you cannot change your own membership"),
        }
    }
}

/// Reasons identity could not be established
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// Unknown user, missing credential or wrong password. One variant on purpose.
    InvalidCredentials,
    CurrentPasswordIncorrect,
    MissingToken,
    InvalidToken,
    ExpiredToken,
    RefreshTokenReused { session_id: Uuid },
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "Invalid credentials"),
            Self::CurrentPasswordIncorrect => write!(f, "current password incorrect"),
            Self::MissingToken => write!(f, "token missing"),
            Self::InvalidToken => write!(f, "token invalid"),
            Self::ExpiredToken => write!(f, "token expired"),
            Self::RefreshTokenReused { .. } => write!(f, "refresh token already used"),
        }
    }
}

/// Reasons an authenticated caller is refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDenial {
    NoTenantAccess,
    TenantMismatch { requested: String },
    MissingRole { required: Vec<Role> },
    MissingPermission { resource: String, action: String },
    CannotGrant { role: Role },
}

impl fmt::Display for AccessDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTenantAccess => write!(f, "no access to this tenant"),
            Self::TenantMismatch { requested } => {
                write!(f, "session is not valid for tenant '{requested}'")
            }
            Self::MissingRole { required } => {
                let names: Vec<&str> = required.iter().map(Role::as_str).collect();
                write!(f, "requires one of roles: {}", names.join(", "))
            }
            Self::MissingPermission { resource, action } => {
                write!(f, "requires permission {resource}:{action}")
            }
            Self::CannotGrant { role } => write!(f, "not allowed to grant role {role}"),
        }
    }
}

/// Uniqueness violations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    EmailTaken,
    SlugTaken,
    ActiveRoleExists,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmailTaken => write!(f, "email already registered"),
            Self::SlugTaken => write!(f, "tenant slug already in use"),
            Self::ActiveRoleExists => write!(f, "user already has an active role in this tenant"),
        }
    }
}

/// Entities that can be reported missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Tenant,
    Invitation,
    Membership,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::User => "User",
            Self::Tenant => "Tenant",
            Self::Invitation => "Invitation",
            Self::Membership => "Membership",
        };
        f.write_str(name)
    }
}

impl From<sqlx::Error> for CrmError {
    fn from(err: sqlx::Error) -> Self {
        CrmError::Internal(format!("Database error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_failures_share_one_message() {
        let unknown_user = CrmError::invalid_credentials();
        let wrong_password = CrmError::invalid_credentials();
        assert_eq!(unknown_user.to_string(), wrong_password.to_string());
        assert_eq!(
            unknown_user.to_string(),
            "Authentication failed: Invalid credentials"
        );
    }

    #[test]
    fn test_invitation_messages() {
        let expired = ValidationFailure::InvitationExpired {
            invitation_id: Uuid::new_v4(),
        };
        assert!(expired.to_string().contains("expired"));
        assert!(ValidationFailure::InvitationInvalid
            .to_string()
            .contains("invalid"));
    }

    #[test]
    fn test_missing_role_lists_requirements() {
        let denial = AccessDenial::MissingRole {
            required: vec![Role::TenantOwner, Role::TenantAdmin],
        };
        assert_eq!(
            denial.to_string(),
            "requires one of roles: tenant_owner, tenant_admin"
        );
    }
}
