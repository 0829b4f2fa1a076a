//! CRM Core - Domain models, permissions, and auth stores
//!
//! This crate defines the shared abstractions of the multi-tenant auth core:
//! - Identity models (users, credentials, tenants, role grants, sessions, invitations)
//! - The closed role enumeration and its table-driven permission sets
//! - The error taxonomy used across the auth core
//! - Store traits with PostgreSQL and in-memory implementations
//! - Configuration management

pub mod config;
pub mod error;
pub mod models;
pub mod role;
pub mod store;

pub use config::{AppConfig, AuthConfig, ConfigError, DatabaseConfig, StoreBackend};
pub use error::{AccessDenial, AuthFailure, ConflictKind, CrmError, EntityKind, ValidationFailure};
pub use models::{
    Credential, InvitationToken, NewInvitation, NewSession, NewUser, Session, Tenant,
    TenantStatus, User, UserTenantRole,
};
pub use role::{Action, Permission, PermissionSet, Resource, Role};
pub use store::{
    AuthStore, InvitationStore, Invitee, Member, MembershipStore, MemoryStore, PgStore,
    RedeemOutcome, Redemption, RotateOutcome, SessionRotation, SessionStore, TenantStore,
    UserStore,
};

pub type Result<T> = std::result::Result<T, CrmError>;
