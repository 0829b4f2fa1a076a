//! Authentication and authorization
//!
//! - `token`: opaque random bearer secrets and their storage hashes
//! - `password`: Argon2id hashing and the strength policy
//! - `service`: registration, login, logout, invitations, password change
//! - `validator`: token to [`AuthContext`] on every request
//! - `resolver`: effective role and permission checks
//! - `refresh`: single-use refresh token rotation
//! - `members`: membership administration inside a tenant
//! - `middleware`: guards and axum extractors

pub mod members;
pub mod middleware;
pub mod models;
pub mod password;
pub mod refresh;
pub mod resolver;
pub mod service;
pub mod token;
pub mod validator;

pub use members::{MembershipService, RoleChange};
pub use middleware::{
    extract_session_token, require_admin, require_auth, require_permission, require_role,
    require_tenant_auth, AuthError, RequireAuth, RequireTenantAuth,
};
pub use password::{CredentialHasher, PasswordConfig, PasswordError, PasswordPolicy};
pub use refresh::{RefreshedSession, TokenRefreshManager};
pub use resolver::RoleResolver;
pub use service::{AuthService, IssuedInvitation, LoginOutcome, Registration};
pub use token::{generate_token, hash_token, TokenPair};
pub use validator::{AuthContext, Rejection, SessionValidator};
