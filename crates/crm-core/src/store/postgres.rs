//! PostgreSQL store
//!
//! Uniqueness (emails, slugs, one active role per tenant) is enforced by
//! the indexes in `migrations/`; violations come back as `Conflict`.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use super::{
    AuthStore, InvitationStore, Invitee, Member, MembershipStore, RedeemOutcome, Redemption,
    RotateOutcome, SessionRotation, SessionStore, TenantStore, UserStore,
};
use crate::config::DatabaseConfig;
use crate::error::{ConflictKind, CrmError, EntityKind};
use crate::models::{
    Credential, InvitationToken, NewInvitation, NewSession, NewUser, Session, Tenant,
    TenantStatus, User, UserTenantRole, PASSWORD_ALGORITHM,
};
use crate::role::Role;
use crate::Result;

const USER_COLUMNS: &str =
    "id, email, name, email_verified, active, created_at, updated_at, last_login";
const ROLE_COLUMNS: &str = "id, user_id, tenant_id, role, active, joined_at, deactivated_at";
const SESSION_COLUMNS: &str = "id, user_id, tenant_id, token_hash, refresh_token_hash, \
                               expires_at, refresh_expires_at, created_at";
const INVITATION_COLUMNS: &str = "id, email, tenant_id, role, token_hash, invited_by, \
                                  expires_at, consumed_at, created_at";

/// PostgreSQL-backed implementation of every store trait
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect using the configured pool settings
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres_pool_size)
            .acquire_timeout(StdDuration::from_secs(config.acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| CrmError::internal(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CrmError::internal(format!("Migration failed: {e}")))
    }
}

/// Map a unique violation to the given conflict, anything else to Internal
fn conflict_or(err: sqlx::Error, kind: ConflictKind) -> CrmError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return CrmError::Conflict(kind);
        }
    }
    err.into()
}

fn parse_role(value: &str) -> Result<Role> {
    value
        .parse()
        .map_err(|_| CrmError::internal(format!("unknown role '{value}' in store")))
}

/// Insert a user row and its credential on an open transaction
async fn insert_user(
    conn: &mut PgConnection,
    user: NewUser,
    password_hash: String,
) -> Result<User> {
    let user = user.into_user();

    let row: UserRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO users (id, email, name, email_verified, active, created_at, updated_at)
        VALUES ($1, $2, $3, $4, TRUE, $5, $5)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(user.id)
    .bind(&user.email)
    .bind(&user.name)
    .bind(user.email_verified)
    .bind(user.created_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| conflict_or(e, ConflictKind::EmailTaken))?;

    sqlx::query(
        r#"
        INSERT INTO credentials (user_id, algorithm, password_hash, updated_at)
        VALUES ($1, $2, $3, NOW())
        "#,
    )
    .bind(user.id)
    .bind(PASSWORD_ALGORITHM)
    .bind(password_hash)
    .execute(&mut *conn)
    .await?;

    Ok(row.into())
}

async fn insert_role(
    conn: &mut PgConnection,
    user_id: Uuid,
    tenant_id: Option<Uuid>,
    role: Role,
) -> Result<UserTenantRole> {
    let row: RoleRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO user_tenant_roles (id, user_id, tenant_id, role, active, joined_at)
        VALUES ($1, $2, $3, $4, TRUE, NOW())
        RETURNING {ROLE_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(tenant_id)
    .bind(role.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| conflict_or(e, ConflictKind::ActiveRoleExists))?;

    row.try_into()
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: String,
    email_verified: bool,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login: Option<DateTime<Utc>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            name: row.name,
            email_verified: row.email_verified,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login: row.last_login,
        }
    }
}

#[derive(Debug, FromRow)]
struct CredentialRow {
    user_id: Uuid,
    algorithm: String,
    password_hash: String,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct TenantRow {
    id: Uuid,
    slug: String,
    name: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Self {
            id: row.id,
            slug: row.slug,
            name: row.name,
            status: TenantStatus::from_db(&row.status),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RoleRow {
    id: Uuid,
    user_id: Uuid,
    tenant_id: Option<Uuid>,
    role: String,
    active: bool,
    joined_at: DateTime<Utc>,
    deactivated_at: Option<DateTime<Utc>>,
}

impl TryFrom<RoleRow> for UserTenantRole {
    type Error = CrmError;

    fn try_from(row: RoleRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            tenant_id: row.tenant_id,
            role: parse_role(&row.role)?,
            active: row.active,
            joined_at: row.joined_at,
            deactivated_at: row.deactivated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    tenant_id: Uuid,
    token_hash: String,
    refresh_token_hash: String,
    expires_at: DateTime<Utc>,
    refresh_expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            tenant_id: row.tenant_id,
            token_hash: row.token_hash,
            refresh_token_hash: row.refresh_token_hash,
            expires_at: row.expires_at,
            refresh_expires_at: row.refresh_expires_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct InvitationRow {
    id: Uuid,
    email: String,
    tenant_id: Uuid,
    role: String,
    token_hash: String,
    invited_by: Uuid,
    expires_at: DateTime<Utc>,
    consumed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<InvitationRow> for InvitationToken {
    type Error = CrmError;

    fn try_from(row: InvitationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            email: row.email,
            tenant_id: row.tenant_id,
            role: parse_role(&row.role)?,
            token_hash: row.token_hash,
            invited_by: row.invited_by,
            expires_at: row.expires_at,
            consumed_at: row.consumed_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MemberRow {
    #[sqlx(flatten)]
    user: UserRow,
    membership_id: Uuid,
    role: String,
    joined_at: DateTime<Utc>,
    tenant_id: Uuid,
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: NewUser, password_hash: String) -> Result<User> {
        let mut tx = self.pool.begin().await?;
        let user = insert_user(&mut *tx, user, password_hash).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(User::from))
    }

    async fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>> {
        let row: Option<CredentialRow> = sqlx::query_as(
            "SELECT user_id, algorithm, password_hash, updated_at FROM credentials WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Credential {
            user_id: row.user_id,
            algorithm: row.algorithm,
            password_hash: row.password_hash,
            updated_at: row.updated_at,
        }))
    }

    async fn replace_credential(&self, user_id: Uuid, password_hash: String) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO credentials (user_id, algorithm, password_hash, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET algorithm = EXCLUDED.algorithm,
                          password_hash = EXCLUDED.password_hash,
                          updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(PASSWORD_ALGORITHM)
        .bind(password_hash)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(CrmError::NotFound(EntityKind::User))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_user_active(&self, user_id: Uuid, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE users SET active = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(active)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CrmError::NotFound(EntityKind::User));
        }
        Ok(())
    }

    async fn record_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TenantStore for PgStore {
    async fn create_tenant(&self, tenant: Tenant) -> Result<Tenant> {
        let row: TenantRow = sqlx::query_as(
            r#"
            INSERT INTO tenants (id, slug, name, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, slug, name, status, created_at
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.slug)
        .bind(&tenant.name)
        .bind(tenant.status.as_str())
        .bind(tenant.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_or(e, ConflictKind::SlugTaken))?;

        Ok(row.into())
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as(
            "SELECT id, slug, name, status, created_at FROM tenants WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Tenant::from))
    }

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        let row: Option<TenantRow> =
            sqlx::query_as("SELECT id, slug, name, status, created_at FROM tenants WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Tenant::from))
    }

    async fn set_tenant_status(&self, id: Uuid, status: TenantStatus) -> Result<()> {
        let result = sqlx::query("UPDATE tenants SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CrmError::NotFound(EntityKind::Tenant));
        }
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let rows: Vec<TenantRow> =
            sqlx::query_as("SELECT id, slug, name, status, created_at FROM tenants ORDER BY slug")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(Tenant::from).collect())
    }
}

#[async_trait]
impl MembershipStore for PgStore {
    async fn grant_role(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        role: Role,
    ) -> Result<UserTenantRole> {
        let mut conn = self.pool.acquire().await?;
        insert_role(&mut *conn, user_id, tenant_id, role).await
    }

    async fn find_active_role(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<UserTenantRole>> {
        let row: Option<RoleRow> = sqlx::query_as(&format!(
            "SELECT {ROLE_COLUMNS} FROM user_tenant_roles \
             WHERE user_id = $1 AND tenant_id = $2 AND active"
        ))
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserTenantRole::try_from).transpose()
    }

    async fn find_platform_role(&self, user_id: Uuid) -> Result<Option<UserTenantRole>> {
        let row: Option<RoleRow> = sqlx::query_as(&format!(
            "SELECT {ROLE_COLUMNS} FROM user_tenant_roles \
             WHERE user_id = $1 AND tenant_id IS NULL AND active"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserTenantRole::try_from).transpose()
    }

    async fn deactivate_role(&self, user_id: Uuid, tenant_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_tenant_roles SET active = FALSE, deactivated_at = NOW()
            WHERE user_id = $1 AND tenant_id = $2 AND active
            "#,
        )
        .bind(user_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn change_role(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        role: Role,
    ) -> Result<UserTenantRole> {
        let mut tx = self.pool.begin().await?;

        let deactivated = sqlx::query(
            r#"
            UPDATE user_tenant_roles SET active = FALSE, deactivated_at = NOW()
            WHERE user_id = $1 AND tenant_id = $2 AND active
            "#,
        )
        .bind(user_id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;

        if deactivated.rows_affected() == 0 {
            return Err(CrmError::NotFound(EntityKind::Membership));
        }

        let row: RoleRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO user_tenant_roles (id, user_id, tenant_id, role, active, joined_at)
            VALUES ($1, $2, $3, $4, TRUE, NOW())
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(tenant_id)
        .bind(role.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, ConflictKind::ActiveRoleExists))?;

        tx.commit().await?;
        row.try_into()
    }

    async fn list_memberships_for_user(&self, user_id: Uuid) -> Result<Vec<UserTenantRole>> {
        let rows: Vec<RoleRow> = sqlx::query_as(&format!(
            "SELECT {ROLE_COLUMNS} FROM user_tenant_roles \
             WHERE user_id = $1 AND active ORDER BY joined_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserTenantRole::try_from).collect()
    }

    async fn list_members(&self, tenant_id: Uuid) -> Result<Vec<Member>> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            r#"
            SELECT u.id, u.email, u.name, u.email_verified, u.active, u.created_at,
                   u.updated_at, u.last_login,
                   r.id AS membership_id, r.role, r.joined_at, r.tenant_id
            FROM user_tenant_roles r
            JOIN users u ON u.id = r.user_id
            WHERE r.tenant_id = $1 AND r.active
            ORDER BY u.email
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let membership = UserTenantRole {
                    id: row.membership_id,
                    user_id: row.user.id,
                    tenant_id: Some(row.tenant_id),
                    role: parse_role(&row.role)?,
                    active: true,
                    joined_at: row.joined_at,
                    deactivated_at: None,
                };
                Ok(Member {
                    user: row.user.into(),
                    membership,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(&self, session: NewSession) -> Result<Session> {
        let session = session.into_session();
        let row: SessionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO sessions ({SESSION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.tenant_id)
        .bind(&session.token_hash)
        .bind(&session.refresh_token_hash)
        .bind(session.expires_at)
        .bind(session.refresh_expires_at)
        .bind(session.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_session_by_token(&self, token_hash: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Session::from))
    }

    async fn delete_session_by_token(&self, token_hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn rotate_session(&self, rotation: SessionRotation) -> Result<RotateOutcome> {
        let mut tx = self.pool.begin().await?;

        // The row lock taken by UPDATE serializes concurrent rotations; the loser
        // re-evaluates the WHERE clause against the new hash and matches nothing.
        let rotated: Option<SessionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE sessions
            SET token_hash = $2, refresh_token_hash = $3, expires_at = $4, refresh_expires_at = $5
            WHERE refresh_token_hash = $1 AND refresh_expires_at > $6
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(&rotation.presented_refresh_hash)
        .bind(&rotation.new_token_hash)
        .bind(&rotation.new_refresh_hash)
        .bind(rotation.expires_at)
        .bind(rotation.refresh_expires_at)
        .bind(rotation.now)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = rotated {
            sqlx::query(
                r#"
                INSERT INTO consumed_refresh_tokens (token_hash, session_id, consumed_at, expires_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (token_hash) DO NOTHING
                "#,
            )
            .bind(&rotation.presented_refresh_hash)
            .bind(row.id)
            .bind(rotation.now)
            .bind(rotation.refresh_expires_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            return Ok(RotateOutcome::Rotated(row.into()));
        }
        tx.commit().await?;

        let reused: Option<(Uuid,)> =
            sqlx::query_as("SELECT session_id FROM consumed_refresh_tokens WHERE token_hash = $1")
                .bind(&rotation.presented_refresh_hash)
                .fetch_optional(&self.pool)
                .await?;
        if let Some((session_id,)) = reused {
            return Ok(RotateOutcome::Reused { session_id });
        }

        let expired: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM sessions WHERE refresh_token_hash = $1")
                .bind(&rotation.presented_refresh_hash)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match expired {
            Some((session_id,)) => RotateOutcome::Expired { session_id },
            None => RotateOutcome::Unknown,
        })
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user_sessions(&self, user_id: Uuid, keep: Option<Uuid>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE user_id = $1 AND ($2::uuid IS NULL OR id <> $2)",
        )
        .bind(user_id)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE refresh_expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        sqlx::query("DELETE FROM consumed_refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl InvitationStore for PgStore {
    async fn create_invitation(&self, invitation: NewInvitation) -> Result<InvitationToken> {
        let invitation = invitation.into_invitation();
        let row: InvitationRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO invitations ({INVITATION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8)
            RETURNING {INVITATION_COLUMNS}
            "#
        ))
        .bind(invitation.id)
        .bind(&invitation.email)
        .bind(invitation.tenant_id)
        .bind(invitation.role.as_str())
        .bind(&invitation.token_hash)
        .bind(invitation.invited_by)
        .bind(invitation.expires_at)
        .bind(invitation.created_at)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_invitation(&self, token_hash: &str) -> Result<Option<InvitationToken>> {
        let row: Option<InvitationRow> = sqlx::query_as(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(InvitationToken::try_from).transpose()
    }

    async fn redeem_invitation(
        &self,
        token_hash: &str,
        invitee: Invitee,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent redemptions of the same token
        let row: Option<InvitationRow> = sqlx::query_as(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE token_hash = $1 FOR UPDATE"
        ))
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let invitation = match row.map(InvitationToken::try_from).transpose()? {
            None => return Ok(RedeemOutcome::Unknown),
            Some(invitation) if invitation.is_consumed() => {
                return Ok(RedeemOutcome::AlreadyConsumed)
            }
            Some(invitation) if invitation.is_expired(now) => {
                return Ok(RedeemOutcome::Expired {
                    invitation_id: invitation.id,
                })
            }
            Some(invitation) => invitation,
        };

        let user = match invitee {
            Invitee::Existing(user_id) => {
                let row: Option<UserRow> = sqlx::query_as(&format!(
                    r#"
                    UPDATE users SET active = TRUE,
                        updated_at = CASE WHEN active THEN updated_at ELSE NOW() END
                    WHERE id = $1
                    RETURNING {USER_COLUMNS}
                    "#
                ))
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
                row.map(User::from)
                    .ok_or(CrmError::NotFound(EntityKind::User))?
            }
            Invitee::New {
                user,
                password_hash,
            } => insert_user(&mut *tx, user, password_hash).await?,
        };

        let grant = insert_role(
            &mut *tx,
            user.id,
            Some(invitation.tenant_id),
            invitation.role,
        )
        .await?;

        let consumed: InvitationRow = sqlx::query_as(&format!(
            "UPDATE invitations SET consumed_at = $2 WHERE id = $1 RETURNING {INVITATION_COLUMNS}"
        ))
        .bind(invitation.id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RedeemOutcome::Redeemed(Redemption {
            invitation: consumed.try_into()?,
            user,
            grant,
        }))
    }
}

#[async_trait]
impl AuthStore for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
