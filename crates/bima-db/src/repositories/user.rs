//! User repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use bima_core::{
    ActiveTenant, BimaError, EntityKind, Page, Result, User, UserId, UserRepository, UserRole,
    UserStatus,
};

use crate::recorder::{self, Change};
use crate::{db_err, unique_violation};

use super::parse_enum;

/// PostgreSQL implementation of UserRepository
pub struct PgUserRepository {
    pool: PgPool,
}

const COLUMNS: &str = "id, email, password_hash, display_name, role, tenant_id, status, \
     failed_login_count, locked_until, last_login_at, created_at, updated_at, deleted_at";

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<User> {
        let role: String = row.get("role");
        let status: String = row.get("status");
        Ok(User {
            id: UserId::from_uuid(row.get("id")),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            display_name: row.get("display_name"),
            role: parse_enum(&role, UserRole::parse_str, "users.role")?,
            tenant_id: row
                .get::<Option<uuid::Uuid>, _>("tenant_id")
                .map(bima_core::TenantId::from_uuid),
            status: parse_enum(&status, UserStatus::parse_str, "users.status")?,
            failed_login_count: row.get("failed_login_count"),
            locked_until: row.get("locked_until"),
            last_login_at: row.get("last_login_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    /// Audit home for a user mutation: the user's tenant, or for super
    /// admins a platform audit under their own id slot is meaningless, so
    /// those writes require an explicit tenant in practice (bootstrap
    /// scripts create the first super admin outside the audit trail).
    fn audit_tenant(user: &User) -> Option<bima_core::TenantId> {
        user.tenant_id
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    #[instrument(skip(self, user))]
    async fn create(&self, user: &User, actor: Option<UserId>) -> Result<User> {
        if !user.tenant_binding_is_valid() {
            return Err(BimaError::validation(
                "tenant_id",
                "super admins carry no tenant; tenant users require one",
            ));
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO users
                (id, email, password_hash, display_name, role, tenant_id, status,
                 failed_login_count, locked_until, last_login_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .bind(user.tenant_id.map(|t| *t.as_uuid()))
        .bind(user.status.as_str())
        .bind(user.failed_login_count)
        .bind(user.locked_until)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e).as_deref() {
            Some("users_email_key") => {
                BimaError::validation("email", "email address already registered")
            }
            _ => db_err(e),
        })?;

        if let (Some(tenant_id), Some(actor)) = (Self::audit_tenant(user), actor) {
            recorder::record(
                &mut tx,
                tenant_id,
                Change::created(
                    actor,
                    EntityKind::User,
                    *user.id.as_uuid(),
                    serde_json::to_value(user).unwrap_or_default(),
                ),
            )
            .await?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(user.clone())
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: UserId) -> Result<User> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(BimaError::not_found("user", id)),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM users WHERE lower(email) = lower($1) AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::map_row).transpose()
    }

    #[instrument(skip(self, scope))]
    async fn list_by_tenant(&self, scope: &ActiveTenant, page: Page) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM users
            WHERE tenant_id = $1 AND deleted_at IS NULL
            ORDER BY email
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(scope.id().as_uuid())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::map_row).collect()
    }

    #[instrument(skip(self, scope))]
    async fn list_by_roles(&self, scope: &ActiveTenant, roles: &[UserRole]) -> Result<Vec<User>> {
        let role_names: Vec<String> = roles.iter().map(|r| r.as_str().to_string()).collect();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM users
            WHERE tenant_id = $1 AND role = ANY($2) AND status = 'active' AND deleted_at IS NULL
            ORDER BY email
            "#
        ))
        .bind(scope.id().as_uuid())
        .bind(&role_names)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::map_row).collect()
    }

    #[instrument(skip(self, user))]
    async fn update(&self, user: &User, actor: Option<UserId>) -> Result<User> {
        if !user.tenant_binding_is_valid() {
            return Err(BimaError::validation(
                "tenant_id",
                "super admins carry no tenant; tenant users require one",
            ));
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let before = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        ))
        .bind(user.id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| BimaError::not_found("user", user.id))?;
        let before = Self::map_row(&before)?;

        let updated_at = Utc::now();
        sqlx::query(
            r#"
            UPDATE users
            SET email = $1, password_hash = $2, display_name = $3, role = $4,
                status = $5, updated_at = $6
            WHERE id = $7
            "#,
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(updated_at)
        .bind(user.id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut updated = user.clone();
        updated.updated_at = updated_at;

        if let (Some(tenant_id), Some(actor)) = (Self::audit_tenant(user), actor) {
            recorder::record(
                &mut tx,
                tenant_id,
                Change::updated(
                    actor,
                    EntityKind::User,
                    *user.id.as_uuid(),
                    serde_json::to_value(&before).unwrap_or_default(),
                    serde_json::to_value(&updated).unwrap_or_default(),
                ),
            )
            .await?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn record_login_attempt(
        &self,
        id: UserId,
        failed_count: i32,
        locked_until: Option<DateTime<Utc>>,
        last_login_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET failed_login_count = $1,
                locked_until = $2,
                last_login_at = COALESCE($3, last_login_at),
                updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(failed_count)
        .bind(locked_until)
        .bind(last_login_at)
        .bind(Utc::now())
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
