//! Audit & history recorder
//!
//! Every mutation commits together with its AuditEntry and HistoryRecord:
//! repositories and the lifecycle engine pass their open transaction here
//! before committing. There is no other write path into either table, and
//! the schema adds append-only triggers on top.

use bima_core::{
    AuditAction, AuditEntryId, AuditOutcome, EntityKind, HistoryRecordId, Result, TenantId, UserId,
};
use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::db_err;

/// One mutation (or rejected attempt) to be recorded.
#[derive(Debug, Clone)]
pub struct Change {
    pub actor: Option<UserId>,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub reason: Option<String>,
}

impl Change {
    pub fn created(
        actor: UserId,
        entity_kind: EntityKind,
        entity_id: Uuid,
        after: serde_json::Value,
    ) -> Self {
        Self {
            actor: Some(actor),
            entity_kind,
            entity_id,
            action: AuditAction::Create,
            outcome: AuditOutcome::Applied,
            before: None,
            after: Some(after),
            reason: None,
        }
    }

    pub fn updated(
        actor: UserId,
        entity_kind: EntityKind,
        entity_id: Uuid,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> Self {
        Self {
            actor: Some(actor),
            entity_kind,
            entity_id,
            action: AuditAction::Update,
            outcome: AuditOutcome::Applied,
            before: Some(before),
            after: Some(after),
            reason: None,
        }
    }

    pub fn soft_deleted(
        actor: UserId,
        entity_kind: EntityKind,
        entity_id: Uuid,
        before: serde_json::Value,
    ) -> Self {
        Self {
            actor: Some(actor),
            entity_kind,
            entity_id,
            action: AuditAction::SoftDelete,
            outcome: AuditOutcome::Applied,
            before: Some(before),
            after: None,
            reason: None,
        }
    }

    pub fn transition(
        actor: Option<UserId>,
        entity_kind: EntityKind,
        entity_id: Uuid,
        before: serde_json::Value,
        after: serde_json::Value,
        reason: Option<String>,
    ) -> Self {
        Self {
            actor,
            entity_kind,
            entity_id,
            action: AuditAction::Transition,
            outcome: AuditOutcome::Applied,
            before: Some(before),
            after: Some(after),
            reason,
        }
    }

    pub fn rejected_transition(
        actor: Option<UserId>,
        entity_kind: EntityKind,
        entity_id: Uuid,
        before: Option<serde_json::Value>,
        reason: String,
    ) -> Self {
        Self {
            actor,
            entity_kind,
            entity_id,
            action: AuditAction::Transition,
            outcome: AuditOutcome::Rejected,
            before,
            after: None,
            reason: Some(reason),
        }
    }
}

/// Write the audit entry on the caller's transaction, plus the history
/// snapshot for applied changes that leave a row behind.
pub async fn record(conn: &mut PgConnection, tenant_id: TenantId, change: Change) -> Result<()> {
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO audit_entries
            (id, tenant_id, actor_user_id, at_ts, entity_kind, entity_id,
             action, outcome, before, after, reason)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(AuditEntryId::new().as_uuid())
    .bind(tenant_id.as_uuid())
    .bind(change.actor.map(|a| *a.as_uuid()))
    .bind(now)
    .bind(change.entity_kind.as_str())
    .bind(change.entity_id)
    .bind(change.action.as_str())
    .bind(change.outcome.as_str())
    .bind(&change.before)
    .bind(&change.after)
    .bind(&change.reason)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    if change.outcome == AuditOutcome::Applied {
        if let Some(snapshot) = &change.after {
            sqlx::query(
                r#"
                INSERT INTO history_records
                    (id, tenant_id, entity_kind, entity_id, recorded_at, snapshot)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(HistoryRecordId::new().as_uuid())
            .bind(tenant_id.as_uuid())
            .bind(change.entity_kind.as_str())
            .bind(change.entity_id)
            .bind(now)
            .bind(snapshot)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        }
    }

    Ok(())
}

/// Record a rejected guard outcome in its own short transaction; used when
/// the data transaction has already rolled back (or never started).
pub async fn record_rejection(pool: &PgPool, tenant_id: TenantId, change: Change) -> Result<()> {
    let mut tx = pool.begin().await.map_err(db_err)?;
    record(&mut *tx, tenant_id, change).await?;
    tx.commit().await.map_err(db_err)?;
    Ok(())
}
