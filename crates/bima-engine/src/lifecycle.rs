//! The lifecycle engine
//!
//! Serialized transition path for policies and permits. Every transition
//! runs in one transaction: row lock, guards in order, state flip, audit
//! entry and history snapshot. The partial unique indexes on the active
//! status close the race two parallel activations would otherwise win
//! together; a violation there surfaces as `Overlap` exactly like the
//! pre-check. Guard rejections are themselves audited (outcome=rejected) so
//! conflict and abuse patterns stay visible.

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use bima_core::authz::{self, Denial, Operation};
use bima_core::{
    ensure_activation_window, ensure_expirable, ensure_transition, ActiveTenant, BimaError,
    EntityKind, Permit, PermitCancellationReason, PermitId, PermitRepository, Policy,
    PolicyCancellationReason, PolicyId, PolicyRepository, RecordKind, RecordStatus, Result, User,
};
use bima_db::db_err;
use bima_db::recorder::{self, Change};
use bima_db::repositories::{PgPaymentRepository, PgPermitRepository, PgPolicyRepository};

use crate::notify::NotificationService;

/// Pre-activation edits accepted by [`LifecycleEngine::edit_policy`].
#[derive(Debug, Clone, Default)]
pub struct PolicyPatch {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub premium_amount: Option<Decimal>,
    pub notes: Option<Option<String>>,
}

/// Pre-activation edits accepted by [`LifecycleEngine::edit_permit`].
#[derive(Debug, Clone, Default)]
pub struct PermitPatch {
    pub reference_number: Option<String>,
    pub issuing_authority: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

pub struct LifecycleEngine {
    pool: PgPool,
    policies: std::sync::Arc<PgPolicyRepository>,
    permits: std::sync::Arc<PgPermitRepository>,
    notifier: std::sync::Arc<NotificationService>,
}

impl LifecycleEngine {
    pub fn new(
        pool: PgPool,
        policies: std::sync::Arc<PgPolicyRepository>,
        permits: std::sync::Arc<PgPermitRepository>,
        notifier: std::sync::Arc<NotificationService>,
    ) -> Self {
        Self {
            pool,
            policies,
            permits,
            notifier,
        }
    }

    // =========================================================================
    // Policy transitions
    // =========================================================================

    /// Move a draft policy into `pending_payment`.
    #[instrument(skip(self, scope, actor))]
    pub async fn submit_policy_for_payment(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        id: PolicyId,
    ) -> Result<Policy> {
        self.authorize_transition(scope, actor, Operation::CreateDraftRecord, EntityKind::Policy, *id.as_uuid())
            .await?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let policy = PgPolicyRepository::fetch_for_update(&mut tx, scope, id).await?;
        ensure_transition(RecordKind::Policy, policy.status, RecordStatus::PendingPayment)?;

        let before = serde_json::to_value(&policy).unwrap_or_default();
        let mut updated = policy;
        updated.status = RecordStatus::PendingPayment;
        updated.updated_at = Utc::now();

        PgPolicyRepository::apply_transition(&mut tx, scope, &updated).await?;
        recorder::record(
            &mut tx,
            scope.id(),
            Change::transition(
                Some(actor.id),
                EntityKind::Policy,
                *id.as_uuid(),
                before,
                serde_json::to_value(&updated).unwrap_or_default(),
                None,
            ),
        )
        .await?;
        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    /// Activate a policy. Guards, in order: actor role, full payment,
    /// overlap, date window.
    #[instrument(skip(self, scope, actor))]
    pub async fn activate_policy(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        id: PolicyId,
        today: NaiveDate,
    ) -> Result<Policy> {
        self.authorize_transition(scope, actor, Operation::ActivateRecord, EntityKind::Policy, *id.as_uuid())
            .await?;

        let result = self.activate_policy_inner(scope, actor, id, today).await;
        self.audit_guard_rejection(scope, actor, EntityKind::Policy, *id.as_uuid(), &result)
            .await;
        result
    }

    async fn activate_policy_inner(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        id: PolicyId,
        today: NaiveDate,
    ) -> Result<Policy> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let policy = PgPolicyRepository::fetch_for_update(&mut tx, scope, id).await?;

        ensure_transition(RecordKind::Policy, policy.status, RecordStatus::Active)?;

        let paid = PgPaymentRepository::sum_verified_tx(&mut tx, scope, id).await?;
        if !policy.is_fully_paid(paid) {
            return Err(BimaError::PaymentIncomplete {
                paid: paid.to_string(),
                required: policy.premium_amount.to_string(),
            });
        }

        if PgPolicyRepository::has_conflicting_active(&mut tx, scope, policy.vehicle_id, id).await?
        {
            return Err(BimaError::Overlap);
        }

        ensure_activation_window(policy.end_date, today)?;

        let before = serde_json::to_value(&policy).unwrap_or_default();
        let mut updated = policy;
        updated.status = RecordStatus::Active;
        updated.activated_at = Some(Utc::now());
        updated.updated_at = Utc::now();

        PgPolicyRepository::apply_transition(&mut tx, scope, &updated).await?;
        recorder::record(
            &mut tx,
            scope.id(),
            Change::transition(
                Some(actor.id),
                EntityKind::Policy,
                *id.as_uuid(),
                before,
                serde_json::to_value(&updated).unwrap_or_default(),
                None,
            ),
        )
        .await?;
        tx.commit().await.map_err(db_err)?;

        info!(policy = %updated.policy_number, vehicle = %updated.vehicle_id, "Policy activated");
        Ok(updated)
    }

    /// Cancel a policy from draft, pending_payment or active. Terminal:
    /// the record is frozen afterwards.
    #[instrument(skip(self, scope, actor, note))]
    pub async fn cancel_policy(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        id: PolicyId,
        reason: PolicyCancellationReason,
        note: Option<String>,
    ) -> Result<Policy> {
        self.authorize_transition(scope, actor, Operation::CancelRecord, EntityKind::Policy, *id.as_uuid())
            .await?;

        let result = self.cancel_policy_inner(scope, actor, id, reason, note).await;
        self.audit_guard_rejection(scope, actor, EntityKind::Policy, *id.as_uuid(), &result)
            .await;

        if let Ok(policy) = &result {
            // Buffered only; delivery adapters are external
            self.notifier
                .notify_cancellation(
                    scope,
                    EntityKind::Policy,
                    *id.as_uuid(),
                    &format!("Policy {} cancelled ({})", policy.policy_number, reason.as_str()),
                )
                .await;
        }
        result
    }

    async fn cancel_policy_inner(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        id: PolicyId,
        reason: PolicyCancellationReason,
        note: Option<String>,
    ) -> Result<Policy> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let policy = PgPolicyRepository::fetch_for_update(&mut tx, scope, id).await?;

        ensure_transition(RecordKind::Policy, policy.status, RecordStatus::Cancelled)?;

        let before = serde_json::to_value(&policy).unwrap_or_default();
        let mut updated = policy;
        updated.status = RecordStatus::Cancelled;
        updated.cancelled_at = Some(Utc::now());
        updated.cancelled_by = Some(actor.id);
        updated.cancellation_reason = Some(reason);
        updated.cancellation_note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        updated.updated_at = Utc::now();

        PgPolicyRepository::apply_transition(&mut tx, scope, &updated).await?;
        recorder::record(
            &mut tx,
            scope.id(),
            Change::transition(
                Some(actor.id),
                EntityKind::Policy,
                *id.as_uuid(),
                before,
                serde_json::to_value(&updated).unwrap_or_default(),
                Some(reason.as_str().to_string()),
            ),
        )
        .await?;
        tx.commit().await.map_err(db_err)?;

        info!(policy = %updated.policy_number, reason = reason.as_str(), "Policy cancelled");
        Ok(updated)
    }

    /// Expire an active policy whose end date has passed. Reconciler path:
    /// no actor, system-attributed audit entry.
    #[instrument(skip(self, scope))]
    pub async fn expire_policy(
        &self,
        scope: &ActiveTenant,
        id: PolicyId,
        today: NaiveDate,
    ) -> Result<Policy> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let policy = PgPolicyRepository::fetch_for_update(&mut tx, scope, id).await?;

        ensure_expirable(policy.status, policy.end_date, today)?;

        let before = serde_json::to_value(&policy).unwrap_or_default();
        let mut updated = policy;
        updated.status = RecordStatus::Expired;
        updated.updated_at = Utc::now();

        PgPolicyRepository::apply_transition(&mut tx, scope, &updated).await?;
        recorder::record(
            &mut tx,
            scope.id(),
            Change::transition(
                None,
                EntityKind::Policy,
                *id.as_uuid(),
                before,
                serde_json::to_value(&updated).unwrap_or_default(),
                Some("end date passed".to_string()),
            ),
        )
        .await?;
        tx.commit().await.map_err(db_err)?;

        info!(policy = %updated.policy_number, "Policy expired");
        Ok(updated)
    }

    /// Edit a policy while it is still mutable.
    #[instrument(skip(self, scope, actor, patch))]
    pub async fn edit_policy(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        id: PolicyId,
        patch: PolicyPatch,
    ) -> Result<Policy> {
        authz::authorize(actor, Operation::CreateDraftRecord)?;

        let existing = self.policies.get_by_id(scope, id).await?;
        if existing.is_immutable() {
            return Err(BimaError::Immutable);
        }

        let mut updated = existing;
        if let Some(start_date) = patch.start_date {
            updated.start_date = start_date;
        }
        if let Some(end_date) = patch.end_date {
            updated.end_date = end_date;
        }
        if let Some(premium) = patch.premium_amount {
            updated.premium_amount = premium;
        }
        if let Some(notes) = patch.notes {
            updated.notes = notes;
        }

        if updated.end_date <= updated.start_date {
            return Err(BimaError::validation("end_date", "end date must be after start date"));
        }
        if updated.premium_amount <= Decimal::ZERO {
            return Err(BimaError::validation("premium_amount", "premium must be positive"));
        }

        self.policies.update(scope, &updated, actor.id).await
    }

    /// Renew a policy: a successor covering the follow-on period, starting
    /// the day after the predecessor ends. The predecessor is left to expire
    /// naturally; the successor activates through the normal payment path,
    /// so the two are never active together.
    #[instrument(skip(self, scope, actor))]
    pub async fn renew_policy(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        predecessor_id: PolicyId,
        new_end_date: NaiveDate,
        new_premium: Decimal,
    ) -> Result<Policy> {
        authz::authorize(actor, Operation::CreateDraftRecord)?;

        let predecessor = self.policies.get_by_id(scope, predecessor_id).await?;
        let start_date = predecessor.end_date + Duration::days(1);
        if new_end_date <= start_date {
            return Err(BimaError::validation(
                "end_date",
                "renewal must end after the successor's start date",
            ));
        }
        if new_premium <= Decimal::ZERO {
            return Err(BimaError::validation("premium_amount", "premium must be positive"));
        }

        let now = Utc::now();
        let successor = Policy {
            id: PolicyId::new(),
            tenant_id: scope.id(),
            vehicle_id: predecessor.vehicle_id,
            policy_number: String::new(),
            start_date,
            end_date: new_end_date,
            premium_amount: new_premium,
            status: RecordStatus::PendingPayment,
            activated_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            cancellation_note: None,
            notes: Some(format!("Renewal of {}", predecessor.policy_number)),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        self.policies.save_new(scope, &successor, actor.id).await
    }

    // =========================================================================
    // Permit transitions
    // =========================================================================

    /// Activate a permit straight from draft. Guards: actor role, overlap
    /// per (vehicle, permit type), date window.
    #[instrument(skip(self, scope, actor))]
    pub async fn activate_permit(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        id: PermitId,
        today: NaiveDate,
    ) -> Result<Permit> {
        self.authorize_transition(scope, actor, Operation::ActivateRecord, EntityKind::Permit, *id.as_uuid())
            .await?;

        let result = self.activate_permit_inner(scope, actor, id, today).await;
        self.audit_guard_rejection(scope, actor, EntityKind::Permit, *id.as_uuid(), &result)
            .await;
        result
    }

    async fn activate_permit_inner(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        id: PermitId,
        today: NaiveDate,
    ) -> Result<Permit> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let permit = PgPermitRepository::fetch_for_update(&mut tx, scope, id).await?;

        ensure_transition(RecordKind::Permit, permit.status, RecordStatus::Active)?;

        if PgPermitRepository::has_conflicting_active(
            &mut tx,
            scope,
            permit.vehicle_id,
            &permit.permit_type,
            id,
        )
        .await?
        {
            return Err(BimaError::Overlap);
        }

        ensure_activation_window(permit.end_date, today)?;

        let before = serde_json::to_value(&permit).unwrap_or_default();
        let mut updated = permit;
        updated.status = RecordStatus::Active;
        updated.activated_at = Some(Utc::now());
        updated.updated_at = Utc::now();

        PgPermitRepository::apply_transition(&mut tx, scope, &updated).await?;
        recorder::record(
            &mut tx,
            scope.id(),
            Change::transition(
                Some(actor.id),
                EntityKind::Permit,
                *id.as_uuid(),
                before,
                serde_json::to_value(&updated).unwrap_or_default(),
                None,
            ),
        )
        .await?;
        tx.commit().await.map_err(db_err)?;

        info!(permit = %updated.reference_number, permit_type = %updated.permit_type, "Permit activated");
        Ok(updated)
    }

    #[instrument(skip(self, scope, actor, note))]
    pub async fn cancel_permit(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        id: PermitId,
        reason: PermitCancellationReason,
        note: Option<String>,
    ) -> Result<Permit> {
        self.authorize_transition(scope, actor, Operation::CancelRecord, EntityKind::Permit, *id.as_uuid())
            .await?;

        let result = self.cancel_permit_inner(scope, actor, id, reason, note).await;
        self.audit_guard_rejection(scope, actor, EntityKind::Permit, *id.as_uuid(), &result)
            .await;

        if let Ok(permit) = &result {
            self.notifier
                .notify_cancellation(
                    scope,
                    EntityKind::Permit,
                    *id.as_uuid(),
                    &format!(
                        "{} {} cancelled ({})",
                        permit.permit_type,
                        permit.reference_number,
                        reason.as_str()
                    ),
                )
                .await;
        }
        result
    }

    async fn cancel_permit_inner(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        id: PermitId,
        reason: PermitCancellationReason,
        note: Option<String>,
    ) -> Result<Permit> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let permit = PgPermitRepository::fetch_for_update(&mut tx, scope, id).await?;

        ensure_transition(RecordKind::Permit, permit.status, RecordStatus::Cancelled)?;

        let before = serde_json::to_value(&permit).unwrap_or_default();
        let mut updated = permit;
        updated.status = RecordStatus::Cancelled;
        updated.cancelled_at = Some(Utc::now());
        updated.cancelled_by = Some(actor.id);
        updated.cancellation_reason = Some(reason);
        updated.cancellation_note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        updated.updated_at = Utc::now();

        PgPermitRepository::apply_transition(&mut tx, scope, &updated).await?;
        recorder::record(
            &mut tx,
            scope.id(),
            Change::transition(
                Some(actor.id),
                EntityKind::Permit,
                *id.as_uuid(),
                before,
                serde_json::to_value(&updated).unwrap_or_default(),
                Some(reason.as_str().to_string()),
            ),
        )
        .await?;
        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    /// Edit a permit while it is still mutable.
    #[instrument(skip(self, scope, actor, patch))]
    pub async fn edit_permit(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        id: PermitId,
        patch: PermitPatch,
    ) -> Result<Permit> {
        authz::authorize(actor, Operation::CreateDraftRecord)?;

        let existing = self.permits.get_by_id(scope, id).await?;
        if existing.is_immutable() {
            return Err(BimaError::Immutable);
        }

        let mut updated = existing;
        if let Some(reference_number) = patch.reference_number {
            updated.reference_number = reference_number.trim().to_string();
        }
        if let Some(issuing_authority) = patch.issuing_authority {
            updated.issuing_authority = issuing_authority.trim().to_string();
        }
        if let Some(start_date) = patch.start_date {
            updated.start_date = start_date;
        }
        if let Some(end_date) = patch.end_date {
            updated.end_date = end_date;
        }

        if updated.end_date <= updated.start_date {
            return Err(BimaError::validation("end_date", "end date must be after start date"));
        }

        self.permits.update(scope, &updated, actor.id).await
    }

    #[instrument(skip(self, scope))]
    pub async fn expire_permit(
        &self,
        scope: &ActiveTenant,
        id: PermitId,
        today: NaiveDate,
    ) -> Result<Permit> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let permit = PgPermitRepository::fetch_for_update(&mut tx, scope, id).await?;

        ensure_expirable(permit.status, permit.end_date, today)?;

        let before = serde_json::to_value(&permit).unwrap_or_default();
        let mut updated = permit;
        updated.status = RecordStatus::Expired;
        updated.updated_at = Utc::now();

        PgPermitRepository::apply_transition(&mut tx, scope, &updated).await?;
        recorder::record(
            &mut tx,
            scope.id(),
            Change::transition(
                None,
                EntityKind::Permit,
                *id.as_uuid(),
                before,
                serde_json::to_value(&updated).unwrap_or_default(),
                Some("end date passed".to_string()),
            ),
        )
        .await?;
        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    // =========================================================================
    // Shared plumbing
    // =========================================================================

    /// Role gate for a transition; super-admin attempts against business
    /// records are logged as security events before being refused.
    async fn authorize_transition(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        operation: Operation,
        entity_kind: EntityKind,
        entity_id: uuid::Uuid,
    ) -> Result<()> {
        match authz::check(actor, operation) {
            Ok(()) => Ok(()),
            Err(denial) => {
                let reason = match denial {
                    Denial::SuperAdminBusinessWrite => {
                        warn!(
                            actor = %actor.email,
                            operation = operation.as_str(),
                            "Security event: super admin attempted business-data write"
                        );
                        format!(
                            "super admin {} attempted {} on business data",
                            actor.email,
                            operation.as_str()
                        )
                    }
                    Denial::Forbidden => format!(
                        "{} ({}) lacks permission for {}",
                        actor.email,
                        actor.role.as_str(),
                        operation.as_str()
                    ),
                };
                if let Err(e) = recorder::record_rejection(
                    &self.pool,
                    scope.id(),
                    Change::rejected_transition(Some(actor.id), entity_kind, entity_id, None, reason),
                )
                .await
                {
                    warn!(error = %e, "Failed to audit rejected transition");
                }
                Err(BimaError::forbidden(operation.as_str()))
            }
        }
    }

    /// Record overlap/payment/transition guard rejections; infrastructure
    /// errors are not audit-worthy.
    async fn audit_guard_rejection<T>(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        entity_kind: EntityKind,
        entity_id: uuid::Uuid,
        result: &Result<T>,
    ) {
        let Err(err) = result else { return };
        if !matches!(
            err,
            BimaError::Overlap
                | BimaError::PaymentIncomplete { .. }
                | BimaError::InvalidTransition { .. }
                | BimaError::Validation { .. }
        ) {
            return;
        }
        if let Err(e) = recorder::record_rejection(
            &self.pool,
            scope.id(),
            Change::rejected_transition(
                Some(actor.id),
                entity_kind,
                entity_id,
                None,
                err.to_string(),
            ),
        )
        .await
        {
            warn!(error = %e, "Failed to audit rejected transition");
        }
    }
}
