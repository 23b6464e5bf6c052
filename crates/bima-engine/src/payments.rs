//! Payment service
//!
//! Payments are ledger entries; verification is the gate that lets them
//! count toward activation. The combined path mirrors the counter workflow:
//! an admin or manager records money they are holding, verification is
//! implied, and the policy activates the moment the ledger covers the
//! premium.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument};

use bima_core::authz::{self, Operation};
use bima_core::{
    ActiveTenant, BimaError, Payment, PaymentId, PaymentMethod, PaymentRepository, Policy,
    PolicyId, PolicyRepository, RecordStatus, Result, User,
};
use bima_db::repositories::{PgPaymentRepository, PgPolicyRepository};

use crate::lifecycle::LifecycleEngine;

pub struct PaymentService {
    payments: Arc<PgPaymentRepository>,
    policies: Arc<PgPolicyRepository>,
    engine: Arc<LifecycleEngine>,
}

impl PaymentService {
    pub fn new(
        payments: Arc<PgPaymentRepository>,
        policies: Arc<PgPolicyRepository>,
        engine: Arc<LifecycleEngine>,
    ) -> Self {
        Self {
            payments,
            policies,
            engine,
        }
    }

    /// Record an unverified ledger entry against a policy.
    #[instrument(skip(self, scope, actor))]
    pub async fn record_payment(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        policy_id: PolicyId,
        amount: Decimal,
        method: PaymentMethod,
        reference_number: String,
    ) -> Result<Payment> {
        authz::authorize(actor, Operation::RecordPayment)?;
        if amount <= Decimal::ZERO {
            return Err(BimaError::validation("amount", "payment amount must be positive"));
        }

        let now = Utc::now();
        let payment = Payment {
            id: PaymentId::new(),
            tenant_id: scope.id(),
            policy_id,
            amount,
            method,
            reference_number: reference_number.trim().to_string(),
            received_at: now,
            verified_at: None,
            verified_by: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.payments.save_new(scope, &payment, actor.id).await
    }

    /// Verify a recorded payment (admin/manager).
    #[instrument(skip(self, scope, actor))]
    pub async fn verify_payment(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        payment_id: PaymentId,
    ) -> Result<Payment> {
        authz::authorize(actor, Operation::VerifyPayment)?;
        self.payments.verify(scope, payment_id, actor.id).await
    }

    /// Record and verify in one step, then activate the policy if the
    /// verified ledger now covers the premium. Returns the payment and the
    /// activated policy when activation happened.
    #[instrument(skip(self, scope, actor))]
    pub async fn record_verified_payment(
        &self,
        scope: &ActiveTenant,
        actor: &User,
        policy_id: PolicyId,
        amount: Decimal,
        method: PaymentMethod,
        reference_number: String,
        today: NaiveDate,
    ) -> Result<(Payment, Option<Policy>)> {
        authz::authorize(actor, Operation::VerifyPayment)?;

        let payment = self
            .record_payment(scope, actor, policy_id, amount, method, reference_number)
            .await?;
        let payment = self.payments.verify(scope, payment.id, actor.id).await?;

        let policy = self.policies.get_by_id(scope, policy_id).await?;
        if !matches!(policy.status, RecordStatus::Draft | RecordStatus::PendingPayment) {
            return Ok((payment, None));
        }

        let paid = self.payments.sum_verified(scope, policy_id).await?;
        if !policy.is_fully_paid(paid) {
            return Ok((payment, None));
        }

        match self.engine.activate_policy(scope, actor, policy_id, today).await {
            Ok(activated) => {
                info!(policy = %activated.policy_number, "Policy activated on full payment");
                Ok((payment, Some(activated)))
            }
            // The ledger entry stands even when activation is still blocked
            // (e.g. another active policy on the vehicle)
            Err(BimaError::Overlap) | Err(BimaError::PaymentIncomplete { .. }) => {
                Ok((payment, None))
            }
            Err(other) => Err(other),
        }
    }
}
