//! Compliance service
//!
//! Gathers a vehicle's records through the repositories and hands them to
//! the pure evaluation in `bima_core::compliance`. Because the evaluation
//! works on lifecycle windows rather than current statuses, asking for a
//! past date yields the status as it stood then.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::instrument;

use bima_core::compliance::{self, ComplianceReport, ComplianceSummary, CoverKind, CoverRecord};
use bima_core::{
    ActiveTenant, Permit, PermitRepository, Policy, PolicyRepository, ReportRepository, Result,
    VehicleId, VehicleRepository,
};
use bima_db::repositories::{
    PgPermitRepository, PgPolicyRepository, PgReportRepository, PgVehicleRepository,
};

pub struct ComplianceService {
    vehicles: Arc<PgVehicleRepository>,
    policies: Arc<PgPolicyRepository>,
    permits: Arc<PgPermitRepository>,
    reports: Arc<PgReportRepository>,
}

/// Everything a dashboard needs about one vehicle's compliance position.
#[derive(Debug, Clone)]
pub struct VehicleComplianceSnapshot {
    pub vehicle_id: VehicleId,
    pub report: ComplianceReport,
    pub active_policy: Option<Policy>,
    pub active_permits: Vec<Permit>,
}

impl ComplianceService {
    pub fn new(
        vehicles: Arc<PgVehicleRepository>,
        policies: Arc<PgPolicyRepository>,
        permits: Arc<PgPermitRepository>,
        reports: Arc<PgReportRepository>,
    ) -> Self {
        Self {
            vehicles,
            policies,
            permits,
            reports,
        }
    }

    /// Compliance status of one vehicle at `as_of`. The risk window
    /// defaults to the tenant's configured reminder days.
    #[instrument(skip(self, scope))]
    pub async fn vehicle_status(
        &self,
        scope: &ActiveTenant,
        vehicle_id: VehicleId,
        as_of: NaiveDate,
        risk_window_days: Option<i64>,
    ) -> Result<VehicleComplianceSnapshot> {
        // Existence check doubles as the tenant boundary
        self.vehicles.get_by_id(scope, vehicle_id).await?;

        let policies = self.policies.list_for_vehicle(scope, vehicle_id).await?;
        let permits = self.permits.list_for_vehicle(scope, vehicle_id).await?;

        let mut records: Vec<CoverRecord> = Vec::with_capacity(policies.len() + permits.len());
        for policy in &policies {
            records.push(CoverRecord {
                entity_id: *policy.id.as_uuid(),
                label: policy.policy_number.clone(),
                kind: CoverKind::Insurance,
                status: policy.status,
                start_date: policy.start_date,
                end_date: policy.end_date,
                activated_at: policy.activated_at,
                cancelled_at: policy.cancelled_at,
            });
        }
        for permit in &permits {
            records.push(CoverRecord {
                entity_id: *permit.id.as_uuid(),
                label: format!("{} {}", permit.permit_type, permit.reference_number),
                kind: CoverKind::Permit {
                    permit_type: permit.permit_type.clone(),
                },
                status: permit.status,
                start_date: permit.start_date,
                end_date: permit.end_date,
                activated_at: permit.activated_at,
                cancelled_at: permit.cancelled_at,
            });
        }

        let settings = scope.settings();
        let risk_window = risk_window_days.unwrap_or(settings.expiry_reminder_days);
        let report = compliance::evaluate(
            &records,
            &settings.required_permit_types,
            as_of,
            risk_window,
        );

        let active_policy = policies.iter().find(|p| p.in_force_on(as_of)).cloned();
        let active_permits = permits
            .iter()
            .filter(|p| p.in_force_on(as_of))
            .cloned()
            .collect();

        Ok(VehicleComplianceSnapshot {
            vehicle_id,
            report,
            active_policy,
            active_permits,
        })
    }

    /// Fleet-wide rollup via one aggregate query.
    #[instrument(skip(self, scope))]
    pub async fn tenant_summary(
        &self,
        scope: &ActiveTenant,
        as_of: NaiveDate,
    ) -> Result<ComplianceSummary> {
        let risk_window = scope.settings().expiry_reminder_days;
        self.reports
            .compliance_summary(scope, as_of, risk_window)
            .await
    }
}
