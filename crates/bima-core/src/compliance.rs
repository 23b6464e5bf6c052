//! Pure compliance evaluation
//!
//! Given snapshots of a vehicle's compliance records, compute its state at
//! any date: `compliant`, `at_risk` (everything in force but something
//! expires inside the tenant's risk window), or `non_compliant` (required
//! cover missing or lapsed). Record gathering and aggregate queries live in
//! the engine crate; this module never touches storage, which is what makes
//! time-travel evaluation ("status as of date D") a plain function call.

use crate::lifecycle::{in_force_on, RecordStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceState {
    Compliant,
    AtRisk,
    NonCompliant,
}

impl ComplianceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::AtRisk => "at_risk",
            Self::NonCompliant => "non_compliant",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "compliant" => Some(Self::Compliant),
            "at_risk" => Some(Self::AtRisk),
            "non_compliant" => Some(Self::NonCompliant),
            _ => None,
        }
    }
}

/// Which compliance requirement a record satisfies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverKind {
    Insurance,
    Permit { permit_type: String },
}

/// Lifecycle snapshot of one policy or permit, reduced to the fields the
/// evaluation needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverRecord {
    pub entity_id: Uuid,
    /// Human-readable handle for issue messages (policy/reference number)
    pub label: String,
    pub kind: CoverKind,
    pub status: RecordStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub activated_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl CoverRecord {
    pub fn in_force_on(&self, day: NaiveDate) -> bool {
        in_force_on(
            self.status,
            self.activated_at,
            self.cancelled_at,
            self.start_date,
            self.end_date,
            day,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiringRecord {
    pub entity_id: Uuid,
    pub label: String,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub status: ComplianceState,
    pub issues: Vec<String>,
    pub expiring: Vec<ExpiringRecord>,
}

/// Per-tenant rollup of vehicle states.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplianceSummary {
    pub total: i64,
    pub compliant: i64,
    pub at_risk: i64,
    pub non_compliant: i64,
}

/// Evaluate one vehicle's compliance at `as_of`.
///
/// A vehicle is non-compliant when insurance or any required permit type is
/// not in force; at risk when everything is in force but at least one
/// in-force record ends within `risk_window_days`; compliant otherwise.
pub fn evaluate(
    records: &[CoverRecord],
    required_permit_types: &[String],
    as_of: NaiveDate,
    risk_window_days: i64,
) -> ComplianceReport {
    let mut issues = Vec::new();
    let mut expiring = Vec::new();
    let risk_threshold = as_of + chrono::Duration::days(risk_window_days);

    let insurance_in_force = records
        .iter()
        .any(|r| r.kind == CoverKind::Insurance && r.in_force_on(as_of));
    if !insurance_in_force {
        // Distinguish lapsed cover from never-covered for the issue text
        let lapsed = records.iter().any(|r| {
            r.kind == CoverKind::Insurance
                && r.status == RecordStatus::Active
                && r.end_date < as_of
        });
        issues.push(if lapsed {
            "insurance cover has expired".to_string()
        } else {
            "no insurance cover in force".to_string()
        });
    }

    for required in required_permit_types {
        let in_force = records.iter().any(|r| {
            matches!(&r.kind, CoverKind::Permit { permit_type } if permit_type == required)
                && r.in_force_on(as_of)
        });
        if !in_force {
            let lapsed = records.iter().any(|r| {
                matches!(&r.kind, CoverKind::Permit { permit_type } if permit_type == required)
                    && r.status == RecordStatus::Active
                    && r.end_date < as_of
            });
            issues.push(if lapsed {
                format!("{required} has expired")
            } else {
                format!("no {required} in force")
            });
        }
    }

    for record in records {
        if record.in_force_on(as_of) && record.end_date <= risk_threshold {
            expiring.push(ExpiringRecord {
                entity_id: record.entity_id,
                label: record.label.clone(),
                end_date: record.end_date,
            });
        }
    }
    expiring.sort_by_key(|r| r.end_date);

    let status = if !issues.is_empty() {
        ComplianceState::NonCompliant
    } else if !expiring.is_empty() {
        ComplianceState::AtRisk
    } else {
        ComplianceState::Compliant
    };

    ComplianceReport {
        status,
        issues,
        expiring,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn active_record(kind: CoverKind, start: NaiveDate, end: NaiveDate) -> CoverRecord {
        CoverRecord {
            entity_id: Uuid::now_v7(),
            label: "POL-2025-ACME-00001".into(),
            kind,
            status: RecordStatus::Active,
            start_date: start,
            end_date: end,
            activated_at: Some(start.and_hms_opt(8, 0, 0).unwrap().and_utc()),
            cancelled_at: None,
        }
    }

    fn required() -> Vec<String> {
        vec!["latra_license".to_string()]
    }

    #[test]
    fn test_fully_covered_vehicle_is_compliant() {
        let records = vec![
            active_record(CoverKind::Insurance, date(2025, 1, 1), date(2025, 12, 31)),
            active_record(
                CoverKind::Permit {
                    permit_type: "latra_license".into(),
                },
                date(2025, 1, 1),
                date(2025, 12, 31),
            ),
        ];
        let report = evaluate(&records, &required(), date(2025, 6, 1), 30);
        assert_eq!(report.status, ComplianceState::Compliant);
        assert!(report.issues.is_empty());
        assert!(report.expiring.is_empty());
    }

    #[test]
    fn test_missing_insurance_is_non_compliant() {
        let records = vec![active_record(
            CoverKind::Permit {
                permit_type: "latra_license".into(),
            },
            date(2025, 1, 1),
            date(2025, 12, 31),
        )];
        let report = evaluate(&records, &required(), date(2025, 6, 1), 30);
        assert_eq!(report.status, ComplianceState::NonCompliant);
        assert_eq!(report.issues, vec!["no insurance cover in force"]);
    }

    #[test]
    fn test_lapsed_insurance_reports_expiry() {
        // Active in the store but past end_date (reconciler has not swept yet)
        let records = vec![active_record(
            CoverKind::Insurance,
            date(2024, 1, 1),
            date(2024, 12, 31),
        )];
        let report = evaluate(&records, &[], date(2025, 2, 1), 30);
        assert_eq!(report.status, ComplianceState::NonCompliant);
        assert_eq!(report.issues, vec!["insurance cover has expired"]);
    }

    #[test]
    fn test_expiring_cover_is_at_risk() {
        let records = vec![
            active_record(CoverKind::Insurance, date(2025, 1, 1), date(2025, 6, 20)),
            active_record(
                CoverKind::Permit {
                    permit_type: "latra_license".into(),
                },
                date(2025, 1, 1),
                date(2025, 12, 31),
            ),
        ];
        let report = evaluate(&records, &required(), date(2025, 6, 1), 30);
        assert_eq!(report.status, ComplianceState::AtRisk);
        assert_eq!(report.expiring.len(), 1);
        assert_eq!(report.expiring[0].end_date, date(2025, 6, 20));
    }

    #[test]
    fn test_risk_window_boundary_is_inclusive() {
        let records = vec![active_record(
            CoverKind::Insurance,
            date(2025, 1, 1),
            date(2025, 7, 1),
        )];
        // end_date - as_of == 30 days exactly
        let report = evaluate(&records, &[], date(2025, 6, 1), 30);
        assert_eq!(report.status, ComplianceState::AtRisk);

        let outside = evaluate(&records, &[], date(2025, 5, 31), 30);
        assert_eq!(outside.status, ComplianceState::Compliant);
    }

    #[test]
    fn test_time_travel_uses_historic_windows() {
        // Cancelled mid-year: compliant before the cancellation, not after
        let mut record = active_record(CoverKind::Insurance, date(2025, 1, 1), date(2025, 12, 31));
        record.status = RecordStatus::Cancelled;
        record.cancelled_at = Some(Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap());
        let records = vec![record];

        let before = evaluate(&records, &[], date(2025, 5, 1), 30);
        assert_eq!(before.status, ComplianceState::Compliant);

        let after = evaluate(&records, &[], date(2025, 7, 1), 30);
        assert_eq!(after.status, ComplianceState::NonCompliant);
    }

    #[test]
    fn test_future_dated_policy_not_yet_in_force() {
        let mut record = active_record(CoverKind::Insurance, date(2025, 8, 1), date(2026, 7, 31));
        record.activated_at = Some(Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap());
        let report = evaluate(&[record], &[], date(2025, 7, 1), 30);
        assert_eq!(report.status, ComplianceState::NonCompliant);
    }

    #[test]
    fn test_non_compliant_takes_precedence_over_at_risk() {
        let records = vec![active_record(
            CoverKind::Insurance,
            date(2025, 1, 1),
            date(2025, 6, 20),
        )];
        // Insurance expiring soon AND required permit missing entirely
        let report = evaluate(&records, &required(), date(2025, 6, 1), 30);
        assert_eq!(report.status, ComplianceState::NonCompliant);
        assert!(!report.expiring.is_empty());
    }
}
