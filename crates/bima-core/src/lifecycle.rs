//! The shared lifecycle shape for policies and permits
//!
//! Both record families move through the same immutable state machine:
//!
//! ```text
//!   [draft] ──edit──▶ [draft]
//!      │
//!      ▼ (policies only)
//!   [pending_payment] ──edit──▶ [pending_payment]
//!      │
//!   activate
//!      │
//!      ▼
//!   [active] ──cancel──▶ [cancelled]   (terminal)
//!      │
//!   expire
//!      │
//!      ▼
//!   [expired]                          (terminal)
//! ```
//!
//! Permits skip `pending_payment` and activate straight from draft. This
//! module holds only the pure rules: the transition table, guard
//! predicates, and active-window reconstruction. Transaction handling and
//! conflict detection live in the engine crate.

use crate::error::{BimaError, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};

// =============================================================================
// Status & transition table
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Draft,
    PendingPayment,
    Active,
    Cancelled,
    Expired,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingPayment => "pending_payment",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "pending_payment" => Some(Self::PendingPayment),
            "active" => Some(Self::Active),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Edits are allowed only before activation.
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::Draft | Self::PendingPayment)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }
}

/// Which record family a transition applies to; the only difference in the
/// table is that permits never enter `pending_payment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Policy,
    Permit,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Policy => "policy",
            Self::Permit => "permit",
        }
    }

    /// Valid states a record of this kind may hold at all.
    pub fn allows_status(&self, status: RecordStatus) -> bool {
        match self {
            Self::Policy => true,
            Self::Permit => status != RecordStatus::PendingPayment,
        }
    }
}

/// The full transition table. Everything not listed here is rejected.
pub fn can_transition(kind: RecordKind, from: RecordStatus, to: RecordStatus) -> bool {
    use RecordStatus::*;
    if !kind.allows_status(from) || !kind.allows_status(to) {
        return false;
    }
    matches!(
        (from, to),
        (Draft, PendingPayment)
            | (Draft, Active)
            | (PendingPayment, Active)
            | (Draft, Cancelled)
            | (PendingPayment, Cancelled)
            | (Active, Cancelled)
            | (Active, Expired)
    )
}

/// Like [`can_transition`] but produces the domain error.
pub fn ensure_transition(kind: RecordKind, from: RecordStatus, to: RecordStatus) -> Result<()> {
    if can_transition(kind, from, to) {
        Ok(())
    } else {
        Err(BimaError::invalid_transition(from.as_str(), to.as_str()))
    }
}

// =============================================================================
// Activation & expiry guards
// =============================================================================

/// Date-window guard for activation: cover that has already ended cannot be
/// activated. A start date in the future is allowed; the record becomes
/// active but is not in force until its start date.
pub fn ensure_activation_window(end_date: NaiveDate, today: NaiveDate) -> Result<()> {
    if end_date > today {
        Ok(())
    } else {
        Err(BimaError::validation(
            "end_date",
            "cover period has already ended",
        ))
    }
}

/// Expiry guard: a record expires only once today is past its end date.
pub fn ensure_expirable(status: RecordStatus, end_date: NaiveDate, today: NaiveDate) -> Result<()> {
    if status != RecordStatus::Active {
        return Err(BimaError::invalid_transition(status.as_str(), "expired"));
    }
    if today > end_date {
        Ok(())
    } else {
        Err(BimaError::validation(
            "end_date",
            "cannot expire a record before its end date",
        ))
    }
}

// =============================================================================
// Cancellation reasons
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyCancellationReason {
    CustomerRequest,
    NonPayment,
    VehicleSold,
    Duplicate,
    DataError,
    Other,
}

impl PolicyCancellationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerRequest => "customer_request",
            Self::NonPayment => "non_payment",
            Self::VehicleSold => "vehicle_sold",
            Self::Duplicate => "duplicate",
            Self::DataError => "data_error",
            Self::Other => "other",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "customer_request" => Some(Self::CustomerRequest),
            "non_payment" => Some(Self::NonPayment),
            "vehicle_sold" => Some(Self::VehicleSold),
            "duplicate" => Some(Self::Duplicate),
            "data_error" => Some(Self::DataError),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermitCancellationReason {
    CustomerRequest,
    VehicleSold,
    Duplicate,
    DataError,
    ExpiredEarly,
    Other,
}

impl PermitCancellationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerRequest => "customer_request",
            Self::VehicleSold => "vehicle_sold",
            Self::Duplicate => "duplicate",
            Self::DataError => "data_error",
            Self::ExpiredEarly => "expired_early",
            Self::Other => "other",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "customer_request" => Some(Self::CustomerRequest),
            "vehicle_sold" => Some(Self::VehicleSold),
            "duplicate" => Some(Self::Duplicate),
            "data_error" => Some(Self::DataError),
            "expired_early" => Some(Self::ExpiredEarly),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

// =============================================================================
// Active-window reconstruction
// =============================================================================

/// The half-open interval `[from, to)` during which a record counted as
/// active. `to` is `None` while the record is still in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub from: DateTime<Utc>,
    pub to: Option<DateTime<Utc>>,
}

impl ActiveWindow {
    /// Rebuild the window from lifecycle fields:
    /// - from = activated_at
    /// - to = cancelled_at if cancelled, the end-of-day boundary after
    ///   end_date if expired, otherwise open.
    pub fn reconstruct(
        status: RecordStatus,
        activated_at: Option<DateTime<Utc>>,
        cancelled_at: Option<DateTime<Utc>>,
        end_date: NaiveDate,
    ) -> Option<Self> {
        let from = activated_at?;
        let to = match status {
            RecordStatus::Active => None,
            RecordStatus::Cancelled => cancelled_at,
            RecordStatus::Expired => Some(day_after_midnight(end_date)),
            // Never activated
            RecordStatus::Draft | RecordStatus::PendingPayment => return None,
        };
        Some(Self { from, to })
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.from <= t && self.to.is_none_or(|to| t < to)
    }
}

fn day_after_midnight(day: NaiveDate) -> DateTime<Utc> {
    let next = day + Duration::days(1);
    next.and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
}

/// Whether a record provides cover on a given day. Activation can predate
/// the cover period (future-dated activation), so in-force starts at the
/// later of activation day and start_date, and never extends past the
/// active window's close.
pub fn in_force_on(
    status: RecordStatus,
    activated_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    day: NaiveDate,
) -> bool {
    let Some(window) = ActiveWindow::reconstruct(status, activated_at, cancelled_at, end_date)
    else {
        return false;
    };
    if day < start_date || day > end_date {
        return false;
    }
    let probe = day
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc();
    // Before the activation instant the record was not yet active, except
    // that same-day activation covers the whole day.
    if probe < window.from && day < window.from.date_naive() {
        return false;
    }
    window.to.is_none_or(|to| probe < to)
}

/// The reconciler's reminder dedupe key: one reminder per record per cycle
/// day per kind, regardless of how many times the sweep runs.
pub fn reminder_dedupe_key(
    tenant_id: crate::TenantId,
    entity_id: uuid::Uuid,
    cycle_date: NaiveDate,
    kind: &str,
) -> String {
    format!("{tenant_id}:{entity_id}:{cycle_date}:{kind}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_policy_transition_table() {
        use RecordStatus::*;
        let ok = [
            (Draft, PendingPayment),
            (Draft, Active),
            (PendingPayment, Active),
            (Draft, Cancelled),
            (PendingPayment, Cancelled),
            (Active, Cancelled),
            (Active, Expired),
        ];
        for (from, to) in ok {
            assert!(can_transition(RecordKind::Policy, from, to), "{from:?}->{to:?}");
        }
        let rejected = [
            (Active, Draft),
            (Cancelled, Active),
            (Expired, Active),
            (Cancelled, Expired),
            (Expired, Cancelled),
            (Draft, Expired),
            (Cancelled, Cancelled),
        ];
        for (from, to) in rejected {
            assert!(!can_transition(RecordKind::Policy, from, to), "{from:?}->{to:?}");
        }
    }

    #[test]
    fn test_permits_skip_pending_payment() {
        use RecordStatus::*;
        assert!(can_transition(RecordKind::Permit, Draft, Active));
        assert!(!can_transition(RecordKind::Permit, Draft, PendingPayment));
        assert!(!can_transition(RecordKind::Permit, PendingPayment, Active));
    }

    #[test]
    fn test_cancel_is_not_idempotent() {
        let err = ensure_transition(
            RecordKind::Policy,
            RecordStatus::Cancelled,
            RecordStatus::Cancelled,
        )
        .unwrap_err();
        assert!(matches!(err, BimaError::InvalidTransition { .. }));
    }

    #[test]
    fn test_activation_window_guard() {
        let today = date(2025, 6, 1);
        assert!(ensure_activation_window(date(2025, 12, 31), today).is_ok());
        assert!(ensure_activation_window(date(2025, 6, 1), today).is_err());
        assert!(ensure_activation_window(date(2025, 5, 31), today).is_err());
    }

    #[test]
    fn test_expiry_guard() {
        let end = date(2025, 12, 31);
        assert!(ensure_expirable(RecordStatus::Active, end, date(2026, 1, 1)).is_ok());
        // Not past end date yet
        assert!(ensure_expirable(RecordStatus::Active, end, date(2025, 12, 31)).is_err());
        // Wrong source state
        let err = ensure_expirable(RecordStatus::Draft, end, date(2026, 1, 1)).unwrap_err();
        assert!(matches!(err, BimaError::InvalidTransition { .. }));
    }

    #[test]
    fn test_active_window_open_while_active() {
        let w = ActiveWindow::reconstruct(
            RecordStatus::Active,
            Some(ts(2025, 1, 1, 9)),
            None,
            date(2025, 12, 31),
        )
        .unwrap();
        assert_eq!(w.to, None);
        assert!(w.contains(ts(2025, 6, 1, 0)));
        assert!(!w.contains(ts(2024, 12, 31, 23)));
    }

    #[test]
    fn test_active_window_closed_by_cancellation() {
        let cancelled = ts(2025, 3, 15, 12);
        let w = ActiveWindow::reconstruct(
            RecordStatus::Cancelled,
            Some(ts(2025, 1, 1, 9)),
            Some(cancelled),
            date(2025, 12, 31),
        )
        .unwrap();
        assert!(w.contains(ts(2025, 3, 15, 11)));
        assert!(!w.contains(cancelled));
    }

    #[test]
    fn test_active_window_closed_by_expiry_at_end_of_day() {
        let w = ActiveWindow::reconstruct(
            RecordStatus::Expired,
            Some(ts(2025, 1, 1, 9)),
            None,
            date(2025, 12, 31),
        )
        .unwrap();
        // The whole end_date day is still covered
        assert!(w.contains(ts(2025, 12, 31, 23)));
        assert!(!w.contains(ts(2026, 1, 1, 0)));
    }

    #[test]
    fn test_draft_has_no_active_window() {
        assert!(ActiveWindow::reconstruct(
            RecordStatus::Draft,
            None,
            None,
            date(2025, 12, 31)
        )
        .is_none());
    }

    #[test]
    fn test_future_dated_activation_not_in_force_before_start() {
        let activated = Some(ts(2025, 6, 1, 9));
        let in_force = |day| {
            in_force_on(
                RecordStatus::Active,
                activated,
                None,
                date(2025, 7, 1),
                date(2026, 6, 30),
                day,
            )
        };
        // Active but cover has not begun
        assert!(!in_force(date(2025, 6, 15)));
        assert!(in_force(date(2025, 7, 1)));
        assert!(in_force(date(2026, 6, 30)));
        assert!(!in_force(date(2026, 7, 1)));
    }

    #[test]
    fn test_same_day_activation_covers_that_day() {
        // Activated mid-morning; the vehicle counts as covered for the day
        let in_force = in_force_on(
            RecordStatus::Active,
            Some(ts(2025, 1, 1, 10)),
            None,
            date(2025, 1, 1),
            date(2025, 12, 31),
            date(2025, 1, 1),
        );
        assert!(in_force);
    }

    #[test]
    fn test_reminder_dedupe_key_is_stable() {
        let tenant = crate::TenantId::new();
        let entity = uuid::Uuid::now_v7();
        let day = date(2025, 11, 1);
        let a = reminder_dedupe_key(tenant, entity, day, "expiry_reminder");
        let b = reminder_dedupe_key(tenant, entity, day, "expiry_reminder");
        assert_eq!(a, b);
        let other_day = reminder_dedupe_key(tenant, entity, date(2025, 11, 2), "expiry_reminder");
        assert_ne!(a, other_day);
    }
}
