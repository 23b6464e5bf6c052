//! Background expiry reconciler
//!
//! Sweeps every active tenant at least daily: active records whose end date
//! has passed are expired, and records approaching expiry get a reminder in
//! the notification buffer. Each entity's transition is its own
//! transaction, so a sweep interrupted mid-way leaves the store consistent
//! and the next cycle picks up the remainder. Reminders dedupe on
//! (tenant, recipient, entity, cycle day, kind); running the same cycle
//! twice changes nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, Utc};
use tracing::{error, info, instrument, warn};

use bima_core::{
    ActiveTenant, EntityKind, Page, PermitRepository, PolicyRepository, RecordFilter,
    RecordStatus, Result, SessionRepository, TenantRepository,
};
use bima_db::repositories::{
    PgPermitRepository, PgPolicyRepository, PgSessionRepository, PgTenantRepository,
};

use crate::lifecycle::LifecycleEngine;
use crate::notify::NotificationService;

const SWEEP_PAGE_SIZE: u32 = 200;

#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub tenants_swept: u32,
    pub policies_expired: u32,
    pub permits_expired: u32,
    pub reminders_enqueued: u64,
    pub failures: u32,
}

pub struct Reconciler {
    tenants: Arc<PgTenantRepository>,
    policies: Arc<PgPolicyRepository>,
    permits: Arc<PgPermitRepository>,
    sessions: Arc<PgSessionRepository>,
    engine: Arc<LifecycleEngine>,
    notifier: Arc<NotificationService>,
}

impl Reconciler {
    pub fn new(
        tenants: Arc<PgTenantRepository>,
        policies: Arc<PgPolicyRepository>,
        permits: Arc<PgPermitRepository>,
        sessions: Arc<PgSessionRepository>,
        engine: Arc<LifecycleEngine>,
        notifier: Arc<NotificationService>,
    ) -> Self {
        Self {
            tenants,
            policies,
            permits,
            sessions,
            engine,
            notifier,
        }
    }

    /// One full sweep across all active tenants. Idempotent for a given
    /// `today`: expiring an expired record is a no-op by state machine, and
    /// reminder rows dedupe on the cycle date.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, today: NaiveDate) -> Result<CycleStats> {
        let mut stats = CycleStats::default();

        // Housekeeping: drop dead sessions before sweeping tenants
        match self.sessions.purge_expired(Utc::now()).await {
            Ok(purged) if purged > 0 => info!(purged, "Expired sessions purged"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Session purge failed"),
        }

        for tenant in self.tenants.list_all_active().await? {
            let scope = match ActiveTenant::for_background(&tenant) {
                Ok(scope) => scope,
                Err(e) => {
                    warn!(tenant = %tenant.slug, error = %e, "Skipping tenant");
                    continue;
                }
            };

            stats.tenants_swept += 1;
            if let Err(e) = self.sweep_tenant(&scope, today, &mut stats).await {
                // Infra failure: log and move on; the next cycle retries
                error!(tenant = %tenant.slug, error = %e, "Tenant sweep failed");
                stats.failures += 1;
            }
        }

        info!(
            tenants = stats.tenants_swept,
            policies_expired = stats.policies_expired,
            permits_expired = stats.permits_expired,
            reminders = stats.reminders_enqueued,
            failures = stats.failures,
            "Reconciler cycle complete"
        );
        Ok(stats)
    }

    async fn sweep_tenant(
        &self,
        scope: &ActiveTenant,
        today: NaiveDate,
        stats: &mut CycleStats,
    ) -> Result<()> {
        self.expire_lapsed(scope, today, stats).await?;
        self.send_reminders(scope, today, stats).await?;
        Ok(())
    }

    /// Expire every active record whose end date is behind `today`, one
    /// transaction per record.
    async fn expire_lapsed(
        &self,
        scope: &ActiveTenant,
        today: NaiveDate,
        stats: &mut CycleStats,
    ) -> Result<()> {
        let lapsed_filter = RecordFilter {
            status: Some(RecordStatus::Active),
            ending_on_or_before: Some(today - Duration::days(1)),
            ..Default::default()
        };

        loop {
            // Always the first page: each expiry removes the row from the
            // filtered set
            let batch = self
                .policies
                .list(scope, &lapsed_filter, Page::new(1, SWEEP_PAGE_SIZE))
                .await?;
            if batch.is_empty() {
                break;
            }
            for policy in batch {
                match self.engine.expire_policy(scope, policy.id, today).await {
                    Ok(_) => stats.policies_expired += 1,
                    // Lost a race with a concurrent cancel/expire; fine
                    Err(bima_core::BimaError::InvalidTransition { .. }) => {}
                    Err(e) => {
                        warn!(policy = %policy.policy_number, error = %e, "Expiry failed");
                        stats.failures += 1;
                    }
                }
            }
        }

        loop {
            let batch = self
                .permits
                .list(scope, &lapsed_filter, Page::new(1, SWEEP_PAGE_SIZE))
                .await?;
            if batch.is_empty() {
                break;
            }
            for permit in batch {
                match self.engine.expire_permit(scope, permit.id, today).await {
                    Ok(_) => stats.permits_expired += 1,
                    Err(bima_core::BimaError::InvalidTransition { .. }) => {}
                    Err(e) => {
                        warn!(permit = %permit.reference_number, error = %e, "Expiry failed");
                        stats.failures += 1;
                    }
                }
            }
        }

        Ok(())
    }

    /// Reminders for still-active records entering the tenant's risk
    /// window.
    async fn send_reminders(
        &self,
        scope: &ActiveTenant,
        today: NaiveDate,
        stats: &mut CycleStats,
    ) -> Result<()> {
        let window = scope.settings().expiry_reminder_days;
        let threshold = today + Duration::days(window);
        let expiring_filter = RecordFilter {
            status: Some(RecordStatus::Active),
            ending_on_or_before: Some(threshold),
            ..Default::default()
        };

        let mut page = 1;
        loop {
            let batch = self
                .policies
                .list(scope, &expiring_filter, Page::new(page, SWEEP_PAGE_SIZE))
                .await?;
            let done = (batch.len() as u32) < SWEEP_PAGE_SIZE;
            for policy in batch {
                if policy.end_date < today {
                    continue;
                }
                stats.reminders_enqueued += self
                    .notifier
                    .notify_expiry(
                        scope,
                        EntityKind::Policy,
                        *policy.id.as_uuid(),
                        &format!("Policy {}", policy.policy_number),
                        policy.end_date,
                        today,
                    )
                    .await?;
            }
            if done {
                break;
            }
            page += 1;
        }

        let mut page = 1;
        loop {
            let batch = self
                .permits
                .list(scope, &expiring_filter, Page::new(page, SWEEP_PAGE_SIZE))
                .await?;
            let done = (batch.len() as u32) < SWEEP_PAGE_SIZE;
            for permit in batch {
                if permit.end_date < today {
                    continue;
                }
                stats.reminders_enqueued += self
                    .notifier
                    .notify_expiry(
                        scope,
                        EntityKind::Permit,
                        *permit.id.as_uuid(),
                        &format!("{} {}", permit.permit_type, permit.reference_number),
                        permit.end_date,
                        today,
                    )
                    .await?;
            }
            if done {
                break;
            }
            page += 1;
        }

        Ok(())
    }

    /// Long-running loop for the worker task: sweep on startup, then on
    /// every interval tick until shutdown is requested.
    pub async fn run(self: Arc<Self>, interval: StdDuration, shutdown: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                info!("Reconciler shutting down");
                break;
            }
            let today = Utc::now().date_naive();
            if let Err(e) = self.run_cycle(today).await {
                error!(error = %e, "Reconciler cycle failed; will retry next interval");
            }
        }
    }
}
