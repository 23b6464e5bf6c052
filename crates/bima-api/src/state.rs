//! Application state for API handlers

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::PgPool;

use bima_core::{ActiveTenant, BimaError, Result, Tenant, TenantId, TenantRepository, User};
use bima_db::repositories::{
    PgAuditRepository, PgCustomerRepository, PgDynamicFieldRepository, PgHistoryRepository,
    PgNotificationRepository, PgPaymentRepository, PgPermitRepository, PgPolicyRepository,
    PgReportRepository, PgSessionRepository, PgTenantRepository, PgUserRepository,
    PgVehicleRepository,
};
use bima_engine::{
    ComplianceService, LifecycleEngine, NotificationService, PaymentService, Reconciler,
};

use crate::session::AuthService;

/// Concrete application state with repositories and services wired up
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub tenants: Arc<PgTenantRepository>,
    pub users: Arc<PgUserRepository>,
    pub sessions: Arc<PgSessionRepository>,
    pub customers: Arc<PgCustomerRepository>,
    pub vehicles: Arc<PgVehicleRepository>,
    pub policies: Arc<PgPolicyRepository>,
    pub permits: Arc<PgPermitRepository>,
    pub payments: Arc<PgPaymentRepository>,
    pub dynamic_fields: Arc<PgDynamicFieldRepository>,
    pub audit: Arc<PgAuditRepository>,
    pub history: Arc<PgHistoryRepository>,
    pub notifications: Arc<PgNotificationRepository>,
    pub reports: Arc<PgReportRepository>,
    pub engine: Arc<LifecycleEngine>,
    pub payment_service: Arc<PaymentService>,
    pub compliance: Arc<ComplianceService>,
    pub notifier: Arc<NotificationService>,
    pub auth: Arc<AuthService>,
    /// Seed value for new tenants' expiry reminder window
    pub expiry_reminder_days_default: i64,
    /// Advisory tenant snapshot cache; lifecycle guards never read it
    tenant_cache: Cache<TenantId, Tenant>,
}

impl AppState {
    pub fn new(db_pool: PgPool, session_ttl_hours: i64, expiry_reminder_days_default: i64) -> Self {
        let tenants = Arc::new(PgTenantRepository::new(db_pool.clone()));
        let users = Arc::new(PgUserRepository::new(db_pool.clone()));
        let sessions = Arc::new(PgSessionRepository::new(db_pool.clone()));
        let customers = Arc::new(PgCustomerRepository::new(db_pool.clone()));
        let vehicles = Arc::new(PgVehicleRepository::new(db_pool.clone()));
        let policies = Arc::new(PgPolicyRepository::new(db_pool.clone()));
        let permits = Arc::new(PgPermitRepository::new(db_pool.clone()));
        let payments = Arc::new(PgPaymentRepository::new(db_pool.clone()));
        let dynamic_fields = Arc::new(PgDynamicFieldRepository::new(db_pool.clone()));
        let audit = Arc::new(PgAuditRepository::new(db_pool.clone()));
        let history = Arc::new(PgHistoryRepository::new(db_pool.clone()));
        let notifications = Arc::new(PgNotificationRepository::new(db_pool.clone()));
        let reports = Arc::new(PgReportRepository::new(db_pool.clone()));

        let notifier = Arc::new(NotificationService::new(
            users.clone(),
            notifications.clone(),
        ));
        let engine = Arc::new(LifecycleEngine::new(
            db_pool.clone(),
            policies.clone(),
            permits.clone(),
            notifier.clone(),
        ));
        let payment_service = Arc::new(PaymentService::new(
            payments.clone(),
            policies.clone(),
            engine.clone(),
        ));
        let compliance = Arc::new(ComplianceService::new(
            vehicles.clone(),
            policies.clone(),
            permits.clone(),
            reports.clone(),
        ));
        let auth = Arc::new(AuthService::new(
            users.clone(),
            sessions.clone(),
            session_ttl_hours,
        ));

        let tenant_cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(60))
            .build();

        Self {
            db_pool,
            tenants,
            users,
            sessions,
            customers,
            vehicles,
            policies,
            permits,
            payments,
            dynamic_fields,
            audit,
            history,
            notifications,
            reports,
            engine,
            payment_service,
            compliance,
            notifier,
            auth,
            expiry_reminder_days_default,
            tenant_cache,
        }
    }

    /// Build the reconciler over the same repositories.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.tenants.clone(),
            self.policies.clone(),
            self.permits.clone(),
            self.sessions.clone(),
            self.engine.clone(),
            self.notifier.clone(),
        )
    }

    /// Bind the active tenant for a tenant user. Super admins have no
    /// implicit tenant and are rejected here.
    pub async fn bind_tenant(&self, user: &User) -> Result<ActiveTenant> {
        let tenant_id = user.tenant_id.ok_or_else(|| {
            BimaError::tenant_unbound("super admin must name a tenant explicitly")
        })?;
        let tenant = self.tenant_snapshot(tenant_id).await?;
        ActiveTenant::for_user(user, &tenant)
    }

    /// Explicit tenant binding for super-admin platform operations;
    /// bypasses the cache so suspend/unsuspend act on fresh state.
    pub async fn bind_named_tenant(
        &self,
        actor: &User,
        tenant_id: TenantId,
    ) -> Result<ActiveTenant> {
        let tenant = self.tenants.get_by_id(tenant_id).await?;
        ActiveTenant::for_platform_operation(actor, &tenant)
    }

    async fn tenant_snapshot(&self, tenant_id: TenantId) -> Result<Tenant> {
        if let Some(tenant) = self.tenant_cache.get(&tenant_id).await {
            return Ok(tenant);
        }
        let tenant = self.tenants.get_by_id(tenant_id).await?;
        self.tenant_cache.insert(tenant_id, tenant.clone()).await;
        Ok(tenant)
    }

    /// Drop a cached tenant snapshot after a platform mutation.
    pub async fn invalidate_tenant(&self, tenant_id: TenantId) {
        self.tenant_cache.invalidate(&tenant_id).await;
    }
}
