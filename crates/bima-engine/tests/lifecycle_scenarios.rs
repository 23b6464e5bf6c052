//! End-to-end lifecycle scenarios against a live PostgreSQL.
//!
//! These tests require a database. Set BIMA_TEST_DATABASE_URL (or
//! DATABASE_URL) and run with:
//!
//!   cargo test -p bima-engine --test lifecycle_scenarios -- --ignored
//!
//! Each test builds its own tenant, so runs are independent and the suite
//! can execute against a shared database.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use bima_core::compliance::ComplianceState;
use bima_core::{
    ActiveTenant, AuditAction, AuditFilter, AuditOutcome, AuditRepository, BimaError, Customer,
    CustomerId, CustomerRepository, EntityKind, HistoryRepository, NotificationRepository, Page,
    PaymentMethod, PermitRepository, Policy, PolicyCancellationReason, PolicyId, PolicyRepository,
    RecordStatus, Tenant, TenantId, TenantRepository, TenantSettings, TenantStatus, User, UserId,
    UserRepository, UserRole, UserStatus, Vehicle, VehicleId, VehicleRepository, VehicleType,
};
use bima_db::repositories::{
    PgAuditRepository, PgCustomerRepository, PgHistoryRepository, PgNotificationRepository,
    PgPaymentRepository, PgPermitRepository, PgPolicyRepository, PgReportRepository,
    PgTenantRepository, PgUserRepository, PgVehicleRepository,
};
use bima_engine::{
    ComplianceService, LifecycleEngine, NotificationService, PaymentService, Reconciler,
};

// =============================================================================
// Fixtures
// =============================================================================

fn database_url() -> Option<String> {
    std::env::var("BIMA_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
}

async fn test_pool() -> PgPool {
    let url = database_url().expect("BIMA_TEST_DATABASE_URL or DATABASE_URL must be set");
    let pool = PgPool::connect(&url).await.expect("database reachable");
    bima_db::run_migrations(&pool).await.expect("migrations apply");
    pool
}

struct Fixture {
    scope: ActiveTenant,
    tenant: Tenant,
    admin: User,
    tenants: Arc<PgTenantRepository>,
    customers: Arc<PgCustomerRepository>,
    vehicles: Arc<PgVehicleRepository>,
    policies: Arc<PgPolicyRepository>,
    permits: Arc<PgPermitRepository>,
    notifications: Arc<PgNotificationRepository>,
    audit: Arc<PgAuditRepository>,
    history: Arc<PgHistoryRepository>,
    engine: Arc<LifecycleEngine>,
    payment_service: Arc<PaymentService>,
    compliance: Arc<ComplianceService>,
    reconciler: Reconciler,
}

async fn fixture(pool: &PgPool) -> Fixture {
    let suffix = Uuid::now_v7().simple().to_string();
    let now = Utc::now();

    let tenants = Arc::new(PgTenantRepository::new(pool.clone()));
    let users = Arc::new(PgUserRepository::new(pool.clone()));
    let customers = Arc::new(PgCustomerRepository::new(pool.clone()));
    let vehicles = Arc::new(PgVehicleRepository::new(pool.clone()));
    let policies = Arc::new(PgPolicyRepository::new(pool.clone()));
    let permits = Arc::new(PgPermitRepository::new(pool.clone()));
    let payments = Arc::new(PgPaymentRepository::new(pool.clone()));
    let audit = Arc::new(PgAuditRepository::new(pool.clone()));
    let history = Arc::new(PgHistoryRepository::new(pool.clone()));
    let notifications = Arc::new(PgNotificationRepository::new(pool.clone()));
    let reports = Arc::new(PgReportRepository::new(pool.clone()));

    let root = users
        .create(
            &User {
                id: UserId::new(),
                email: format!("root-{suffix}@bima.test"),
                password_hash: "$argon2id$placeholder".to_string(),
                display_name: "Root".to_string(),
                role: UserRole::SuperAdmin,
                tenant_id: None,
                status: UserStatus::Active,
                failed_login_count: 0,
                locked_until: None,
                last_login_at: None,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
            None,
        )
        .await
        .expect("super admin created");

    let tenant = tenants
        .create(
            &Tenant {
                id: TenantId::new(),
                name: format!("Tenant {suffix}"),
                slug: format!("t{}", &suffix[..12]),
                status: TenantStatus::Active,
                settings: TenantSettings {
                    // LATRA is not required in these fixtures unless a test
                    // creates the permit
                    required_permit_types: vec![],
                    ..TenantSettings::default()
                },
                contact_email: format!("ops-{suffix}@bima.test"),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
            root.id,
        )
        .await
        .expect("tenant created");

    let admin = users
        .create(
            &User {
                id: UserId::new(),
                email: format!("admin-{suffix}@bima.test"),
                password_hash: "$argon2id$placeholder".to_string(),
                display_name: "Admin".to_string(),
                role: UserRole::Admin,
                tenant_id: Some(tenant.id),
                status: UserStatus::Active,
                failed_login_count: 0,
                locked_until: None,
                last_login_at: None,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
            Some(root.id),
        )
        .await
        .expect("admin created");

    let scope = ActiveTenant::for_user(&admin, &tenant).expect("scope binds");

    let notifier = Arc::new(NotificationService::new(
        users.clone(),
        notifications.clone(),
    ));
    let engine = Arc::new(LifecycleEngine::new(
        pool.clone(),
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
        reports,
    ));
    let sessions = Arc::new(bima_db::repositories::PgSessionRepository::new(pool.clone()));
    let reconciler = Reconciler::new(
        tenants.clone(),
        policies.clone(),
        permits.clone(),
        sessions,
        engine.clone(),
        notifier,
    );

    Fixture {
        scope,
        tenant,
        admin,
        tenants,
        customers,
        vehicles,
        policies,
        permits,
        notifications,
        audit,
        history,
        engine,
        payment_service,
        compliance,
        reconciler,
    }
}

impl Fixture {
    async fn vehicle(&self, plate: &str) -> Vehicle {
        let now = Utc::now();
        self.vehicles
            .save_new(
                &self.scope,
                &Vehicle {
                    id: VehicleId::new(),
                    tenant_id: self.scope.id(),
                    registration_plate: plate.to_string(),
                    chassis_number: None,
                    engine_number: None,
                    vehicle_type: VehicleType::Car,
                    usage_category: None,
                    status: bima_core::VehicleStatus::Active,
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                },
                self.admin.id,
            )
            .await
            .expect("vehicle created")
    }

    async fn pending_policy(
        &self,
        vehicle: VehicleId,
        start: NaiveDate,
        end: NaiveDate,
        premium: Decimal,
    ) -> Policy {
        let now = Utc::now();
        self.policies
            .save_new(
                &self.scope,
                &Policy {
                    id: PolicyId::new(),
                    tenant_id: self.scope.id(),
                    vehicle_id: vehicle,
                    policy_number: String::new(),
                    start_date: start,
                    end_date: end,
                    premium_amount: premium,
                    status: RecordStatus::PendingPayment,
                    activated_at: None,
                    cancelled_at: None,
                    cancelled_by: None,
                    cancellation_reason: None,
                    cancellation_note: None,
                    notes: None,
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                },
                self.admin.id,
            )
            .await
            .expect("policy created")
    }

    async fn pay_in_full(&self, policy: &Policy, today: NaiveDate) -> Option<Policy> {
        let (_, activated) = self
            .payment_service
            .record_verified_payment(
                &self.scope,
                &self.admin,
                policy.id,
                policy.premium_amount,
                PaymentMethod::MobileMoney,
                format!("MM-{}", Uuid::now_v7().simple()),
                today,
            )
            .await
            .expect("payment recorded");
        activated
    }
}

fn premium() -> Decimal {
    Decimal::new(1_000_000, 0)
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
#[ignore = "requires PostgreSQL (set BIMA_TEST_DATABASE_URL)"]
async fn happy_activation_yields_compliant_vehicle() {
    let pool = test_pool().await;
    let fx = fixture(&pool).await;
    let today = Utc::now().date_naive();

    let vehicle = fx.vehicle("T123ABC").await;
    let policy = fx
        .pending_policy(vehicle.id, today, today + Duration::days(364), premium())
        .await;
    assert!(policy.policy_number.starts_with("POL-"));

    let activated = fx.pay_in_full(&policy, today).await.expect("auto-activated");
    assert_eq!(activated.status, RecordStatus::Active);
    assert!(activated.activated_at.is_some());

    let snapshot = fx
        .compliance
        .vehicle_status(&fx.scope, vehicle.id, today, Some(30))
        .await
        .expect("compliance computed");
    assert_eq!(snapshot.report.status, ComplianceState::Compliant);
    assert!(snapshot.active_policy.is_some());
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set BIMA_TEST_DATABASE_URL)"]
async fn underpayment_blocks_activation_and_is_audited() {
    let pool = test_pool().await;
    let fx = fixture(&pool).await;
    let today = Utc::now().date_naive();

    let vehicle = fx.vehicle("T200UND").await;
    let policy = fx
        .pending_policy(vehicle.id, today, today + Duration::days(364), premium())
        .await;

    // Half the premium, verified
    let (_, auto) = fx
        .payment_service
        .record_verified_payment(
            &fx.scope,
            &fx.admin,
            policy.id,
            Decimal::new(500_000, 0),
            PaymentMethod::Cash,
            "CASH-001".to_string(),
            today,
        )
        .await
        .expect("partial payment recorded");
    assert!(auto.is_none());

    let err = fx
        .engine
        .activate_policy(&fx.scope, &fx.admin, policy.id, today)
        .await
        .unwrap_err();
    assert!(matches!(err, BimaError::PaymentIncomplete { .. }));

    let unchanged = fx.policies.get_by_id(&fx.scope, policy.id).await.unwrap();
    assert_eq!(unchanged.status, RecordStatus::PendingPayment);

    // The rejected attempt is in the audit trail
    let entries = fx
        .audit
        .query(
            &fx.scope,
            &AuditFilter {
                entity_kind: Some(EntityKind::Policy),
                entity_id: Some(*policy.id.as_uuid()),
                action: Some(AuditAction::Transition),
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert!(entries.iter().any(|e| e.outcome == AuditOutcome::Rejected));
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set BIMA_TEST_DATABASE_URL)"]
async fn second_activation_on_same_vehicle_is_rejected() {
    let pool = test_pool().await;
    let fx = fixture(&pool).await;
    let today = Utc::now().date_naive();

    let vehicle = fx.vehicle("T300OVL").await;
    let p1 = fx
        .pending_policy(vehicle.id, today, today + Duration::days(364), premium())
        .await;
    fx.pay_in_full(&p1, today).await.expect("p1 active");

    // Overlapping cover, fully paid; activation must still be refused
    let p2 = fx
        .pending_policy(
            vehicle.id,
            today + Duration::days(100),
            today + Duration::days(464),
            premium(),
        )
        .await;
    let auto = fx.pay_in_full(&p2, today).await;
    assert!(auto.is_none(), "full payment must not bypass the overlap guard");

    let err = fx
        .engine
        .activate_policy(&fx.scope, &fx.admin, p2.id, today)
        .await
        .unwrap_err();
    assert!(matches!(err, BimaError::Overlap));

    // P1 remains the sole active policy
    let p1_after = fx.policies.get_by_id(&fx.scope, p1.id).await.unwrap();
    let p2_after = fx.policies.get_by_id(&fx.scope, p2.id).await.unwrap();
    assert_eq!(p1_after.status, RecordStatus::Active);
    assert_eq!(p2_after.status, RecordStatus::PendingPayment);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set BIMA_TEST_DATABASE_URL)"]
async fn renewal_activates_only_after_predecessor_expires() {
    let pool = test_pool().await;
    let fx = fixture(&pool).await;
    let today = Utc::now().date_naive();

    let vehicle = fx.vehicle("T400REN").await;
    let p1 = fx
        .pending_policy(vehicle.id, today, today + Duration::days(10), premium())
        .await;
    fx.pay_in_full(&p1, today).await.expect("p1 active");

    // Successor starts the day after p1 ends
    let successor = fx
        .engine
        .renew_policy(
            &fx.scope,
            &fx.admin,
            p1.id,
            today + Duration::days(375),
            premium(),
        )
        .await
        .expect("renewal drafted");
    assert_eq!(successor.start_date, today + Duration::days(11));
    assert_eq!(successor.status, RecordStatus::PendingPayment);

    let rollover_day = today + Duration::days(11);
    // While p1 is still active the successor cannot activate
    fx.pay_in_full(&successor, today).await;
    let err = fx
        .engine
        .activate_policy(&fx.scope, &fx.admin, successor.id, today)
        .await
        .unwrap_err();
    assert!(matches!(err, BimaError::Overlap));

    // The sweep on rollover day expires p1; then the successor activates
    fx.reconciler.run_cycle(rollover_day).await.expect("sweep runs");
    let p1_after = fx.policies.get_by_id(&fx.scope, p1.id).await.unwrap();
    assert_eq!(p1_after.status, RecordStatus::Expired);

    let activated = fx
        .engine
        .activate_policy(&fx.scope, &fx.admin, successor.id, rollover_day)
        .await
        .expect("successor activates");
    assert_eq!(activated.status, RecordStatus::Active);

    let snapshot = fx
        .compliance
        .vehicle_status(&fx.scope, vehicle.id, rollover_day, Some(30))
        .await
        .unwrap();
    assert_ne!(snapshot.report.status, ComplianceState::NonCompliant);
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set BIMA_TEST_DATABASE_URL)"]
async fn reconciler_cycles_are_idempotent() {
    let pool = test_pool().await;
    let fx = fixture(&pool).await;
    let today = Utc::now().date_naive();

    let vehicle = fx.vehicle("T450IDE").await;
    // Cover that is inside the reminder window immediately
    let policy = fx
        .pending_policy(vehicle.id, today, today + Duration::days(7), premium())
        .await;
    fx.pay_in_full(&policy, today).await.expect("active");

    let reminders_for_admin = || async {
        fx.notifications
            .list_for_user(&fx.scope, fx.admin.id, false, Page::default())
            .await
            .unwrap()
            .into_iter()
            .filter(|n| n.entity_id == Some(*policy.id.as_uuid()))
            .count()
    };

    fx.reconciler.run_cycle(today).await.expect("first sweep");
    let after_first = reminders_for_admin().await;
    assert_eq!(after_first, 1, "one reminder per record per cycle day");

    let second = fx.reconciler.run_cycle(today).await.expect("second sweep");
    assert_eq!(second.policies_expired, 0);
    let after_second = reminders_for_admin().await;
    assert_eq!(after_second, after_first, "same-day reminders must dedupe");
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set BIMA_TEST_DATABASE_URL)"]
async fn tenants_cannot_see_each_other() {
    let pool = test_pool().await;
    let fx1 = fixture(&pool).await;
    let fx2 = fixture(&pool).await;
    let now = Utc::now();

    let customer = fx1
        .customers
        .save_new(
            &fx1.scope,
            &Customer {
                id: CustomerId::new(),
                tenant_id: fx1.scope.id(),
                kind: bima_core::CustomerKind::Individual,
                display_name: "Asha Mkude".to_string(),
                contact_email: None,
                contact_phone: None,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
            fx1.admin.id,
        )
        .await
        .expect("customer created");

    // Listing under the other tenant never includes the row
    let listed = fx2
        .customers
        .list(&fx2.scope, &Default::default(), Page::default())
        .await
        .unwrap();
    assert!(listed.iter().all(|c| c.id != customer.id));

    // Direct lookup collapses to NotFound, not Forbidden
    let err = fx2
        .customers
        .get_by_id(&fx2.scope, customer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BimaError::NotFound { .. }));

    // Sanity: both tenants exist platform-wide
    assert_ne!(fx1.tenant.id, fx2.tenant.id);
    fx1.tenants.get_by_id(fx2.tenant.id).await.expect("visible to platform");
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set BIMA_TEST_DATABASE_URL)"]
async fn cancelled_policy_is_frozen_with_history() {
    let pool = test_pool().await;
    let fx = fixture(&pool).await;
    let today = Utc::now().date_naive();

    let vehicle = fx.vehicle("T500IMM").await;
    let policy = fx
        .pending_policy(vehicle.id, today, today + Duration::days(364), premium())
        .await;
    fx.pay_in_full(&policy, today).await.expect("active");

    let cancelled = fx
        .engine
        .cancel_policy(
            &fx.scope,
            &fx.admin,
            policy.id,
            PolicyCancellationReason::CustomerRequest,
            Some("requested by phone".to_string()),
        )
        .await
        .expect("cancelled");
    assert_eq!(cancelled.status, RecordStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    // A second cancel is an invalid transition, not a duplicate state
    let err = fx
        .engine
        .cancel_policy(
            &fx.scope,
            &fx.admin,
            policy.id,
            PolicyCancellationReason::Other,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BimaError::InvalidTransition { .. }));

    // Edits are rejected outright
    let err = fx
        .engine
        .edit_policy(
            &fx.scope,
            &fx.admin,
            policy.id,
            bima_engine::PolicyPatch {
                premium_amount: Some(Decimal::new(2_000_000, 0)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BimaError::Immutable));

    // History holds the pre-cancel snapshot; audit holds the transition
    let snapshots = fx
        .history
        .for_entity(&fx.scope, EntityKind::Policy, *policy.id.as_uuid(), Page::default())
        .await
        .unwrap();
    assert!(snapshots.len() >= 3, "create, activate and cancel snapshots");

    let entries = fx
        .audit
        .query(
            &fx.scope,
            &AuditFilter {
                entity_kind: Some(EntityKind::Policy),
                entity_id: Some(*policy.id.as_uuid()),
                action: Some(AuditAction::Transition),
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert!(entries
        .iter()
        .any(|e| e.reason.as_deref() == Some("customer_request")));
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set BIMA_TEST_DATABASE_URL)"]
async fn permit_overlap_is_scoped_by_type() {
    let pool = test_pool().await;
    let fx = fixture(&pool).await;
    let today = Utc::now().date_naive();
    let now = Utc::now();

    let vehicle = fx.vehicle("T600PER").await;

    let permit = |permit_type: &str, reference: &str| bima_core::Permit {
        id: bima_core::PermitId::new(),
        tenant_id: fx.scope.id(),
        vehicle_id: vehicle.id,
        permit_type: permit_type.to_string(),
        reference_number: reference.to_string(),
        issuing_authority: "LATRA".to_string(),
        start_date: today,
        end_date: today + Duration::days(364),
        status: RecordStatus::Draft,
        activated_at: None,
        cancelled_at: None,
        cancelled_by: None,
        cancellation_reason: None,
        cancellation_note: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    let latra = fx
        .permits
        .save_new(&fx.scope, &permit("latra_license", "LTR-001"), fx.admin.id)
        .await
        .unwrap();
    let route = fx
        .permits
        .save_new(&fx.scope, &permit("route_permit", "RTE-001"), fx.admin.id)
        .await
        .unwrap();
    let latra_dup = fx
        .permits
        .save_new(&fx.scope, &permit("latra_license", "LTR-002"), fx.admin.id)
        .await
        .unwrap();

    fx.engine
        .activate_permit(&fx.scope, &fx.admin, latra.id, today)
        .await
        .expect("latra activates");
    // A different type coexists
    fx.engine
        .activate_permit(&fx.scope, &fx.admin, route.id, today)
        .await
        .expect("route permit activates");
    // A second permit of the same type does not
    let err = fx
        .engine
        .activate_permit(&fx.scope, &fx.admin, latra_dup.id, today)
        .await
        .unwrap_err();
    assert!(matches!(err, BimaError::Overlap));
}
