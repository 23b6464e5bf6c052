//! Repository contracts for the Bima platform
//!
//! Storage access goes through these traits and nowhere else. Every method
//! on tenant-scoped data takes an [`ActiveTenant`]; implementations compose
//! the tenant predicate into each query, so a misrouted id from a handler
//! cannot leak rows. Lookups outside the active tenant return `NotFound`,
//! never `Forbidden`, so ids cannot be probed across tenants.

use crate::compliance::ComplianceSummary;
use crate::error::Result;
use crate::ids::*;
use crate::models::*;
use crate::tenant::ActiveTenant;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

// =============================================================================
// Pagination & filters
// =============================================================================

pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Page {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 50)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CustomerFilter {
    pub kind: Option<CustomerKind>,
    /// Case-insensitive substring over display name and contacts
    pub search: Option<String>,
    /// Equality filter on a dynamic field: (definition key, typed value)
    pub field: Option<(String, FieldValueData)>,
}

#[derive(Debug, Clone, Default)]
pub struct VehicleFilter {
    pub status: Option<VehicleStatus>,
    pub vehicle_type: Option<VehicleType>,
    pub plate_query: Option<String>,
    pub owner: Option<CustomerId>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub status: Option<crate::lifecycle::RecordStatus>,
    pub vehicle_id: Option<VehicleId>,
    pub ending_on_or_before: Option<NaiveDate>,
    pub created_between: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity_kind: Option<EntityKind>,
    pub entity_id: Option<uuid::Uuid>,
    pub actor_user_id: Option<UserId>,
    pub action: Option<AuditAction>,
    pub from_ts: Option<DateTime<Utc>>,
    pub to_ts: Option<DateTime<Utc>>,
}

// =============================================================================
// Platform-level repositories
// =============================================================================

/// Tenant rows are platform data: no ActiveTenant is required to manage
/// them, and only super admins reach the mutating paths (enforced in authz).
#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn create(&self, tenant: &Tenant, actor: UserId) -> Result<Tenant>;
    async fn get_by_id(&self, id: TenantId) -> Result<Tenant>;
    async fn get_by_slug(&self, slug: &str) -> Result<Tenant>;
    async fn list(&self, page: Page) -> Result<Vec<Tenant>>;
    /// All non-deleted tenants; the reconciler sweeps these.
    async fn list_all_active(&self) -> Result<Vec<Tenant>>;
    async fn update(&self, tenant: &Tenant, actor: UserId) -> Result<Tenant>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User, actor: Option<UserId>) -> Result<User>;
    async fn get_by_id(&self, id: UserId) -> Result<User>;
    /// Emails are unique system-wide; lookup spans tenants (login path).
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn list_by_tenant(&self, scope: &ActiveTenant, page: Page) -> Result<Vec<User>>;
    async fn list_by_roles(&self, scope: &ActiveTenant, roles: &[UserRole]) -> Result<Vec<User>>;
    async fn update(&self, user: &User, actor: Option<UserId>) -> Result<User>;
    /// Lockout bookkeeping; bypasses audit (login attempts are not entity
    /// mutations) but is rate limited upstream.
    async fn record_login_attempt(
        &self,
        id: UserId,
        failed_count: i32,
        locked_until: Option<DateTime<Utc>>,
        last_login_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<Session>;
    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>>;
    async fn delete(&self, id: SessionId) -> Result<()>;
    /// Used on login to rotate: all prior sessions for the user are dropped.
    async fn delete_for_user(&self, user_id: UserId) -> Result<u64>;
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

// =============================================================================
// Fleet repositories (tenant-scoped)
// =============================================================================

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn save_new(&self, scope: &ActiveTenant, customer: &Customer, actor: UserId)
        -> Result<Customer>;
    async fn get_by_id(&self, scope: &ActiveTenant, id: CustomerId) -> Result<Customer>;
    async fn list(
        &self,
        scope: &ActiveTenant,
        filter: &CustomerFilter,
        page: Page,
    ) -> Result<Vec<Customer>>;
    async fn update(&self, scope: &ActiveTenant, customer: &Customer, actor: UserId)
        -> Result<Customer>;
    async fn soft_delete(&self, scope: &ActiveTenant, id: CustomerId, actor: UserId) -> Result<()>;
}

#[async_trait]
pub trait VehicleRepository: Send + Sync {
    async fn save_new(&self, scope: &ActiveTenant, vehicle: &Vehicle, actor: UserId)
        -> Result<Vehicle>;
    async fn get_by_id(&self, scope: &ActiveTenant, id: VehicleId) -> Result<Vehicle>;
    async fn find_by_plate(&self, scope: &ActiveTenant, plate: &str) -> Result<Option<Vehicle>>;
    async fn list(
        &self,
        scope: &ActiveTenant,
        filter: &VehicleFilter,
        page: Page,
    ) -> Result<Vec<Vehicle>>;
    async fn update(&self, scope: &ActiveTenant, vehicle: &Vehicle, actor: UserId)
        -> Result<Vehicle>;
    async fn soft_delete(&self, scope: &ActiveTenant, id: VehicleId, actor: UserId) -> Result<()>;

    /// The single open ownership row, if the vehicle has an owner on record.
    async fn current_ownership(
        &self,
        scope: &ActiveTenant,
        vehicle_id: VehicleId,
    ) -> Result<Option<Ownership>>;
    async fn ownership_history(
        &self,
        scope: &ActiveTenant,
        vehicle_id: VehicleId,
    ) -> Result<Vec<Ownership>>;
    /// Closes the open ownership row (if any) and opens a new one for the
    /// new owner, atomically.
    async fn transfer_ownership(
        &self,
        scope: &ActiveTenant,
        vehicle_id: VehicleId,
        new_owner: CustomerId,
        actor: UserId,
    ) -> Result<Ownership>;
}

// =============================================================================
// Compliance record repositories (tenant-scoped)
// =============================================================================

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Persists a new draft/pending policy, generating its policy number.
    async fn save_new(&self, scope: &ActiveTenant, policy: &Policy, actor: UserId)
        -> Result<Policy>;
    async fn get_by_id(&self, scope: &ActiveTenant, id: PolicyId) -> Result<Policy>;
    async fn list(
        &self,
        scope: &ActiveTenant,
        filter: &RecordFilter,
        page: Page,
    ) -> Result<Vec<Policy>>;
    async fn list_for_vehicle(
        &self,
        scope: &ActiveTenant,
        vehicle_id: VehicleId,
    ) -> Result<Vec<Policy>>;
    /// Pre-activation edits only; the engine rejects edits on immutable rows
    /// before calling this.
    async fn update(&self, scope: &ActiveTenant, policy: &Policy, actor: UserId) -> Result<Policy>;
    async fn soft_delete(&self, scope: &ActiveTenant, id: PolicyId, actor: UserId) -> Result<()>;
    /// Next `POL-{year}-{SLUG}-{seq:05}` number for the tenant.
    async fn next_policy_number(&self, scope: &ActiveTenant, year: i32) -> Result<String>;
}

#[async_trait]
pub trait PermitRepository: Send + Sync {
    async fn save_new(&self, scope: &ActiveTenant, permit: &Permit, actor: UserId)
        -> Result<Permit>;
    async fn get_by_id(&self, scope: &ActiveTenant, id: PermitId) -> Result<Permit>;
    async fn list(
        &self,
        scope: &ActiveTenant,
        filter: &RecordFilter,
        page: Page,
    ) -> Result<Vec<Permit>>;
    async fn list_for_vehicle(
        &self,
        scope: &ActiveTenant,
        vehicle_id: VehicleId,
    ) -> Result<Vec<Permit>>;
    async fn update(&self, scope: &ActiveTenant, permit: &Permit, actor: UserId) -> Result<Permit>;
    async fn soft_delete(&self, scope: &ActiveTenant, id: PermitId, actor: UserId) -> Result<()>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn save_new(&self, scope: &ActiveTenant, payment: &Payment, actor: UserId)
        -> Result<Payment>;
    async fn get_by_id(&self, scope: &ActiveTenant, id: PaymentId) -> Result<Payment>;
    async fn list_for_policy(
        &self,
        scope: &ActiveTenant,
        policy_id: PolicyId,
    ) -> Result<Vec<Payment>>;
    /// Marks the payment verified; verification is append-style (a verified
    /// payment is never un-verified).
    async fn verify(
        &self,
        scope: &ActiveTenant,
        id: PaymentId,
        verified_by: UserId,
    ) -> Result<Payment>;
    /// Sum of verified payment amounts for the policy. Guard input for
    /// activation, always read from the store, never a cache.
    async fn sum_verified(&self, scope: &ActiveTenant, policy_id: PolicyId) -> Result<Decimal>;
}

// =============================================================================
// Dynamic fields
// =============================================================================

#[async_trait]
pub trait DynamicFieldRepository: Send + Sync {
    async fn create_definition(
        &self,
        scope: &ActiveTenant,
        definition: &FieldDefinition,
        actor: UserId,
    ) -> Result<FieldDefinition>;
    async fn get_definition(
        &self,
        scope: &ActiveTenant,
        id: FieldDefinitionId,
    ) -> Result<FieldDefinition>;
    async fn find_definition_by_key(
        &self,
        scope: &ActiveTenant,
        entity_kind: FieldEntityKind,
        key: &str,
    ) -> Result<Option<FieldDefinition>>;
    async fn list_definitions(
        &self,
        scope: &ActiveTenant,
        entity_kind: Option<FieldEntityKind>,
        include_inactive: bool,
    ) -> Result<Vec<FieldDefinition>>;
    /// Rename, reorder, toggle requirement or deactivate. Deactivation
    /// retains existing values.
    async fn update_definition(
        &self,
        scope: &ActiveTenant,
        definition: &FieldDefinition,
        actor: UserId,
    ) -> Result<FieldDefinition>;

    /// Insert-or-replace the value for (definition, entity). The value must
    /// already be validated against the definition.
    async fn upsert_value(
        &self,
        scope: &ActiveTenant,
        value: &FieldValue,
        actor: UserId,
    ) -> Result<FieldValue>;
    async fn values_for_entity(
        &self,
        scope: &ActiveTenant,
        entity_kind: FieldEntityKind,
        entity_id: uuid::Uuid,
    ) -> Result<Vec<FieldValue>>;
}

// =============================================================================
// Audit & history
// =============================================================================

/// Append-only by construction: there is no update or delete.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn query(
        &self,
        scope: &ActiveTenant,
        filter: &AuditFilter,
        page: Page,
    ) -> Result<Vec<AuditEntry>>;
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn for_entity(
        &self,
        scope: &ActiveTenant,
        entity_kind: EntityKind,
        entity_id: uuid::Uuid,
        page: Page,
    ) -> Result<Vec<HistoryRecord>>;
    /// Latest snapshot recorded on or before the given instant; this is
    /// the time-travel primitive.
    async fn snapshot_as_of(
        &self,
        scope: &ActiveTenant,
        entity_kind: EntityKind,
        entity_id: uuid::Uuid,
        as_of: DateTime<Utc>,
    ) -> Result<Option<HistoryRecord>>;
}

// =============================================================================
// Notifications
// =============================================================================

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Appends one row per recipient. Rows carrying a `cycle_date` dedupe on
    /// (tenant, entity, cycle_date, kind): replays insert nothing.
    async fn enqueue(
        &self,
        scope: &ActiveTenant,
        notifications: &[Notification],
    ) -> Result<u64>;
    async fn list_for_user(
        &self,
        scope: &ActiveTenant,
        user_id: UserId,
        unread_only: bool,
        page: Page,
    ) -> Result<Vec<Notification>>;
    async fn mark_read(
        &self,
        scope: &ActiveTenant,
        id: NotificationId,
        user_id: UserId,
    ) -> Result<Notification>;
}

// =============================================================================
// Report projections
// =============================================================================

/// Read-only projections backing dashboards and report exports. Data only;
/// rendering lives outside the core.
#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn active_policies(&self, scope: &ActiveTenant, page: Page) -> Result<Vec<Policy>>;
    async fn expired_policies(&self, scope: &ActiveTenant, page: Page) -> Result<Vec<Policy>>;
    async fn policies_ending_between(
        &self,
        scope: &ActiveTenant,
        from: NaiveDate,
        to: NaiveDate,
        page: Page,
    ) -> Result<Vec<Policy>>;
    async fn vehicles_registered_between(
        &self,
        scope: &ActiveTenant,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: Page,
    ) -> Result<Vec<Vehicle>>;
    /// Tenant-wide rollup computed in one aggregate pass; no per-vehicle
    /// loop.
    async fn compliance_summary(
        &self,
        scope: &ActiveTenant,
        as_of: NaiveDate,
        risk_window_days: i64,
    ) -> Result<ComplianceSummary>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_clamps_size_and_floor() {
        let p = Page::new(0, 10_000);
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, MAX_PAGE_SIZE);
        assert_eq!(p.offset(), 0);

        let p2 = Page::new(3, 25);
        assert_eq!(p2.offset(), 50);
        assert_eq!(p2.limit(), 25);
    }
}
