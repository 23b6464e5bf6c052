//! Domain models for the Bima vehicle compliance platform
//!
//! Every business entity is tenant-scoped and soft-delete only: rows carry
//! `tenant_id`, `created_at`, `updated_at` and a nullable `deleted_at`. Hard
//! deletes on business data are forbidden at the repository layer.

use crate::ids::*;
use crate::lifecycle::{
    ActiveWindow, PermitCancellationReason, PolicyCancellationReason, RecordStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Tenant
// =============================================================================

/// An insurance company or fleet operator. The data-isolation boundary:
/// tenants share one database but never share rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    /// URL-safe identifier, unique platform-wide
    pub slug: String,
    pub status: TenantStatus,
    pub settings: TenantSettings,
    pub contact_email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active && self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// Typed per-tenant configuration, stored as JSON on the tenant row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettings {
    /// Days before a record's end_date at which a vehicle counts as at-risk
    pub expiry_reminder_days: i64,
    /// Whether the tenant may attach fleet-level policies
    pub fleet_policies_enabled: bool,
    /// Permit types a vehicle must hold to be compliant (e.g. "latra_license")
    pub required_permit_types: Vec<String>,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            expiry_reminder_days: 30,
            fleet_policies_enabled: false,
            required_permit_types: vec!["latra_license".to_string()],
        }
    }
}

// =============================================================================
// User & Identity
// =============================================================================

/// A platform user. Super admins administer tenants and carry no tenant of
/// their own; everyone else belongs to exactly one tenant.
///
/// Invariant: `role == SuperAdmin` if and only if `tenant_id` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Unique system-wide
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: String,
    pub role: UserRole,
    pub tenant_id: Option<TenantId>,
    pub status: UserStatus,
    pub failed_login_count: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_super_admin(&self) -> bool {
        self.role == UserRole::SuperAdmin
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }

    /// Checks the super-admin/tenant disjointness invariant.
    pub fn tenant_binding_is_valid(&self) -> bool {
        self.is_super_admin() == self.tenant_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    SuperAdmin,
    Admin,
    Manager,
    Agent,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Agent => "agent",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "super_admin" => Some(Self::SuperAdmin),
            "admin" => Some(Self::Admin),
            "manager" => Some(Self::Manager),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Server-side session backing the opaque session cookie. Only the SHA-256
/// hash of the token is persisted.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub token_hash: String,
    pub csrf_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// =============================================================================
// Customer & Vehicle
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerKind {
    Individual,
    Company,
}

impl CustomerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Company => "company",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "individual" => Some(Self::Individual),
            "company" => Some(Self::Company),
            _ => None,
        }
    }
}

/// A policy holder: a person or company owning zero or more vehicles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub tenant_id: TenantId,
    pub kind: CustomerKind,
    pub display_name: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Vehicle types common in the Tanzanian fleet market. The set is
/// data-driven: unknown values round-trip through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Motorcycle,
    /// Three-wheeler
    Bajaji,
    Car,
    #[serde(untagged)]
    Other(String),
}

impl VehicleType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Motorcycle => "motorcycle",
            Self::Bajaji => "bajaji",
            Self::Car => "car",
            Self::Other(s) => s.as_str(),
        }
    }

    pub fn parse_str(s: &str) -> Self {
        match s {
            "motorcycle" => Self::Motorcycle,
            "bajaji" => Self::Bajaji,
            "car" => Self::Car,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Active,
    Suspended,
    Retired,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Retired => "retired",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

/// The root compliance aggregate. Policies, permits and ownership rows all
/// reference a vehicle; the vehicle itself owns nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub tenant_id: TenantId,
    /// Unique within the tenant
    pub registration_plate: String,
    pub chassis_number: Option<String>,
    pub engine_number: Option<String>,
    pub vehicle_type: VehicleType,
    pub usage_category: Option<String>,
    pub status: VehicleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Ownership link between a vehicle and a customer. The current owner is the
/// single row with `to_ts IS NULL`; transfers close that row and insert a new
/// one, so prior ownership is retained immutably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ownership {
    pub id: OwnershipId,
    pub tenant_id: TenantId,
    pub vehicle_id: VehicleId,
    pub customer_id: CustomerId,
    pub from_ts: DateTime<Utc>,
    pub to_ts: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Ownership {
    pub fn is_current(&self) -> bool {
        self.to_ts.is_none()
    }
}

// =============================================================================
// Compliance records: Policy & Permit
// =============================================================================

/// An insurance coverage record with a time window and an activation
/// lifecycle. At most one policy per vehicle is active at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub tenant_id: TenantId,
    pub vehicle_id: VehicleId,
    /// Generated at creation, unique within the tenant
    pub policy_number: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub premium_amount: Decimal,
    pub status: RecordStatus,
    pub activated_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<UserId>,
    pub cancellation_reason: Option<PolicyCancellationReason>,
    pub cancellation_note: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Policy {
    /// Once a policy leaves the mutable states, every attribute other than
    /// the lifecycle-closure fields is frozen.
    pub fn is_immutable(&self) -> bool {
        !self.status.is_mutable()
    }

    /// Activation requires the verified payment ledger to cover the premium.
    pub fn is_fully_paid(&self, total_verified: Decimal) -> bool {
        total_verified >= self.premium_amount
    }

    pub fn active_window(&self) -> Option<ActiveWindow> {
        ActiveWindow::reconstruct(self.status, self.activated_at, self.cancelled_at, self.end_date)
    }

    pub fn is_active_at(&self, t: DateTime<Utc>) -> bool {
        self.active_window().is_some_and(|w| w.contains(t))
    }

    /// Whether the policy provides cover on the given day. Differs from
    /// `is_active_at` for future-dated activations: an active policy is not
    /// in force before its start_date.
    pub fn in_force_on(&self, day: NaiveDate) -> bool {
        crate::lifecycle::in_force_on(
            self.status,
            self.activated_at,
            self.cancelled_at,
            self.start_date,
            self.end_date,
            day,
        )
    }
}

/// A regulatory authorization with a time window (LATRA license, route
/// permit, PSV badge, inspection certificate, ...). `permit_type` is a
/// data-driven string; LATRA registrations are permits with
/// `permit_type = "latra_license"` and receive no special treatment here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permit {
    pub id: PermitId,
    pub tenant_id: TenantId,
    pub vehicle_id: VehicleId,
    pub permit_type: String,
    pub reference_number: String,
    pub issuing_authority: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: RecordStatus,
    pub activated_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<UserId>,
    pub cancellation_reason: Option<PermitCancellationReason>,
    pub cancellation_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

pub const PERMIT_TYPE_LATRA: &str = "latra_license";

impl Permit {
    pub fn is_immutable(&self) -> bool {
        !self.status.is_mutable()
    }

    pub fn active_window(&self) -> Option<ActiveWindow> {
        ActiveWindow::reconstruct(self.status, self.activated_at, self.cancelled_at, self.end_date)
    }

    pub fn is_active_at(&self, t: DateTime<Utc>) -> bool {
        self.active_window().is_some_and(|w| w.contains(t))
    }

    pub fn in_force_on(&self, day: NaiveDate) -> bool {
        crate::lifecycle::in_force_on(
            self.status,
            self.activated_at,
            self.cancelled_at,
            self.start_date,
            self.end_date,
            day,
        )
    }
}

/// A permit-type catalog entry. Tenants configure which permit types exist
/// and which are required for compliance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermitTypeEntry {
    pub tenant_id: TenantId,
    pub name: String,
    pub is_active: bool,
}

// =============================================================================
// Payments
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    MobileMoney,
    Check,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::BankTransfer => "bank_transfer",
            Self::MobileMoney => "mobile_money",
            Self::Check => "check",
            Self::Card => "card",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(Self::Cash),
            "bank_transfer" => Some(Self::BankTransfer),
            "mobile_money" => Some(Self::MobileMoney),
            "check" => Some(Self::Check),
            "card" => Some(Self::Card),
            _ => None,
        }
    }
}

/// A ledger entry against a policy. Partial payments are permitted; only
/// verified payments count toward activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub tenant_id: TenantId,
    pub policy_id: PolicyId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference_number: String,
    pub received_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verified_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }
}

// =============================================================================
// Dynamic fields
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldEntityKind {
    Customer,
    Vehicle,
    Policy,
}

impl FieldEntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Vehicle => "vehicle",
            Self::Policy => "policy",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(Self::Customer),
            "vehicle" => Some(Self::Vehicle),
            "policy" => Some(Self::Policy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDataType {
    Text,
    Number,
    Date,
    Boolean,
    Choice,
}

impl FieldDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Boolean => "boolean",
            Self::Choice => "choice",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "number" => Some(Self::Number),
            "date" => Some(Self::Date),
            "boolean" => Some(Self::Boolean),
            "choice" => Some(Self::Choice),
            _ => None,
        }
    }
}

/// A per-tenant custom field definition for customers, vehicles or policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: FieldDefinitionId,
    pub tenant_id: TenantId,
    pub entity_kind: FieldEntityKind,
    /// Machine key, unique per (tenant, entity kind)
    pub key: String,
    /// Human-readable label
    pub name: String,
    pub data_type: FieldDataType,
    /// Allowed values when data_type = choice
    pub choices: Vec<String>,
    pub required: bool,
    pub display_order: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A typed value; exactly one wire shape per data type so values stay
/// queryable and indexable in their own columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValueData {
    Text(String),
    Number(Decimal),
    Date(NaiveDate),
    Boolean(bool),
    Choice(String),
}

impl FieldValueData {
    pub fn data_type(&self) -> FieldDataType {
        match self {
            Self::Text(_) => FieldDataType::Text,
            Self::Number(_) => FieldDataType::Number,
            Self::Date(_) => FieldDataType::Date,
            Self::Boolean(_) => FieldDataType::Boolean,
            Self::Choice(_) => FieldDataType::Choice,
        }
    }
}

pub const MAX_TEXT_VALUE_LEN: usize = 1024;

/// Validate a value against its definition: shape must match the declared
/// data type, text is bounded, choices must be from the definition's list.
pub fn validate_field_value(definition: &FieldDefinition, value: &FieldValueData) -> crate::Result<()> {
    use crate::BimaError;

    if value.data_type() != definition.data_type {
        return Err(BimaError::validation(
            definition.key.clone(),
            format!(
                "expected {} value, got {}",
                definition.data_type.as_str(),
                value.data_type().as_str()
            ),
        ));
    }
    match value {
        FieldValueData::Text(s) if s.len() > MAX_TEXT_VALUE_LEN => Err(BimaError::validation(
            definition.key.clone(),
            format!("text exceeds {MAX_TEXT_VALUE_LEN} characters"),
        )),
        FieldValueData::Choice(c) if !definition.choices.iter().any(|o| o == c) => {
            Err(BimaError::validation(
                definition.key.clone(),
                format!("'{c}' is not one of the defined choices"),
            ))
        }
        _ => Ok(()),
    }
}

/// A stored value for one (definition, entity) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValue {
    pub id: FieldValueId,
    pub tenant_id: TenantId,
    pub definition_id: FieldDefinitionId,
    pub entity_kind: FieldEntityKind,
    pub entity_id: uuid::Uuid,
    pub value: FieldValueData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Audit & History
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Tenant,
    User,
    Customer,
    Vehicle,
    Ownership,
    Policy,
    Permit,
    Payment,
    FieldDefinition,
    FieldValue,
    Notification,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::User => "user",
            Self::Customer => "customer",
            Self::Vehicle => "vehicle",
            Self::Ownership => "ownership",
            Self::Policy => "policy",
            Self::Permit => "permit",
            Self::Payment => "payment",
            Self::FieldDefinition => "field_definition",
            Self::FieldValue => "field_value",
            Self::Notification => "notification",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "tenant" => Some(Self::Tenant),
            "user" => Some(Self::User),
            "customer" => Some(Self::Customer),
            "vehicle" => Some(Self::Vehicle),
            "ownership" => Some(Self::Ownership),
            "policy" => Some(Self::Policy),
            "permit" => Some(Self::Permit),
            "payment" => Some(Self::Payment),
            "field_definition" => Some(Self::FieldDefinition),
            "field_value" => Some(Self::FieldValue),
            "notification" => Some(Self::Notification),
            _ => None,
        }
    }

    /// Business data that super admins are forbidden from writing.
    pub fn is_business_data(&self) -> bool {
        matches!(
            self,
            Self::Customer
                | Self::Vehicle
                | Self::Ownership
                | Self::Policy
                | Self::Permit
                | Self::Payment
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    SoftDelete,
    Transition,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::SoftDelete => "soft_delete",
            Self::Transition => "transition",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "soft_delete" => Some(Self::SoftDelete),
            "transition" => Some(Self::Transition),
            _ => None,
        }
    }
}

/// Rejected outcomes are recorded too, so permission and overlap abuse
/// patterns stay observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Applied,
    Rejected,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "applied" => Some(Self::Applied),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Immutable record of a mutation (or a rejected attempt). Append-only; the
/// repository layer exposes no update or delete for audit rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub tenant_id: TenantId,
    /// None for system actors (the reconciler)
    pub actor_user_id: Option<UserId>,
    pub at_ts: DateTime<Utc>,
    pub entity_kind: EntityKind,
    pub entity_id: uuid::Uuid,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub reason: Option<String>,
}

/// Full snapshot of an entity after a mutation; supports time-travel
/// queries ("what did this policy look like on date D").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: HistoryRecordId,
    pub tenant_id: TenantId,
    pub entity_kind: EntityKind,
    pub entity_id: uuid::Uuid,
    pub recorded_at: DateTime<Utc>,
    pub snapshot: serde_json::Value,
}

// =============================================================================
// Notifications
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ExpiryReminder,
    Cancellation,
    PaymentVerification,
    ComplianceAlert,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExpiryReminder => "expiry_reminder",
            Self::Cancellation => "cancellation",
            Self::PaymentVerification => "payment_verification",
            Self::ComplianceAlert => "compliance_alert",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "expiry_reminder" => Some(Self::ExpiryReminder),
            "cancellation" => Some(Self::Cancellation),
            "payment_verification" => Some(Self::PaymentVerification),
            "compliance_alert" => Some(Self::ComplianceAlert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// An in-app notification row. The core only records intent; delivery
/// adapters (email/SMS) are external and read this buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub title: String,
    pub payload: serde_json::Value,
    /// Subject entity, when the notification concerns one
    pub entity_id: Option<uuid::Uuid>,
    /// Reconciler dedupe key component; one reminder per entity per cycle day
    pub cycle_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn policy_with(status: RecordStatus) -> Policy {
        Policy {
            id: PolicyId::new(),
            tenant_id: TenantId::new(),
            vehicle_id: VehicleId::new(),
            policy_number: "POL-2025-ACME-00001".into(),
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            premium_amount: Decimal::new(1_000_000, 0),
            status,
            activated_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            cancellation_note: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_immutability_follows_status() {
        assert!(!policy_with(RecordStatus::Draft).is_immutable());
        assert!(!policy_with(RecordStatus::PendingPayment).is_immutable());
        assert!(policy_with(RecordStatus::Active).is_immutable());
        assert!(policy_with(RecordStatus::Cancelled).is_immutable());
        assert!(policy_with(RecordStatus::Expired).is_immutable());
    }

    #[test]
    fn test_fully_paid_compares_against_premium() {
        let policy = policy_with(RecordStatus::PendingPayment);
        assert!(!policy.is_fully_paid(Decimal::new(500_000, 0)));
        assert!(policy.is_fully_paid(Decimal::new(1_000_000, 0)));
        assert!(policy.is_fully_paid(Decimal::new(1_500_000, 0)));
    }

    #[test]
    fn test_vehicle_type_roundtrips_unknown_values() {
        assert_eq!(VehicleType::parse_str("bajaji"), VehicleType::Bajaji);
        let truck = VehicleType::parse_str("truck");
        assert_eq!(truck.as_str(), "truck");
        assert!(matches!(truck, VehicleType::Other(_)));
    }

    #[test]
    fn test_super_admin_tenant_disjointness() {
        let mut user = User {
            id: UserId::new(),
            email: "root@bima.example".into(),
            password_hash: String::new(),
            display_name: "Root".into(),
            role: UserRole::SuperAdmin,
            tenant_id: None,
            status: UserStatus::Active,
            failed_login_count: 0,
            locked_until: None,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };
        assert!(user.tenant_binding_is_valid());

        user.tenant_id = Some(TenantId::new());
        assert!(!user.tenant_binding_is_valid());

        user.role = UserRole::Agent;
        assert!(user.tenant_binding_is_valid());
    }

    #[test]
    fn test_field_value_validation() {
        let definition = FieldDefinition {
            id: FieldDefinitionId::new(),
            tenant_id: TenantId::new(),
            entity_kind: FieldEntityKind::Customer,
            key: "agent_region".into(),
            name: "Agent Region".into(),
            data_type: FieldDataType::Choice,
            choices: vec!["North".into(), "South".into()],
            required: true,
            display_order: 0,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };

        assert!(validate_field_value(
            &definition,
            &FieldValueData::Choice("North".into())
        )
        .is_ok());
        assert!(validate_field_value(
            &definition,
            &FieldValueData::Choice("East".into())
        )
        .is_err());
        // Wrong shape for the declared type
        assert!(
            validate_field_value(&definition, &FieldValueData::Text("North".into())).is_err()
        );
    }

    #[test]
    fn test_text_value_length_bound() {
        let definition = FieldDefinition {
            id: FieldDefinitionId::new(),
            tenant_id: TenantId::new(),
            entity_kind: FieldEntityKind::Vehicle,
            key: "remarks".into(),
            name: "Remarks".into(),
            data_type: FieldDataType::Text,
            choices: vec![],
            required: false,
            display_order: 0,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };

        let ok = "x".repeat(MAX_TEXT_VALUE_LEN);
        let too_long = "x".repeat(MAX_TEXT_VALUE_LEN + 1);
        assert!(validate_field_value(&definition, &FieldValueData::Text(ok)).is_ok());
        assert!(validate_field_value(&definition, &FieldValueData::Text(too_long)).is_err());
    }
}
