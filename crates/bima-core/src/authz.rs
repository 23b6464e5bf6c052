//! Role-gated operation checks
//!
//! One table drives every authorization decision. Super admins administer
//! the platform (tenant lifecycle, global templates, tenant-admin password
//! resets) and are forbidden from touching business data; tenant roles form
//! the admin > manager > agent ladder from the operation matrix.

use crate::error::{BimaError, Result};
use crate::models::{User, UserRole, UserStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Create/suspend tenants, edit tenant settings, define global field
    /// templates
    ManageTenants,
    /// Reset a tenant admin's password
    ResetTenantAdminPassword,
    /// Create or update customers and vehicles (incl. ownership transfer)
    UpsertFleetRecord,
    /// Create a draft policy or permit
    CreateDraftRecord,
    /// Record a payment against a policy
    RecordPayment,
    /// Verify a recorded payment
    VerifyPayment,
    /// Activate a policy or permit
    ActivateRecord,
    /// Cancel a policy or permit
    CancelRecord,
    /// Dashboard and report projections
    ViewReports,
    /// Define or deactivate dynamic field definitions and the permit-type
    /// catalog
    DefineDynamicFields,
    /// Create and manage users within the actor's own tenant
    ManageTenantUsers,
    /// Read business data within the actor's own tenant
    ReadBusinessData,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManageTenants => "manage_tenants",
            Self::ResetTenantAdminPassword => "reset_tenant_admin_password",
            Self::UpsertFleetRecord => "upsert_fleet_record",
            Self::CreateDraftRecord => "create_draft_record",
            Self::RecordPayment => "record_payment",
            Self::VerifyPayment => "verify_payment",
            Self::ActivateRecord => "activate_record",
            Self::CancelRecord => "cancel_record",
            Self::ViewReports => "view_reports",
            Self::DefineDynamicFields => "define_dynamic_fields",
            Self::ManageTenantUsers => "manage_tenant_users",
            Self::ReadBusinessData => "read_business_data",
        }
    }

    /// Whether this operation writes customer/vehicle/policy/permit/payment
    /// data. Super-admin attempts at these are security events, not mere
    /// permission misses.
    pub fn touches_business_data(&self) -> bool {
        matches!(
            self,
            Self::UpsertFleetRecord
                | Self::CreateDraftRecord
                | Self::RecordPayment
                | Self::VerifyPayment
                | Self::ActivateRecord
                | Self::CancelRecord
        )
    }

    fn allowed_for(&self, role: UserRole) -> bool {
        use Operation::*;
        use UserRole::*;
        match self {
            ManageTenants | ResetTenantAdminPassword => role == SuperAdmin,
            UpsertFleetRecord | CreateDraftRecord | RecordPayment => {
                matches!(role, Admin | Manager | Agent)
            }
            VerifyPayment | ActivateRecord | CancelRecord => matches!(role, Admin | Manager),
            ViewReports | ReadBusinessData => matches!(role, Admin | Manager | Agent),
            DefineDynamicFields | ManageTenantUsers => role == Admin,
        }
    }
}

/// The outcome of an authorization check, distinguishing a plain permission
/// miss from a super-admin attempt against business data (which callers must
/// log as a security event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    Forbidden,
    SuperAdminBusinessWrite,
}

pub fn check(user: &User, operation: Operation) -> std::result::Result<(), Denial> {
    if user.status != UserStatus::Active {
        return Err(Denial::Forbidden);
    }
    if user.is_super_admin() && operation.touches_business_data() {
        return Err(Denial::SuperAdminBusinessWrite);
    }
    if operation.allowed_for(user.role) {
        Ok(())
    } else {
        Err(Denial::Forbidden)
    }
}

/// Convenience wrapper mapping a denial to the domain error.
pub fn authorize(user: &User, operation: Operation) -> Result<()> {
    check(user, operation).map_err(|_| BimaError::forbidden(operation.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{TenantId, UserId};
    use chrono::Utc;

    fn user(role: UserRole) -> User {
        let tenant_id = (role != UserRole::SuperAdmin).then(TenantId::new);
        User {
            id: UserId::new(),
            email: "u@example.com".into(),
            password_hash: String::new(),
            display_name: "U".into(),
            role,
            tenant_id,
            status: UserStatus::Active,
            failed_login_count: 0,
            locked_until: None,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_role_matrix() {
        use Operation::*;
        use UserRole::*;
        // (operation, super_admin, admin, manager, agent)
        let table = [
            (ManageTenants, true, false, false, false),
            (ResetTenantAdminPassword, true, false, false, false),
            (UpsertFleetRecord, false, true, true, true),
            (CreateDraftRecord, false, true, true, true),
            (RecordPayment, false, true, true, true),
            (VerifyPayment, false, true, true, false),
            (ActivateRecord, false, true, true, false),
            (CancelRecord, false, true, true, false),
            (ViewReports, false, true, true, true),
            (DefineDynamicFields, false, true, false, false),
            (ManageTenantUsers, false, true, false, false),
            (ReadBusinessData, false, true, true, true),
        ];
        for (op, sa, admin, manager, agent) in table {
            for (role, expected) in [
                (SuperAdmin, sa),
                (Admin, admin),
                (Manager, manager),
                (Agent, agent),
            ] {
                assert_eq!(
                    check(&user(role), op).is_ok(),
                    expected,
                    "{op:?} for {role:?}"
                );
            }
        }
    }

    #[test]
    fn test_super_admin_business_write_is_flagged() {
        let root = user(UserRole::SuperAdmin);
        assert_eq!(
            check(&root, Operation::ActivateRecord),
            Err(Denial::SuperAdminBusinessWrite)
        );
        // Reads are a plain denial, not a security event
        assert_eq!(
            check(&root, Operation::ReadBusinessData),
            Err(Denial::Forbidden)
        );
    }

    #[test]
    fn test_disabled_user_is_denied_everything() {
        let mut u = user(UserRole::Admin);
        u.status = UserStatus::Disabled;
        assert!(check(&u, Operation::ReadBusinessData).is_err());
        assert!(authorize(&u, Operation::ViewReports).is_err());
    }
}
