//! Tenant context binding
//!
//! Every repository operation on tenant-scoped data takes an [`ActiveTenant`]
//! by reference, so an unscoped query is unrepresentable in the type system.
//! The value is immutable once constructed and pins both the tenant id and a
//! resolved snapshot of the tenant row (settings included) for the duration
//! of a request or a reconciler sweep.

use crate::error::{BimaError, Result};
use crate::ids::TenantId;
use crate::models::{Tenant, TenantSettings, User};

#[derive(Debug, Clone)]
pub struct ActiveTenant {
    tenant: Tenant,
}

impl ActiveTenant {
    /// Bind the context for a tenant user. The user's own tenant id is the
    /// only admissible choice and can never be overridden by request input.
    pub fn for_user(user: &User, tenant: &Tenant) -> Result<Self> {
        if user.is_super_admin() {
            return Err(BimaError::tenant_unbound(
                "super admin has no implicit tenant; name one explicitly for a platform operation",
            ));
        }
        match user.tenant_id {
            Some(id) if id == tenant.id => Self::bind(tenant),
            Some(_) => Err(BimaError::internal(
                "tenant snapshot does not match the actor's tenant",
            )),
            None => Err(BimaError::tenant_unbound("actor has no tenant")),
        }
    }

    /// Bind the context for a platform operation where a super admin has
    /// explicitly named the target tenant (tenant lifecycle, settings,
    /// admin password reset). Business-data writes stay forbidden via the
    /// authorization matrix regardless of this binding.
    pub fn for_platform_operation(actor: &User, tenant: &Tenant) -> Result<Self> {
        if !actor.is_super_admin() {
            return Err(BimaError::forbidden("platform operation"));
        }
        // Platform operations may target suspended tenants (e.g. to
        // un-suspend them), so only soft-deletion blocks the binding.
        if tenant.deleted_at.is_some() {
            return Err(BimaError::not_found("tenant", tenant.id));
        }
        Ok(Self {
            tenant: tenant.clone(),
        })
    }

    /// Bind the context for a system task (the reconciler) sweeping a
    /// tenant. No user actor is involved.
    pub fn for_background(tenant: &Tenant) -> Result<Self> {
        Self::bind(tenant)
    }

    fn bind(tenant: &Tenant) -> Result<Self> {
        if !tenant.is_active() {
            return Err(BimaError::tenant_unbound(format!(
                "tenant '{}' is not active",
                tenant.slug
            )));
        }
        Ok(Self {
            tenant: tenant.clone(),
        })
    }

    pub fn id(&self) -> TenantId {
        self.tenant.id
    }

    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    pub fn settings(&self) -> &TenantSettings {
        &self.tenant.settings
    }

    pub fn slug(&self) -> &str {
        &self.tenant.slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TenantStatus, UserRole, UserStatus};
    use chrono::Utc;

    fn tenant(status: TenantStatus) -> Tenant {
        Tenant {
            id: TenantId::new(),
            name: "Acme Insurance".into(),
            slug: "acme".into(),
            status,
            settings: TenantSettings::default(),
            contact_email: "ops@acme.example".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn user(role: UserRole, tenant_id: Option<TenantId>) -> User {
        User {
            id: crate::UserId::new(),
            email: "someone@acme.example".into(),
            password_hash: String::new(),
            display_name: "Someone".into(),
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
    fn test_tenant_user_binds_own_tenant() {
        let t = tenant(TenantStatus::Active);
        let u = user(UserRole::Agent, Some(t.id));
        let scope = ActiveTenant::for_user(&u, &t).unwrap();
        assert_eq!(scope.id(), t.id);
    }

    #[test]
    fn test_tenant_user_cannot_bind_foreign_tenant() {
        let t = tenant(TenantStatus::Active);
        let u = user(UserRole::Admin, Some(TenantId::new()));
        assert!(ActiveTenant::for_user(&u, &t).is_err());
    }

    #[test]
    fn test_super_admin_has_no_implicit_tenant() {
        let t = tenant(TenantStatus::Active);
        let u = user(UserRole::SuperAdmin, None);
        let err = ActiveTenant::for_user(&u, &t).unwrap_err();
        assert!(matches!(err, BimaError::TenantUnbound { .. }));
    }

    #[test]
    fn test_suspended_tenant_cannot_bind() {
        let t = tenant(TenantStatus::Suspended);
        let u = user(UserRole::Agent, Some(t.id));
        let err = ActiveTenant::for_user(&u, &t).unwrap_err();
        assert!(matches!(err, BimaError::TenantUnbound { .. }));
        assert!(ActiveTenant::for_background(&t).is_err());
    }

    #[test]
    fn test_platform_operation_requires_super_admin() {
        let t = tenant(TenantStatus::Suspended);
        let admin = user(UserRole::Admin, Some(t.id));
        assert!(ActiveTenant::for_platform_operation(&admin, &t).is_err());

        let root = user(UserRole::SuperAdmin, None);
        // Suspended tenants are still addressable for platform operations
        assert!(ActiveTenant::for_platform_operation(&root, &t).is_ok());
    }
}
