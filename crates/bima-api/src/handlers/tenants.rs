//! Tenant platform administration (super admin only)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use tracing::{info, warn};

use bima_core::authz::{self, Operation};
use bima_core::{
    SessionRepository, Tenant, TenantId, TenantRepository, TenantSettings, TenantStatus, User,
    UserId, UserRepository, UserRole, UserStatus,
};

use crate::dto::{
    api_error, bad_request, validation_failed, ApiResponse, ApiResult, CreateTenantRequest,
    PageQuery, PaginatedResponse, PagedResult, ResetAdminPasswordRequest,
    ResetAdminPasswordResponse, UpdateTenantRequest,
};
use crate::handlers::parse_id;
use crate::middleware::CurrentUser;
use crate::password;
use crate::state::AppState;
use crate::validation::Validator;

fn apply_settings(base: TenantSettings, dto: Option<crate::dto::TenantSettingsDto>) -> TenantSettings {
    match dto {
        Some(dto) => TenantSettings {
            expiry_reminder_days: dto.expiry_reminder_days.unwrap_or(base.expiry_reminder_days),
            fleet_policies_enabled: dto
                .fleet_policies_enabled
                .unwrap_or(base.fleet_policies_enabled),
            required_permit_types: dto
                .required_permit_types
                .unwrap_or(base.required_permit_types),
        },
        None => base,
    }
}

/// Create a tenant together with its bootstrap admin.
pub async fn create_tenant(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Tenant>>), crate::dto::ErrorResponse> {
    authz::authorize(&current.user, Operation::ManageTenants).map_err(api_error)?;

    let mut v = Validator::new();
    v.name("name", &request.name)
        .slug("slug", &request.slug)
        .email("contact_email", &request.contact_email)
        .email("admin_email", &request.admin_email)
        .name("admin_display_name", &request.admin_display_name)
        .password("admin_password", &request.admin_password);
    if let Err(errors) = v.validate() {
        return Err(validation_failed(errors));
    }

    let now = Utc::now();
    let seed_settings = TenantSettings {
        expiry_reminder_days: state.expiry_reminder_days_default,
        ..TenantSettings::default()
    };
    let tenant = Tenant {
        id: TenantId::new(),
        name: request.name.trim().to_string(),
        slug: request.slug.clone(),
        status: TenantStatus::Active,
        settings: apply_settings(seed_settings, request.settings),
        contact_email: request.contact_email.clone(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    let created = state
        .tenants
        .create(&tenant, current.user.id)
        .await
        .map_err(api_error)?;

    let password_hash = password::hash_password(&request.admin_password)
        .map_err(|e| api_error(bima_core::BimaError::internal(e.to_string())))?;
    let admin = User {
        id: UserId::new(),
        email: request.admin_email.trim().to_lowercase(),
        password_hash,
        display_name: request.admin_display_name.trim().to_string(),
        role: UserRole::Admin,
        tenant_id: Some(created.id),
        status: UserStatus::Active,
        failed_login_count: 0,
        locked_until: None,
        last_login_at: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    state
        .users
        .create(&admin, Some(current.user.id))
        .await
        .map_err(api_error)?;

    info!(tenant = %created.slug, "Tenant created with bootstrap admin");
    Ok((StatusCode::CREATED, ApiResponse::ok(created)))
}

pub async fn get_tenant(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Tenant> {
    authz::authorize(&current.user, Operation::ManageTenants).map_err(api_error)?;
    let tenant_id: TenantId = parse_id(&id, "tenant")?;
    let tenant = state.tenants.get_by_id(tenant_id).await.map_err(api_error)?;
    Ok(ApiResponse::ok(tenant))
}

pub async fn list_tenants(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> PagedResult<Tenant> {
    authz::authorize(&current.user, Operation::ManageTenants).map_err(api_error)?;
    let page = query.to_page();
    let tenants = state.tenants.list(page).await.map_err(api_error)?;
    Ok(PaginatedResponse::new(tenants, page))
}

/// Update settings, contact details or suspension status.
pub async fn update_tenant(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<UpdateTenantRequest>,
) -> ApiResult<Tenant> {
    authz::authorize(&current.user, Operation::ManageTenants).map_err(api_error)?;
    let tenant_id: TenantId = parse_id(&id, "tenant")?;

    let existing = state.tenants.get_by_id(tenant_id).await.map_err(api_error)?;

    let status = match request.status.as_deref() {
        Some(raw) => TenantStatus::parse_str(raw)
            .ok_or_else(|| bad_request("status must be 'active' or 'suspended'"))?,
        None => existing.status,
    };

    let updated = Tenant {
        name: request.name.unwrap_or(existing.name.clone()),
        status,
        contact_email: request.contact_email.unwrap_or(existing.contact_email.clone()),
        settings: apply_settings(existing.settings.clone(), request.settings),
        ..existing
    };

    let saved = state
        .tenants
        .update(&updated, current.user.id)
        .await
        .map_err(api_error)?;
    state.invalidate_tenant(tenant_id).await;

    info!(tenant = %saved.slug, status = saved.status.as_str(), "Tenant updated");
    Ok(ApiResponse::ok(saved))
}

/// Reset a tenant admin's password; returns the one-time temporary
/// password.
pub async fn reset_admin_password(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<ResetAdminPasswordRequest>,
) -> ApiResult<ResetAdminPasswordResponse> {
    authz::authorize(&current.user, Operation::ResetTenantAdminPassword).map_err(api_error)?;
    let tenant_id: TenantId = parse_id(&id, "tenant")?;
    let user_id: UserId = parse_id(&request.user_id, "user")?;

    // The explicit tenant choice is part of the operation's audit trail
    let scope = state
        .bind_named_tenant(&current.user, tenant_id)
        .await
        .map_err(api_error)?;

    let target = state.users.get_by_id(user_id).await.map_err(api_error)?;
    if target.tenant_id != Some(scope.id()) || target.role != UserRole::Admin {
        warn!(actor = %current.user.email, target = %target.email, "Password reset refused");
        return Err(api_error(bima_core::BimaError::not_found("user", user_id)));
    }

    let temporary_password = password::generate_password(24);
    let mut updated = target;
    updated.password_hash = password::hash_password(&temporary_password)
        .map_err(|e| api_error(bima_core::BimaError::internal(e.to_string())))?;
    state
        .users
        .update(&updated, Some(current.user.id))
        .await
        .map_err(api_error)?;
    // Force re-login everywhere
    state
        .sessions
        .delete_for_user(user_id)
        .await
        .map_err(api_error)?;

    info!(target = %updated.email, "Tenant admin password reset");
    Ok(ApiResponse::ok(ResetAdminPasswordResponse {
        user_id: user_id.to_string(),
        temporary_password,
    }))
}
