//! Tenant user management

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;

use bima_core::authz::{self, Operation};
use bima_core::{User, UserId, UserRepository, UserRole, UserStatus};

use crate::dto::{
    api_error, bad_request, validation_failed, ApiResponse, CreateUserRequest, ErrorResponse,
    PageQuery, PaginatedResponse, PagedResult,
};
use crate::middleware::CurrentUser;
use crate::password;
use crate::state::AppState;
use crate::validation::Validator;

/// Tenant admins create users within their own tenant. Super admin
/// accounts are never created through this surface.
pub async fn create_user(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiResponse<User>>), ErrorResponse> {
    authz::authorize(&current.user, Operation::ManageTenantUsers).map_err(api_error)?;

    let mut v = Validator::new();
    v.email("email", &request.email)
        .name("display_name", &request.display_name)
        .password("password", &request.password);
    if let Err(errors) = v.validate() {
        return Err(validation_failed(errors));
    }

    let role = UserRole::parse_str(&request.role)
        .filter(|r| *r != UserRole::SuperAdmin)
        .ok_or_else(|| bad_request("role must be admin, manager or agent"))?;

    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let password_hash = password::hash_password(&request.password)
        .map_err(|e| api_error(bima_core::BimaError::internal(e.to_string())))?;
    let now = Utc::now();
    let user = User {
        id: UserId::new(),
        email: request.email.trim().to_lowercase(),
        password_hash,
        display_name: request.display_name.trim().to_string(),
        role,
        tenant_id: Some(scope.id()),
        status: UserStatus::Active,
        failed_login_count: 0,
        locked_until: None,
        last_login_at: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    let created = state
        .users
        .create(&user, Some(current.user.id))
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(created)))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> PagedResult<User> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let page = query.to_page();
    let users = state
        .users
        .list_by_tenant(&scope, page)
        .await
        .map_err(api_error)?;
    Ok(PaginatedResponse::new(users, page))
}
