//! Permit handlers (LATRA licenses, route permits, PSV badges, ...)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;

use bima_core::authz::{self, Operation};
use bima_core::{
    Permit, PermitCancellationReason, PermitId, PermitRepository, PermitTypeEntry, RecordFilter,
    RecordStatus, VehicleId, VehicleRepository,
};
use bima_engine::PermitPatch;

use crate::dto::{
    api_error, bad_request, validation_failed, ApiResponse, ApiResult, CancelRequest,
    CreatePermitRequest, EditPermitRequest, ErrorResponse, PaginatedResponse, PagedResult,
    RecordListQuery,
};
use crate::handlers::parse_id;
use crate::middleware::CurrentUser;
use crate::state::AppState;
use crate::validation::Validator;

#[derive(Debug, serde::Deserialize)]
pub struct PermitTypeRequest {
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

pub async fn create_permit(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<CreatePermitRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Permit>>), ErrorResponse> {
    authz::authorize(&current.user, Operation::CreateDraftRecord).map_err(api_error)?;

    let mut v = Validator::new();
    v.required("permit_type", &request.permit_type)
        .required("reference_number", &request.reference_number)
        .date_window("end_date", request.start_date, request.end_date);
    if let Err(errors) = v.validate() {
        return Err(validation_failed(errors));
    }

    let vehicle_id: VehicleId = parse_id(&request.vehicle_id, "vehicle")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    state
        .vehicles
        .get_by_id(&scope, vehicle_id)
        .await
        .map_err(api_error)?;

    let now = Utc::now();
    let permit = Permit {
        id: PermitId::new(),
        tenant_id: scope.id(),
        vehicle_id,
        permit_type: request.permit_type.trim().to_string(),
        reference_number: request.reference_number.trim().to_string(),
        issuing_authority: request
            .issuing_authority
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| "LATRA".to_string()),
        start_date: request.start_date,
        end_date: request.end_date,
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

    let created = state
        .permits
        .save_new(&scope, &permit, current.user.id)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(created)))
}

pub async fn get_permit(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Permit> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let permit_id: PermitId = parse_id(&id, "permit")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let permit = state
        .permits
        .get_by_id(&scope, permit_id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(permit))
}

pub async fn list_permits(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<RecordListQuery>,
) -> PagedResult<Permit> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let status = match query.status.as_deref() {
        Some(raw) => Some(
            RecordStatus::parse_str(raw).ok_or_else(|| bad_request("unknown status value"))?,
        ),
        None => None,
    };
    let vehicle_id = match &query.vehicle_id {
        Some(raw) => Some(parse_id::<VehicleId>(raw, "vehicle")?),
        None => None,
    };

    let filter = RecordFilter {
        status,
        vehicle_id,
        ..Default::default()
    };
    let page = bima_core::Page::new(query.page.unwrap_or(1), query.page_size.unwrap_or(50));
    let permits = state
        .permits
        .list(&scope, &filter, page)
        .await
        .map_err(api_error)?;
    Ok(PaginatedResponse::new(permits, page))
}

pub async fn edit_permit(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<EditPermitRequest>,
) -> ApiResult<Permit> {
    let permit_id: PermitId = parse_id(&id, "permit")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let patch = PermitPatch {
        reference_number: request.reference_number,
        issuing_authority: request.issuing_authority,
        start_date: request.start_date,
        end_date: request.end_date,
    };

    let updated = state
        .engine
        .edit_permit(&scope, &current.user, permit_id, patch)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(updated))
}

/// Soft-delete an unactivated draft permit.
pub async fn delete_permit(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ErrorResponse> {
    authz::authorize(&current.user, Operation::CreateDraftRecord).map_err(api_error)?;
    let permit_id: PermitId = parse_id(&id, "permit")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    state
        .permits
        .soft_delete(&scope, permit_id, current.user.id)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate_permit(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Permit> {
    let permit_id: PermitId = parse_id(&id, "permit")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let today = Utc::now().date_naive();

    let permit = state
        .engine
        .activate_permit(&scope, &current.user, permit_id, today)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(permit))
}

pub async fn cancel_permit(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Permit> {
    let permit_id: PermitId = parse_id(&id, "permit")?;
    let reason = PermitCancellationReason::parse_str(&request.reason)
        .ok_or_else(|| bad_request("unknown cancellation reason"))?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let permit = state
        .engine
        .cancel_permit(&scope, &current.user, permit_id, reason, request.note)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(permit))
}

/// Tenant permit-type catalog.
pub async fn list_permit_types(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Vec<PermitTypeEntry>> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let types = state
        .permits
        .list_permit_types(&scope)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(types))
}

pub async fn upsert_permit_type(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<PermitTypeRequest>,
) -> ApiResult<PermitTypeEntry> {
    // The catalog is tenant configuration, same gate as field definitions
    authz::authorize(&current.user, Operation::DefineDynamicFields).map_err(api_error)?;
    let mut v = Validator::new();
    v.slug("name", &request.name);
    if let Err(errors) = v.validate() {
        return Err(validation_failed(errors));
    }
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let entry = state
        .permits
        .upsert_permit_type(&scope, &request.name, request.is_active)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(entry))
}
