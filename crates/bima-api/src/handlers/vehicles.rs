//! Vehicle handlers: fleet records, ownership transfers and the
//! per-vehicle compliance snapshot

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::Serialize;

use bima_core::authz::{self, Operation};
use bima_core::compliance::ComplianceReport;
use bima_core::{
    CustomerId, Ownership, Permit, Policy, Vehicle, VehicleFilter, VehicleId, VehicleRepository,
    VehicleStatus, VehicleType,
};

use crate::dto::{
    api_error, bad_request, validation_failed, ApiResponse, ApiResult, ComplianceQuery,
    ErrorResponse, PaginatedResponse, PagedResult, TransferOwnershipRequest, VehicleRequest,
};
use crate::handlers::parse_id;
use crate::middleware::CurrentUser;
use crate::state::AppState;
use crate::validation::Validator;

#[derive(Debug, serde::Deserialize)]
pub struct VehicleListQuery {
    pub status: Option<String>,
    pub vehicle_type: Option<String>,
    pub plate: Option<String>,
    pub owner: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct VehicleComplianceResponse {
    pub vehicle_id: String,
    pub as_of: chrono::NaiveDate,
    pub report: ComplianceReport,
    pub active_policy: Option<Policy>,
    pub active_permits: Vec<Permit>,
}

pub async fn create_vehicle(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<VehicleRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Vehicle>>), ErrorResponse> {
    authz::authorize(&current.user, Operation::UpsertFleetRecord).map_err(api_error)?;

    let mut v = Validator::new();
    v.registration_plate("registration_plate", &request.registration_plate);
    if let Err(errors) = v.validate() {
        return Err(validation_failed(errors));
    }
    let status = match request.status.as_deref() {
        Some(raw) => VehicleStatus::parse_str(raw)
            .ok_or_else(|| bad_request("status must be active, suspended or retired"))?,
        None => VehicleStatus::Active,
    };

    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let now = Utc::now();
    let vehicle = Vehicle {
        id: VehicleId::new(),
        tenant_id: scope.id(),
        registration_plate: request.registration_plate.trim().to_string(),
        chassis_number: request.chassis_number.filter(|c| !c.is_empty()),
        engine_number: request.engine_number.filter(|e| !e.is_empty()),
        vehicle_type: VehicleType::parse_str(&request.vehicle_type),
        usage_category: request.usage_category.filter(|u| !u.is_empty()),
        status,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    let created = state
        .vehicles
        .save_new(&scope, &vehicle, current.user.id)
        .await
        .map_err(api_error)?;

    // Optional initial owner
    if let Some(owner_raw) = &request.owner_customer_id {
        let owner: CustomerId = parse_id(owner_raw, "customer")?;
        state
            .vehicles
            .transfer_ownership(&scope, created.id, owner, current.user.id)
            .await
            .map_err(api_error)?;
    }

    Ok((StatusCode::CREATED, ApiResponse::ok(created)))
}

pub async fn get_vehicle(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Vehicle> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let vehicle_id: VehicleId = parse_id(&id, "vehicle")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let vehicle = state
        .vehicles
        .get_by_id(&scope, vehicle_id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(vehicle))
}

pub async fn list_vehicles(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<VehicleListQuery>,
) -> PagedResult<Vehicle> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let status = match query.status.as_deref() {
        Some(raw) => Some(
            VehicleStatus::parse_str(raw)
                .ok_or_else(|| bad_request("status must be active, suspended or retired"))?,
        ),
        None => None,
    };
    let owner = match &query.owner {
        Some(raw) => Some(parse_id::<CustomerId>(raw, "customer")?),
        None => None,
    };

    let filter = VehicleFilter {
        status,
        vehicle_type: query.vehicle_type.as_deref().map(VehicleType::parse_str),
        plate_query: query.plate.filter(|p| !p.trim().is_empty()),
        owner,
    };
    let page = bima_core::Page::new(query.page.unwrap_or(1), query.page_size.unwrap_or(50));
    let vehicles = state
        .vehicles
        .list(&scope, &filter, page)
        .await
        .map_err(api_error)?;
    Ok(PaginatedResponse::new(vehicles, page))
}

pub async fn update_vehicle(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<VehicleRequest>,
) -> ApiResult<Vehicle> {
    authz::authorize(&current.user, Operation::UpsertFleetRecord).map_err(api_error)?;
    let vehicle_id: VehicleId = parse_id(&id, "vehicle")?;

    let mut v = Validator::new();
    v.registration_plate("registration_plate", &request.registration_plate);
    if let Err(errors) = v.validate() {
        return Err(validation_failed(errors));
    }
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let existing = state
        .vehicles
        .get_by_id(&scope, vehicle_id)
        .await
        .map_err(api_error)?;
    let status = match request.status.as_deref() {
        Some(raw) => VehicleStatus::parse_str(raw)
            .ok_or_else(|| bad_request("status must be active, suspended or retired"))?,
        None => existing.status,
    };

    let updated = Vehicle {
        registration_plate: request.registration_plate.trim().to_string(),
        chassis_number: request.chassis_number.filter(|c| !c.is_empty()),
        engine_number: request.engine_number.filter(|e| !e.is_empty()),
        vehicle_type: VehicleType::parse_str(&request.vehicle_type),
        usage_category: request.usage_category.filter(|u| !u.is_empty()),
        status,
        ..existing
    };

    let saved = state
        .vehicles
        .update(&scope, &updated, current.user.id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(saved))
}

pub async fn delete_vehicle(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ErrorResponse> {
    authz::authorize(&current.user, Operation::UpsertFleetRecord).map_err(api_error)?;
    let vehicle_id: VehicleId = parse_id(&id, "vehicle")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    state
        .vehicles
        .soft_delete(&scope, vehicle_id, current.user.id)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Transfer ownership: closes the current ownership row and opens a new
/// one; history stays intact.
pub async fn transfer_ownership(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<TransferOwnershipRequest>,
) -> ApiResult<Ownership> {
    authz::authorize(&current.user, Operation::UpsertFleetRecord).map_err(api_error)?;
    let vehicle_id: VehicleId = parse_id(&id, "vehicle")?;
    let customer_id: CustomerId = parse_id(&request.customer_id, "customer")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let ownership = state
        .vehicles
        .transfer_ownership(&scope, vehicle_id, customer_id, current.user.id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(ownership))
}

pub async fn ownership_history(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Ownership>> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let vehicle_id: VehicleId = parse_id(&id, "vehicle")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let history = state
        .vehicles
        .ownership_history(&scope, vehicle_id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(history))
}

/// Compliance snapshot at `as_of` (default today), including the in-force
/// records backing the verdict.
pub async fn compliance_status(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(query): Query<ComplianceQuery>,
) -> ApiResult<VehicleComplianceResponse> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let vehicle_id: VehicleId = parse_id(&id, "vehicle")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let as_of = query.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let snapshot = state
        .compliance
        .vehicle_status(&scope, vehicle_id, as_of, query.risk_window)
        .await
        .map_err(api_error)?;

    Ok(ApiResponse::ok(VehicleComplianceResponse {
        vehicle_id: vehicle_id.to_string(),
        as_of,
        report: snapshot.report,
        active_policy: snapshot.active_policy,
        active_permits: snapshot.active_permits,
    }))
}
