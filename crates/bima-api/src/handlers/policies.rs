//! Policy handlers: drafting, lifecycle transitions, renewal and the
//! payment ledger

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;

use bima_core::authz::{self, Operation};
use bima_core::{
    Payment, PaymentMethod, PaymentRepository, Policy, PolicyCancellationReason, PolicyId,
    PolicyRepository, RecordFilter, RecordStatus, VehicleId, VehicleRepository,
};
use bima_engine::PolicyPatch;

use crate::dto::{
    api_error, bad_request, validation_failed, ApiResponse, ApiResult, CancelRequest,
    CreatePolicyRequest, EditPolicyRequest, ErrorResponse, PaginatedResponse, PagedResult,
    RecordListQuery, RecordPaymentRequest, RecordPaymentResponse, RenewPolicyRequest,
};
use crate::handlers::parse_id;
use crate::middleware::CurrentUser;
use crate::state::AppState;
use crate::validation::Validator;

/// Create a draft policy. The policy number is generated at creation and
/// the record starts in `pending_payment` (counter workflow: drafts are
/// priced immediately).
pub async fn create_policy(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<CreatePolicyRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Policy>>), ErrorResponse> {
    authz::authorize(&current.user, Operation::CreateDraftRecord).map_err(api_error)?;

    let mut v = Validator::new();
    v.date_window("end_date", request.start_date, request.end_date)
        .positive_amount("premium_amount", request.premium_amount);
    if let Err(errors) = v.validate() {
        return Err(validation_failed(errors));
    }

    let vehicle_id: VehicleId = parse_id(&request.vehicle_id, "vehicle")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    // Vehicle must exist in this tenant before cover is drafted on it
    state
        .vehicles
        .get_by_id(&scope, vehicle_id)
        .await
        .map_err(api_error)?;

    let now = Utc::now();
    let policy = Policy {
        id: PolicyId::new(),
        tenant_id: scope.id(),
        vehicle_id,
        policy_number: String::new(),
        start_date: request.start_date,
        end_date: request.end_date,
        premium_amount: request.premium_amount,
        status: RecordStatus::PendingPayment,
        activated_at: None,
        cancelled_at: None,
        cancelled_by: None,
        cancellation_reason: None,
        cancellation_note: None,
        notes: request.notes.filter(|n| !n.trim().is_empty()),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    let created = state
        .policies
        .save_new(&scope, &policy, current.user.id)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(created)))
}

pub async fn get_policy(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Policy> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let policy_id: PolicyId = parse_id(&id, "policy")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let policy = state
        .policies
        .get_by_id(&scope, policy_id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(policy))
}

pub async fn list_policies(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<RecordListQuery>,
) -> PagedResult<Policy> {
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
    let policies = state
        .policies
        .list(&scope, &filter, page)
        .await
        .map_err(api_error)?;
    Ok(PaginatedResponse::new(policies, page))
}

/// Edit a draft/pending policy. Immutable states are rejected by the
/// engine.
pub async fn edit_policy(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<EditPolicyRequest>,
) -> ApiResult<Policy> {
    let policy_id: PolicyId = parse_id(&id, "policy")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let patch = PolicyPatch {
        start_date: request.start_date,
        end_date: request.end_date,
        premium_amount: request.premium_amount,
        notes: request.notes.map(|n| {
            let trimmed = n.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        }),
    };

    let updated = state
        .engine
        .edit_policy(&scope, &current.user, policy_id, patch)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(updated))
}

/// Soft-delete an unactivated draft; historical records stay.
pub async fn delete_policy(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ErrorResponse> {
    authz::authorize(&current.user, Operation::CreateDraftRecord).map_err(api_error)?;
    let policy_id: PolicyId = parse_id(&id, "policy")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    state
        .policies
        .soft_delete(&scope, policy_id, current.user.id)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Move a draft into `pending_payment`.
pub async fn submit_policy(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Policy> {
    let policy_id: PolicyId = parse_id(&id, "policy")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let policy = state
        .engine
        .submit_policy_for_payment(&scope, &current.user, policy_id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(policy))
}

pub async fn activate_policy(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Policy> {
    let policy_id: PolicyId = parse_id(&id, "policy")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let today = Utc::now().date_naive();

    let policy = state
        .engine
        .activate_policy(&scope, &current.user, policy_id, today)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(policy))
}

pub async fn cancel_policy(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Policy> {
    let policy_id: PolicyId = parse_id(&id, "policy")?;
    let reason = PolicyCancellationReason::parse_str(&request.reason)
        .ok_or_else(|| bad_request("unknown cancellation reason"))?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let policy = state
        .engine
        .cancel_policy(&scope, &current.user, policy_id, reason, request.note)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(policy))
}

/// Renew: successor starting the day after this policy ends.
pub async fn renew_policy(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<RenewPolicyRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Policy>>), ErrorResponse> {
    let policy_id: PolicyId = parse_id(&id, "policy")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let successor = state
        .engine
        .renew_policy(
            &scope,
            &current.user,
            policy_id,
            request.end_date,
            request.premium_amount,
        )
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(successor)))
}

/// Record a payment; with `verified: true` (admin/manager) the ledger entry
/// is verified immediately and the policy activates once fully covered.
pub async fn record_payment(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RecordPaymentResponse>>), ErrorResponse> {
    let policy_id: PolicyId = parse_id(&id, "policy")?;
    let method = PaymentMethod::parse_str(&request.method)
        .ok_or_else(|| bad_request("unknown payment method"))?;

    let mut v = Validator::new();
    v.positive_amount("amount", request.amount)
        .required("reference_number", &request.reference_number);
    if let Err(errors) = v.validate() {
        return Err(validation_failed(errors));
    }

    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let today = Utc::now().date_naive();

    let response = if request.verified {
        let (payment, activated_policy) = state
            .payment_service
            .record_verified_payment(
                &scope,
                &current.user,
                policy_id,
                request.amount,
                method,
                request.reference_number,
                today,
            )
            .await
            .map_err(api_error)?;
        RecordPaymentResponse {
            payment,
            activated_policy,
        }
    } else {
        let payment = state
            .payment_service
            .record_payment(
                &scope,
                &current.user,
                policy_id,
                request.amount,
                method,
                request.reference_number,
            )
            .await
            .map_err(api_error)?;
        RecordPaymentResponse {
            payment,
            activated_policy: None,
        }
    };

    Ok((StatusCode::CREATED, ApiResponse::ok(response)))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path((_policy_id, payment_id)): Path<(String, String)>,
) -> ApiResult<Payment> {
    let payment_id: bima_core::PaymentId = parse_id(&payment_id, "payment")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let payment = state
        .payment_service
        .verify_payment(&scope, &current.user, payment_id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(payment))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Payment>> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let policy_id: PolicyId = parse_id(&id, "policy")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let payments = state
        .payments
        .list_for_policy(&scope, policy_id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(payments))
}
