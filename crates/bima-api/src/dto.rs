//! Request/response shapes and the domain-error-to-HTTP mapping

use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bima_core::BimaError;

use crate::validation::ValidationError;

// =============================================================================
// Envelope
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, page: bima_core::Page) -> Json<Self> {
        let has_more = items.len() as u32 == page.page_size;
        Json(Self {
            items,
            page: page.page,
            page_size: page.page_size,
            has_more,
        })
    }
}

pub type ErrorResponse = (StatusCode, Json<ApiResponse<()>>);
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ErrorResponse>;
pub type PagedResult<T> = Result<Json<PaginatedResponse<T>>, ErrorResponse>;

/// Map a domain error onto status code + envelope. Stable error codes come
/// straight from the error kind names.
pub fn api_error(err: BimaError) -> ErrorResponse {
    let (status, code) = match &err {
        BimaError::TenantUnbound { .. } => (StatusCode::BAD_REQUEST, "tenant_unbound"),
        BimaError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
        BimaError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        BimaError::Validation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
        BimaError::Immutable => (StatusCode::CONFLICT, "immutable"),
        BimaError::Overlap => (StatusCode::CONFLICT, "overlap"),
        BimaError::PaymentIncomplete { .. } => (StatusCode::CONFLICT, "payment_incomplete"),
        BimaError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        BimaError::Locked { .. } => (StatusCode::LOCKED, "locked"),
        BimaError::Conflict => (StatusCode::CONFLICT, "conflict"),
        BimaError::Auth { .. } => (StatusCode::UNAUTHORIZED, "auth_failed"),
        BimaError::Database { .. } | BimaError::Internal { .. } | BimaError::Config { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        }
    };

    // Internal detail stays in the logs, not in responses
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "Request failed");
        "Internal error".to_string()
    } else {
        err.to_string()
    };

    (
        status,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message,
                details: None,
            }),
        }),
    )
}

/// 422 carrying the collected field errors.
pub fn validation_failed(errors: Vec<ValidationError>) -> ErrorResponse {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code: "validation".to_string(),
                message: "Input validation failed".to_string(),
                details: serde_json::to_value(errors).ok(),
            }),
        }),
    )
}

pub fn bad_request(message: &str) -> ErrorResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code: "bad_request".to_string(),
                message: message.to_string(),
                details: None,
            }),
        }),
    )
}

// =============================================================================
// Auth
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: bima_core::User,
    /// Echo of the CSRF token bound to the fresh session; clients send it
    /// back in X-CSRF-Token on mutating requests
    pub csrf_token: String,
}

// =============================================================================
// Platform administration
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub slug: String,
    pub contact_email: String,
    pub settings: Option<TenantSettingsDto>,
    /// Bootstrap admin for the new tenant
    pub admin_email: String,
    pub admin_display_name: String,
    pub admin_password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTenantRequest {
    pub name: Option<String>,
    pub status: Option<String>,
    pub contact_email: Option<String>,
    pub settings: Option<TenantSettingsDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantSettingsDto {
    pub expiry_reminder_days: Option<i64>,
    pub fleet_policies_enabled: Option<bool>,
    pub required_permit_types: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ResetAdminPasswordRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ResetAdminPasswordResponse {
    pub user_id: String,
    /// Shown exactly once
    pub temporary_password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub role: String,
}

// =============================================================================
// Fleet
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CustomerRequest {
    pub kind: String,
    pub display_name: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VehicleRequest {
    pub registration_plate: String,
    pub chassis_number: Option<String>,
    pub engine_number: Option<String>,
    pub vehicle_type: String,
    pub usage_category: Option<String>,
    pub status: Option<String>,
    pub owner_customer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferOwnershipRequest {
    pub customer_id: String,
}

// =============================================================================
// Compliance records
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreatePolicyRequest {
    pub vehicle_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub premium_amount: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditPolicyRequest {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub premium_amount: Option<Decimal>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenewPolicyRequest {
    pub end_date: NaiveDate,
    pub premium_amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub amount: Decimal,
    pub method: String,
    pub reference_number: String,
    /// Record-and-verify in one step (admin/manager counter workflow)
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct RecordPaymentResponse {
    pub payment: bima_core::Payment,
    /// Present when full payment auto-activated the policy
    pub activated_policy: Option<bima_core::Policy>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePermitRequest {
    pub vehicle_id: String,
    pub permit_type: String,
    pub reference_number: String,
    pub issuing_authority: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct EditPermitRequest {
    pub reference_number: Option<String>,
    pub issuing_authority: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

// =============================================================================
// Dynamic fields
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct FieldDefinitionRequest {
    pub entity_kind: String,
    pub key: String,
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFieldDefinitionRequest {
    pub name: Option<String>,
    pub choices: Option<Vec<String>>,
    pub required: Option<bool>,
    pub display_order: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct FieldValueRequest {
    pub key: String,
    pub value: bima_core::FieldValueData,
}

// =============================================================================
// Queries
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageQuery {
    pub fn to_page(&self) -> bima_core::Page {
        bima_core::Page::new(self.page.unwrap_or(1), self.page_size.unwrap_or(50))
    }
}

#[derive(Debug, Deserialize)]
pub struct ComplianceQuery {
    pub as_of: Option<NaiveDate>,
    pub risk_window: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RecordListQuery {
    pub status: Option<String>,
    pub vehicle_id: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}
