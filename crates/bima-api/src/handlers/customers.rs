//! Customer handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;

use bima_core::authz::{self, Operation};
use bima_core::{
    validate_field_value, Customer, CustomerFilter, CustomerId, CustomerKind, CustomerRepository,
    DynamicFieldRepository, FieldEntityKind, FieldValue, FieldValueId,
};

use crate::dto::{
    api_error, bad_request, validation_failed, ApiResponse, ApiResult, CustomerRequest,
    ErrorResponse, FieldValueRequest, PaginatedResponse, PagedResult,
};
use crate::handlers::parse_id;
use crate::middleware::CurrentUser;
use crate::state::AppState;
use crate::validation::Validator;

#[derive(Debug, serde::Deserialize)]
pub struct CustomerListQuery {
    pub kind: Option<String>,
    pub search: Option<String>,
    /// Dynamic-field equality filter, e.g. `field=agent_region` with
    /// `value=North`
    pub field: Option<String>,
    pub value: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

fn validate_request(request: &CustomerRequest) -> Result<CustomerKind, ErrorResponse> {
    let mut v = Validator::new();
    v.name("display_name", &request.display_name);
    if let Some(email) = &request.contact_email {
        if !email.is_empty() {
            v.email("contact_email", email);
        }
    }
    if let Err(errors) = v.validate() {
        return Err(validation_failed(errors));
    }
    CustomerKind::parse_str(&request.kind)
        .ok_or_else(|| bad_request("kind must be 'individual' or 'company'"))
}

pub async fn create_customer(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<CustomerRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Customer>>), ErrorResponse> {
    authz::authorize(&current.user, Operation::UpsertFleetRecord).map_err(api_error)?;
    let kind = validate_request(&request)?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let now = Utc::now();
    let customer = Customer {
        id: CustomerId::new(),
        tenant_id: scope.id(),
        kind,
        display_name: request.display_name.trim().to_string(),
        contact_email: request.contact_email.filter(|e| !e.is_empty()),
        contact_phone: request.contact_phone.filter(|p| !p.is_empty()),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    let created = state
        .customers
        .save_new(&scope, &customer, current.user.id)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(created)))
}

pub async fn get_customer(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Customer> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let customer_id: CustomerId = parse_id(&id, "customer")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let customer = state
        .customers
        .get_by_id(&scope, customer_id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(customer))
}

pub async fn list_customers(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<CustomerListQuery>,
) -> PagedResult<Customer> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let kind = match query.kind.as_deref() {
        Some(raw) => Some(
            CustomerKind::parse_str(raw)
                .ok_or_else(|| bad_request("kind must be 'individual' or 'company'"))?,
        ),
        None => None,
    };

    // Typed dynamic-field filter: the definition's data type drives parsing
    let field = match (&query.field, &query.value) {
        (Some(key), Some(raw)) => {
            let definition = state
                .dynamic_fields
                .find_definition_by_key(&scope, FieldEntityKind::Customer, key)
                .await
                .map_err(api_error)?
                .ok_or_else(|| bad_request("unknown custom field"))?;
            let value = crate::handlers::dynamic_fields::parse_typed_value(&definition, raw)?;
            Some((key.clone(), value))
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err(bad_request("field filters need both 'field' and 'value'"))
        }
        (None, None) => None,
    };

    let filter = CustomerFilter {
        kind,
        search: query.search.filter(|s| !s.trim().is_empty()),
        field,
    };
    let page = bima_core::Page::new(query.page.unwrap_or(1), query.page_size.unwrap_or(50));
    let customers = state
        .customers
        .list(&scope, &filter, page)
        .await
        .map_err(api_error)?;
    Ok(PaginatedResponse::new(customers, page))
}

pub async fn update_customer(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<CustomerRequest>,
) -> ApiResult<Customer> {
    authz::authorize(&current.user, Operation::UpsertFleetRecord).map_err(api_error)?;
    let customer_id: CustomerId = parse_id(&id, "customer")?;
    let kind = validate_request(&request)?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let existing = state
        .customers
        .get_by_id(&scope, customer_id)
        .await
        .map_err(api_error)?;
    let updated = Customer {
        kind,
        display_name: request.display_name.trim().to_string(),
        contact_email: request.contact_email.filter(|e| !e.is_empty()),
        contact_phone: request.contact_phone.filter(|p| !p.is_empty()),
        ..existing
    };

    let saved = state
        .customers
        .update(&scope, &updated, current.user.id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(saved))
}

pub async fn delete_customer(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ErrorResponse> {
    authz::authorize(&current.user, Operation::UpsertFleetRecord).map_err(api_error)?;
    let customer_id: CustomerId = parse_id(&id, "customer")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    state
        .customers
        .soft_delete(&scope, customer_id, current.user.id)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Set a custom field value on a customer.
pub async fn set_field_value(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<FieldValueRequest>,
) -> ApiResult<FieldValue> {
    authz::authorize(&current.user, Operation::UpsertFleetRecord).map_err(api_error)?;
    let customer_id: CustomerId = parse_id(&id, "customer")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    // Entity must exist in this tenant
    state
        .customers
        .get_by_id(&scope, customer_id)
        .await
        .map_err(api_error)?;

    let definition = state
        .dynamic_fields
        .find_definition_by_key(&scope, FieldEntityKind::Customer, &request.key)
        .await
        .map_err(api_error)?
        .ok_or_else(|| bad_request("unknown custom field"))?;
    if !definition.is_active {
        return Err(bad_request("field definition is deactivated"));
    }
    validate_field_value(&definition, &request.value).map_err(api_error)?;

    let now = Utc::now();
    let value = FieldValue {
        id: FieldValueId::new(),
        tenant_id: scope.id(),
        definition_id: definition.id,
        entity_kind: FieldEntityKind::Customer,
        entity_id: *customer_id.as_uuid(),
        value: request.value,
        created_at: now,
        updated_at: now,
    };

    let saved = state
        .dynamic_fields
        .upsert_value(&scope, &value, current.user.id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(saved))
}

/// All custom field values on a customer.
pub async fn list_field_values(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Vec<FieldValue>> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let customer_id: CustomerId = parse_id(&id, "customer")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let values = state
        .dynamic_fields
        .values_for_entity(&scope, FieldEntityKind::Customer, *customer_id.as_uuid())
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(values))
}
