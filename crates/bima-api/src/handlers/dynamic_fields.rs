//! Dynamic field definition handlers (admin only)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use rust_decimal::Decimal;

use bima_core::authz::{self, Operation};
use bima_core::{
    DynamicFieldRepository, FieldDataType, FieldDefinition, FieldDefinitionId, FieldEntityKind,
    FieldValueData,
};

use crate::dto::{
    api_error, bad_request, validation_failed, ApiResponse, ApiResult, ErrorResponse,
    FieldDefinitionRequest, UpdateFieldDefinitionRequest,
};
use crate::handlers::parse_id;
use crate::middleware::CurrentUser;
use crate::state::AppState;
use crate::validation::Validator;

#[derive(Debug, serde::Deserialize)]
pub struct DefinitionListQuery {
    pub entity_kind: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

/// Parse a raw query-string value into the typed shape a definition
/// expects; used by list filters.
pub(crate) fn parse_typed_value(
    definition: &FieldDefinition,
    raw: &str,
) -> Result<FieldValueData, ErrorResponse> {
    let value = match definition.data_type {
        FieldDataType::Text => FieldValueData::Text(raw.to_string()),
        FieldDataType::Number => FieldValueData::Number(
            raw.parse::<Decimal>()
                .map_err(|_| bad_request("value must be a number"))?,
        ),
        FieldDataType::Date => FieldValueData::Date(
            raw.parse()
                .map_err(|_| bad_request("value must be an ISO-8601 date"))?,
        ),
        FieldDataType::Boolean => FieldValueData::Boolean(match raw {
            "true" => true,
            "false" => false,
            _ => return Err(bad_request("value must be 'true' or 'false'")),
        }),
        FieldDataType::Choice => FieldValueData::Choice(raw.to_string()),
    };
    Ok(value)
}

pub async fn create_definition(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<FieldDefinitionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<FieldDefinition>>), ErrorResponse> {
    authz::authorize(&current.user, Operation::DefineDynamicFields).map_err(api_error)?;

    let mut v = Validator::new();
    v.name("name", &request.name).slug("key", &request.key);
    if let Err(errors) = v.validate() {
        return Err(validation_failed(errors));
    }

    let entity_kind = FieldEntityKind::parse_str(&request.entity_kind)
        .ok_or_else(|| bad_request("entity_kind must be customer, vehicle or policy"))?;
    let data_type = FieldDataType::parse_str(&request.data_type)
        .ok_or_else(|| bad_request("data_type must be text, number, date, boolean or choice"))?;

    if data_type == FieldDataType::Choice && request.choices.is_empty() {
        return Err(bad_request("choice fields need at least one choice"));
    }
    if data_type != FieldDataType::Choice && !request.choices.is_empty() {
        return Err(bad_request("choices apply only to choice fields"));
    }

    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let now = Utc::now();
    let definition = FieldDefinition {
        id: FieldDefinitionId::new(),
        tenant_id: scope.id(),
        entity_kind,
        key: request.key,
        name: request.name.trim().to_string(),
        data_type,
        choices: request.choices,
        required: request.required,
        display_order: request.display_order,
        is_active: true,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    let created = state
        .dynamic_fields
        .create_definition(&scope, &definition, current.user.id)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(created)))
}

pub async fn list_definitions(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<DefinitionListQuery>,
) -> ApiResult<Vec<FieldDefinition>> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let entity_kind = match query.entity_kind.as_deref() {
        Some(raw) => Some(
            FieldEntityKind::parse_str(raw)
                .ok_or_else(|| bad_request("entity_kind must be customer, vehicle or policy"))?,
        ),
        None => None,
    };

    let definitions = state
        .dynamic_fields
        .list_definitions(&scope, entity_kind, query.include_inactive)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(definitions))
}

/// Rename, reorder, toggle requirement or deactivate a definition.
/// Deactivation keeps stored values readable.
pub async fn update_definition(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(request): Json<UpdateFieldDefinitionRequest>,
) -> ApiResult<FieldDefinition> {
    authz::authorize(&current.user, Operation::DefineDynamicFields).map_err(api_error)?;
    let definition_id: FieldDefinitionId = parse_id(&id, "field definition")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let existing = state
        .dynamic_fields
        .get_definition(&scope, definition_id)
        .await
        .map_err(api_error)?;

    let updated = FieldDefinition {
        name: request.name.unwrap_or(existing.name.clone()),
        choices: request.choices.unwrap_or(existing.choices.clone()),
        required: request.required.unwrap_or(existing.required),
        display_order: request.display_order.unwrap_or(existing.display_order),
        is_active: request.is_active.unwrap_or(existing.is_active),
        ..existing
    };

    let saved = state
        .dynamic_fields
        .update_definition(&scope, &updated, current.user.id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(saved))
}
