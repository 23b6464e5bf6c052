//! Audit trail and time-travel queries

use axum::{
    extract::{Path, Query, State},
    Extension,
};
use chrono::{DateTime, Utc};

use bima_core::authz::{self, Operation};
use bima_core::{
    AuditAction, AuditEntry, AuditFilter, AuditRepository, EntityKind, HistoryRecord,
    HistoryRepository, UserId,
};

use crate::dto::{
    api_error, bad_request, ApiResponse, ApiResult, PaginatedResponse, PagedResult,
};
use crate::handlers::parse_id;
use crate::middleware::CurrentUser;
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct AuditQuery {
    pub entity_kind: Option<String>,
    pub entity_id: Option<String>,
    pub actor: Option<String>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, serde::Deserialize)]
pub struct HistoryQuery {
    /// "what did this entity look like at instant T"
    pub as_of: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn query_audit(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<AuditQuery>,
) -> PagedResult<AuditEntry> {
    // Reading the audit log is a managerial concern
    authz::authorize(&current.user, Operation::ViewReports).map_err(api_error)?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    let entity_kind = match query.entity_kind.as_deref() {
        Some(raw) => {
            Some(EntityKind::parse_str(raw).ok_or_else(|| bad_request("unknown entity kind"))?)
        }
        None => None,
    };
    let action = match query.action.as_deref() {
        Some(raw) => {
            Some(AuditAction::parse_str(raw).ok_or_else(|| bad_request("unknown audit action"))?)
        }
        None => None,
    };
    let entity_id = match &query.entity_id {
        Some(raw) => Some(
            raw.parse::<uuid::Uuid>()
                .map_err(|_| bad_request("Invalid entity id"))?,
        ),
        None => None,
    };
    let actor_user_id = match &query.actor {
        Some(raw) => Some(parse_id::<UserId>(raw, "user")?),
        None => None,
    };

    let filter = AuditFilter {
        entity_kind,
        entity_id,
        actor_user_id,
        action,
        from_ts: query.from,
        to_ts: query.to,
    };
    let page = bima_core::Page::new(query.page.unwrap_or(1), query.page_size.unwrap_or(50));
    let entries = state
        .audit
        .query(&scope, &filter, page)
        .await
        .map_err(api_error)?;
    Ok(PaginatedResponse::new(entries, page))
}

/// Historical snapshots of one entity. With `as_of` set, returns the single
/// snapshot in force at that instant.
pub async fn entity_history(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path((kind, id)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<HistoryRecord>> {
    authz::authorize(&current.user, Operation::ViewReports).map_err(api_error)?;
    let entity_kind =
        EntityKind::parse_str(&kind).ok_or_else(|| bad_request("unknown entity kind"))?;
    let entity_id: uuid::Uuid = id.parse().map_err(|_| bad_request("Invalid entity id"))?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;

    if let Some(as_of) = query.as_of {
        let snapshot = state
            .history
            .snapshot_as_of(&scope, entity_kind, entity_id, as_of)
            .await
            .map_err(api_error)?;
        return Ok(ApiResponse::ok(snapshot.into_iter().collect()));
    }

    let page = bima_core::Page::new(query.page.unwrap_or(1), query.page_size.unwrap_or(50));
    let records = state
        .history
        .for_entity(&scope, entity_kind, entity_id, page)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(records))
}
