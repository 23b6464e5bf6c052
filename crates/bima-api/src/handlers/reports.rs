//! Report projection handlers (data only; rendering is external)

use axum::{
    extract::{Query, State},
    Extension,
};
use chrono::{NaiveDate, TimeZone, Utc};

use bima_core::authz::{self, Operation};
use bima_core::compliance::ComplianceSummary;
use bima_core::{Policy, ReportRepository, Vehicle};

use crate::dto::{
    api_error, bad_request, ApiResponse, ApiResult, DateRangeQuery, PageQuery, PaginatedResponse,
    PagedResult,
};
use crate::middleware::CurrentUser;
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct SummaryQuery {
    pub as_of: Option<NaiveDate>,
}

pub async fn active_policies(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> PagedResult<Policy> {
    authz::authorize(&current.user, Operation::ViewReports).map_err(api_error)?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let page = query.to_page();
    let policies = state
        .reports
        .active_policies(&scope, page)
        .await
        .map_err(api_error)?;
    Ok(PaginatedResponse::new(policies, page))
}

pub async fn expired_policies(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> PagedResult<Policy> {
    authz::authorize(&current.user, Operation::ViewReports).map_err(api_error)?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let page = query.to_page();
    let policies = state
        .reports
        .expired_policies(&scope, page)
        .await
        .map_err(api_error)?;
    Ok(PaginatedResponse::new(policies, page))
}

/// Policies whose cover ends inside the range (renewal pipeline view).
pub async fn policies_ending(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<DateRangeQuery>,
) -> PagedResult<Policy> {
    authz::authorize(&current.user, Operation::ViewReports).map_err(api_error)?;
    if query.to < query.from {
        return Err(bad_request("'to' must not precede 'from'"));
    }
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let page = bima_core::Page::new(query.page.unwrap_or(1), query.page_size.unwrap_or(50));
    let policies = state
        .reports
        .policies_ending_between(&scope, query.from, query.to, page)
        .await
        .map_err(api_error)?;
    Ok(PaginatedResponse::new(policies, page))
}

/// Vehicles registered (created) inside the date range.
pub async fn registrations(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<DateRangeQuery>,
) -> PagedResult<Vehicle> {
    authz::authorize(&current.user, Operation::ViewReports).map_err(api_error)?;
    if query.to < query.from {
        return Err(bad_request("'to' must not precede 'from'"));
    }
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let page = bima_core::Page::new(query.page.unwrap_or(1), query.page_size.unwrap_or(50));

    let from = Utc
        .from_utc_datetime(&query.from.and_hms_opt(0, 0, 0).expect("midnight is valid"));
    let to_exclusive = Utc.from_utc_datetime(
        &(query.to + chrono::Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid"),
    );

    let vehicles = state
        .reports
        .vehicles_registered_between(&scope, from, to_exclusive, page)
        .await
        .map_err(api_error)?;
    Ok(PaginatedResponse::new(vehicles, page))
}

/// Fleet-wide compliance rollup at `as_of` (default today).
pub async fn compliance_summary(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<ComplianceSummary> {
    authz::authorize(&current.user, Operation::ViewReports).map_err(api_error)?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let as_of = query.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let summary = state
        .compliance
        .tenant_summary(&scope, as_of)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(summary))
}
