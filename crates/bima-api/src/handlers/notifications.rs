//! In-app notification handlers

use axum::{
    extract::{Path, Query, State},
    Extension,
};

use bima_core::authz::{self, Operation};
use bima_core::{Notification, NotificationId, NotificationRepository};

use crate::dto::{api_error, ApiResponse, ApiResult, PaginatedResponse, PagedResult};
use crate::handlers::parse_id;
use crate::middleware::CurrentUser;
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct NotificationListQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<NotificationListQuery>,
) -> PagedResult<Notification> {
    authz::authorize(&current.user, Operation::ReadBusinessData).map_err(api_error)?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let page = bima_core::Page::new(query.page.unwrap_or(1), query.page_size.unwrap_or(50));
    let notifications = state
        .notifications
        .list_for_user(&scope, current.user.id, query.unread_only, page)
        .await
        .map_err(api_error)?;
    Ok(PaginatedResponse::new(notifications, page))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Notification> {
    let notification_id: NotificationId = parse_id(&id, "notification")?;
    let scope = state.bind_tenant(&current.user).await.map_err(api_error)?;
    let notification = state
        .notifications
        .mark_read(&scope, notification_id, current.user.id)
        .await
        .map_err(api_error)?;
    Ok(ApiResponse::ok(notification))
}
