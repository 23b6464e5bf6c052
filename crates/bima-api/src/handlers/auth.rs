//! Login, logout and current-user handlers

use axum::{
    extract::{ConnectInfo, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::net::SocketAddr;

use bima_core::SessionRepository;

use crate::dto::{api_error, validation_failed, ApiResponse, LoginRequest, LoginResponse};
use crate::middleware::{CurrentUser, SESSION_COOKIE};
use crate::state::AppState;
use crate::validation::Validator;

/// Authenticate and establish a fresh session. The cookie is HttpOnly; the
/// CSRF token travels in the response body and must come back in
/// X-CSRF-Token on every mutating request.
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<LoginRequest>,
) -> Response {
    let mut v = Validator::new();
    v.email("email", &request.email)
        .required("password", &request.password);
    if let Err(errors) = v.validate() {
        return validation_failed(errors).into_response();
    }

    let outcome = match state
        .auth
        .login(&request.email, &request.password, &addr.ip().to_string())
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return api_error(e).into_response(),
    };

    let cookie = format!(
        "{SESSION_COOKIE}={}; HttpOnly; SameSite=Lax; Path=/",
        outcome.token
    );
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        ApiResponse::ok(LoginResponse {
            user: outcome.user,
            csrf_token: outcome.session.csrf_token,
        }),
    )
        .into_response()
}

/// Drop the server-side session and clear the cookie.
pub async fn logout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Response {
    // The middleware already resolved the session; deleting by id is enough
    if let Err(e) = state.sessions.delete(current.session.id).await {
        return api_error(e).into_response();
    }
    let cookie = format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0");
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        ApiResponse::ok(()),
    )
        .into_response()
}

/// The authenticated user.
pub async fn me(Extension(current): Extension<CurrentUser>) -> Json<ApiResponse<bima_core::User>> {
    ApiResponse::ok(current.user)
}
