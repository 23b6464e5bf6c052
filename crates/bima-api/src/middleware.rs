//! API middleware: request ids, request logging, session authentication
//! and CSRF enforcement

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use tracing::{info, warn};
use uuid::Uuid;

use bima_core::{Session, User};

use crate::dto::{ApiError, ApiResponse};
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "bima_session";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Authenticated actor attached to the request after the session check.
#[derive(Clone)]
pub struct CurrentUser {
    pub user: User,
    pub session: Session,
}

/// Request ID wrapper for extensions
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Attach a unique id to every request and echo it in the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::now_v7().to_string();
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-ID", value);
    }
    response
}

/// Structured request log line with latency.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let start = std::time::Instant::now();
    let response = next.run(request).await;
    let latency = start.elapsed();

    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        latency_ms = %latency.as_millis(),
        "Request completed"
    );
    response
}

/// Session authentication plus CSRF enforcement on mutating methods.
pub async fn session_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    let token = session_token(&request).ok_or_else(|| unauthorized("session cookie required"))?;

    let (user, session) = state
        .auth
        .resolve(&token)
        .await
        .map_err(|e| unauthorized(&e.to_string()))?;

    if csrf_required(request.method()) {
        let presented = request
            .headers()
            .get(CSRF_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();
        if !constant_time_eq(presented.as_bytes(), session.csrf_token.as_bytes()) {
            warn!(user = %user.email, "CSRF token missing or mismatched");
            return Err((
                StatusCode::FORBIDDEN,
                Json(ApiResponse {
                    success: false,
                    data: None,
                    error: Some(ApiError {
                        code: "csrf".to_string(),
                        message: "CSRF token missing or invalid".to_string(),
                        details: None,
                    }),
                }),
            ));
        }
    }

    request.extensions_mut().insert(CurrentUser { user, session });
    Ok(next.run(request).await)
}

fn csrf_required(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Session token from the cookie, with a header fallback for non-browser
/// clients.
fn session_token(request: &Request) -> Option<String> {
    if let Some(cookies) = request
        .headers()
        .get(axum::http::header::COOKIE)
        .and_then(|h| h.to_str().ok())
    {
        for pair in cookies.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            if parts.next() == Some(SESSION_COOKIE) {
                if let Some(value) = parts.next() {
                    return Some(value.to_string());
                }
            }
        }
    }
    request
        .headers()
        .get("x-session-token")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

fn unauthorized(message: &str) -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code: "unauthorized".to_string(),
                message: message.to_string(),
                details: None,
            }),
        }),
    )
}

/// Constant-time comparison to prevent timing attacks
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"tokeN"));
        assert!(!constant_time_eq(b"token", b"token-longer"));
    }

    #[test]
    fn test_csrf_only_on_mutations() {
        assert!(!csrf_required(&Method::GET));
        assert!(!csrf_required(&Method::HEAD));
        assert!(csrf_required(&Method::POST));
        assert!(csrf_required(&Method::PUT));
        assert!(csrf_required(&Method::DELETE));
    }
}
