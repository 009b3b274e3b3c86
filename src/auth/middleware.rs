//! Request guards and response headers for the HTTP surface.

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, warn};

use crate::auth::api_key::ApiKeyGate;
use crate::auth::session::SessionStore;

/// Where unauthenticated browsers are sent.
pub const LOGIN_PATH: &str = "/login";

/// Where authenticated browsers land.
pub const HOME_PATH: &str = "/home";

/// Policy applied when a handler sets none of its own.
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; form-action 'self'; \
     img-src 'self' data: https:; style-src 'self' 'unsafe-inline'; frame-ancestors 'none'";

/// 302 to `location`.
pub fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Let the request through only with a live session; otherwise redirect to
/// the login page.
pub async fn require_session(
    State(sessions): State<SessionStore>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    if sessions.is_authenticated(&jar).await {
        return next.run(request).await;
    }

    debug!(path = %request.uri().path(), "Unauthenticated request redirected to login");
    found(LOGIN_PATH)
}

/// Let the request through only with a valid API key.
pub async fn require_api_key(
    State(gate): State<ApiKeyGate>,
    request: Request,
    next: Next,
) -> Response {
    match gate.check(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            warn!(
                reason = err.reason(),
                path = %request.uri().path(),
                "API request rejected: {}",
                err
            );
            api_error(err.status(), err.public_message())
        }
    }
}

/// JSON error body used on the API surface.
pub fn api_error(status: StatusCode, message: &str) -> Response {
    let body = json!({
        "error": message,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (status, Json(body)).into_response()
}

/// Add the standard security headers to every response from `router`.
pub fn with_security_headers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
}
