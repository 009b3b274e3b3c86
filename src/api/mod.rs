// HTTP endpoints for login, logout and federated sign-in

use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::federated::{CallbackParams, STATE_COOKIE, clear_state_cookie};
use crate::auth::middleware::{
    HOME_PATH, LOGIN_PATH, found, require_api_key, require_session, with_security_headers,
};
use crate::auth::password::check_password;
use crate::state::AppState;

/// Build the full router.
///
/// `protected` routes are reachable only with a session; `api` routes are
/// nested under `/api` behind the API key gate.
pub fn create_router(
    state: AppState,
    protected: Router<AppState>,
    api: Router<AppState>,
) -> Router {
    let protected = Router::new()
        .route(HOME_PATH, get(home))
        .merge(protected)
        .route_layer(from_fn_with_state(state.sessions.clone(), require_session));

    let api = Router::new()
        .route("/ping", get(api_ping))
        .merge(api)
        .route_layer(from_fn_with_state(state.api_gate.clone(), require_api_key))
        .layer(CorsLayer::permissive());

    let router = Router::new()
        .route("/health", get(health_check))
        .route(LOGIN_PATH, get(login_page).post(login_submit))
        .route("/logout", get(logout))
        .route("/auth/federated/login", get(federated_login))
        .route("/auth/federated/callback", get(federated_callback))
        .merge(protected)
        .nest("/api", api)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    with_security_headers(router).with_state(state)
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn api_ping() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn home(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><title>Home</title></head><body>\
         <p>Signed in as {}.</p><p><a href=\"/logout\">Sign out</a></p></body></html>",
        html_escape(state.config.user.username.as_str())
    ))
}

async fn login_page(State(state): State<AppState>, jar: CookieJar) -> Response {
    if state.sessions.is_authenticated(&jar).await {
        return found(HOME_PATH);
    }
    Html(render_login(state.federated.is_some(), None)).into_response()
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn login_submit(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let username_ok = form.username == state.config.user.username;

    // Always run the hash, even for an unknown username.
    let digest = state.config.user.password.clone();
    let password = form.password;
    let password_ok = tokio::task::spawn_blocking(move || check_password(&digest, &password))
        .await
        .unwrap_or(false);

    if !(username_ok && password_ok) {
        warn!(
            reason = "invalid_credentials",
            username = %form.username,
            "Failed local login attempt"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Html(render_login(
                state.federated.is_some(),
                Some("Invalid username or password"),
            )),
        )
            .into_response();
    }

    match state.sessions.create_session().await {
        Ok((_, cookie)) => {
            info!(username = %form.username, "Local login succeeded");
            (jar.add(cookie), found(HOME_PATH)).into_response()
        }
        Err(e) => {
            error!("Failed to create session: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    let cleared = state.sessions.delete_session(&jar).await;
    (jar.add(cleared), found(LOGIN_PATH)).into_response()
}

async fn federated_login(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(federated) = &state.federated else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Federated login is not enabled",
        )
            .into_response();
    };

    if state.sessions.is_authenticated(&jar).await {
        return found(HOME_PATH);
    }

    match federated.begin_login().await {
        Ok(redirect) => (jar.add(redirect.state_cookie), found(&redirect.url)).into_response(),
        Err(e) => {
            e.log();
            (e.status(), e.public_message()).into_response()
        }
    }
}

async fn federated_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(federated) = &state.federated else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Federated login is not enabled",
        )
            .into_response();
    };

    let state_cookie = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.add(clear_state_cookie(state.secure_cookies()));

    let claims = match federated
        .handle_callback(&params, state_cookie.as_deref())
        .await
    {
        Ok(claims) => claims,
        Err(e) => {
            e.log();
            return (jar, (e.status(), e.public_message())).into_response();
        }
    };

    match state.sessions.create_session().await {
        Ok((_, cookie)) => {
            info!(sub = %claims.sub, "Federated login succeeded");
            (jar.add(cookie), found(HOME_PATH)).into_response()
        }
        Err(e) => {
            error!("Failed to create session: {}", e);
            (
                jar,
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
            )
                .into_response()
        }
    }
}

fn render_login(federated_enabled: bool, error: Option<&str>) -> String {
    let error = error
        .map(|msg| format!("<p class=\"error\">{}</p>", html_escape(msg)))
        .unwrap_or_default();
    let federated = if federated_enabled {
        "<p><a href=\"/auth/federated/login\">Sign in with single sign-on</a></p>"
    } else {
        ""
    };

    format!(
        "<!doctype html><html><head><title>Sign in</title></head><body>\
         <h1>Sign in</h1>{error}\
         <form method=\"post\" action=\"/login\">\
         <label>Username <input name=\"username\" autocomplete=\"username\" required></label>\
         <label>Password <input name=\"password\" type=\"password\" \
         autocomplete=\"current-password\" required></label>\
         <button type=\"submit\">Sign in</button></form>{federated}</body></html>"
    )
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
