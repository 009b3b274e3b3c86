//! Common test utilities for gatehouse integration tests

#[allow(dead_code)]
pub mod provider_mock;

#[allow(unused_imports)]
pub use provider_mock::{CLIENT_ID, MockProvider, TestIdClaims, TestKeyPair};

use axum::body::Body;
use axum::http::{Request, Response, header};
use axum_extra::extract::cookie::Cookie;

/// All cookies set by a response.
#[allow(dead_code)]
pub fn set_cookies(response: &Response<Body>) -> Vec<Cookie<'static>> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| Cookie::parse(v.to_string()).ok())
        .collect()
}

/// The cookie named `name` set by a response, if any.
#[allow(dead_code)]
pub fn set_cookie(response: &Response<Body>, name: &str) -> Option<Cookie<'static>> {
    set_cookies(response).into_iter().find(|c| c.name() == name)
}

/// The `Location` header of a redirect.
#[allow(dead_code)]
pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// GET request carrying the given cookies.
#[allow(dead_code)]
pub fn get_with_cookies(uri: &str, cookies: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::get(uri);
    if !cookies.is_empty() {
        let header_value = cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        builder = builder.header(header::COOKIE, header_value);
    }
    builder.body(Body::empty()).unwrap()
}

/// Response body as a string.
#[allow(dead_code)]
pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
