//! Server-side sessions keyed by an opaque cookie token.

use std::sync::Arc;
use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::OffsetDateTime;
use tracing::debug;

use crate::auth::secret::{SecretError, TOKEN_BYTES, generate_token};
use crate::auth::store::{KeyValueStore, MemoryStore};
use crate::types::SessionToken;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session";

/// Default session lifetime (7 days).
pub const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// State kept server-side for each session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionData {
    pub authenticated: bool,
}

/// Cookie attributes shared by every session cookie.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Set the `Secure` attribute (the server terminates TLS).
    pub secure: bool,
    /// How long an issued cookie stays valid.
    pub lifetime: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            secure: false,
            lifetime: DEFAULT_SESSION_LIFETIME,
        }
    }
}

/// Session store handed to request handlers.
///
/// Cheap to clone; all clones share the same backend.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KeyValueStore<SessionData>>,
    settings: SessionSettings,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KeyValueStore<SessionData>>, settings: SessionSettings) -> Self {
        Self { backend, settings }
    }

    /// In-memory store whose entries also expire server-side after the cookie lifetime.
    pub fn in_memory(settings: SessionSettings) -> Self {
        let backend = MemoryStore::new().with_ttl(settings.lifetime);
        Self::new(Arc::new(backend), settings)
    }

    /// The backend, for wiring up a sweeper.
    pub fn backend(&self) -> Arc<dyn KeyValueStore<SessionData>> {
        self.backend.clone()
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Mint an authenticated session and the cookie that carries it.
    pub async fn create_session(&self) -> Result<(SessionToken, Cookie<'static>), SecretError> {
        let token = SessionToken::new(generate_token(TOKEN_BYTES)?);

        self.backend
            .put(
                token.as_str().to_string(),
                SessionData {
                    authenticated: true,
                },
            )
            .await;

        let expires = OffsetDateTime::now_utc() + lifetime_as_time(self.settings.lifetime);
        let cookie = Cookie::build((SESSION_COOKIE, token.as_str().to_string()))
            .path("/")
            .expires(expires)
            .http_only(true)
            .secure(self.settings.secure)
            .same_site(SameSite::Strict)
            .build();

        debug!("Session created");
        Ok((token, cookie))
    }

    /// Whether the request's session cookie names a live, authenticated session.
    ///
    /// A missing, empty or unknown cookie is an ordinary `false`.
    pub async fn is_authenticated(&self, jar: &CookieJar) -> bool {
        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            return false;
        };

        let token = cookie.value();
        if token.is_empty() {
            return false;
        }

        self.backend
            .get(token)
            .await
            .map(|session| session.authenticated)
            .unwrap_or(false)
    }

    /// Forget the request's session and return a cookie that overwrites it
    /// with an already-expired value.
    pub async fn delete_session(&self, jar: &CookieJar) -> Cookie<'static> {
        match jar.get(SESSION_COOKIE) {
            Some(cookie) if !cookie.value().is_empty() => {
                self.backend.delete(cookie.value()).await;
            }
            _ => debug!("No session cookie found in request to delete session"),
        }

        clear_session_cookie(self.settings.secure)
    }
}

/// Expired replacement for the session cookie.
pub fn clear_session_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .expires(OffsetDateTime::now_utc() - time::Duration::hours(1))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .build()
}

fn lifetime_as_time(lifetime: Duration) -> time::Duration {
    time::Duration::try_from(lifetime).unwrap_or(time::Duration::days(365))
}
