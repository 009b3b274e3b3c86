//! Authentication and trust boundary.
//!
//! This module decides who gets in. It supports three ways of proving
//! identity, all resolving to the single configured principal:
//!
//! - **Local login**: username and bcrypt-checked password
//! - **Federated login**: OpenID Connect authorization code flow with PKCE,
//!   admitting only an identity whose `preferred_username` is the principal
//! - **API key**: constant-time digest comparison for non-interactive callers
//!
//! ## Security Model
//!
//! - Sessions are opaque random tokens held server-side; the cookie is the
//!   only external reference
//! - OAuth state values are single-use and expire with their cookie
//! - Rejections never reveal which check failed; the detail goes to the log
//! - Every rejection returns before a session can be created
//!
//! ## Usage
//!
//! ```ignore
//! let sessions = SessionStore::in_memory(SessionSettings::default());
//! let (_token, cookie) = sessions.create_session().await?;
//! let jar = jar.add(cookie);
//!
//! if sessions.is_authenticated(&jar).await {
//!     // serve the protected page
//! }
//! ```

pub mod api_key;
pub mod csrf;
pub mod federated;
pub mod jwks;
pub mod middleware;
pub mod oidc;
pub mod password;
pub mod pkce;
pub mod secret;
pub mod session;
pub mod store;

pub use api_key::{ApiKeyError, ApiKeyGate, generate_api_key};
pub use csrf::CsrfStateStore;
pub use federated::{CallbackParams, FailureKind, FederatedError, FederatedLogin, LoginRedirect};
pub use jwks::{DEFAULT_CACHE_TTL_SECONDS, JwksCache, JwksError};
pub use oidc::{IdTokenClaims, IdentityProvider, OidcClient, OidcError, OidcSettings};
pub use password::{PasswordError, check_password, hash_password};
pub use secret::{SecretError, generate_token};
pub use session::{SessionData, SessionSettings, SessionStore};
pub use store::{KeyValueStore, MemoryStore, spawn_sweeper};
