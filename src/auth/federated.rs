//! Federated login: authorization code flow with PKCE against one identity
//! provider, admitting only the configured principal.
//!
//! A login attempt moves `NotStarted -> AwaitingCallback -> {Authenticated |
//! Rejected}`. [`FederatedLogin::begin_login`] stores the state/verifier pair
//! and sets the state cookie; [`FederatedLogin::handle_callback`] checks the
//! redirect, consumes the pair, exchanges the code and verifies the ID token.
//! Session creation is left to the caller so that nothing here can mint a
//! session on a rejection path.

use std::fmt;
use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::csrf::CsrfStateStore;
use crate::auth::oidc::{IdTokenClaims, IdentityProvider, OidcError};
use crate::auth::pkce;
use crate::auth::secret::{SecretError, TOKEN_BYTES, generate_token};
use crate::types::{StateToken, Username};

/// Name of the cookie carrying the state value across the provider redirect.
pub const STATE_COOKIE: &str = "oauth_state";

/// Lifetime of the state cookie in seconds.
pub const STATE_COOKIE_MAX_AGE_SECONDS: i64 = 300;

/// Query parameters on the provider's redirect back to us.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Where to send the browser, and the cookie to set on the way.
#[derive(Debug)]
pub struct LoginRedirect {
    pub url: String,
    pub state_cookie: Cookie<'static>,
}

/// Federated login flow bound to one provider and one principal.
#[derive(Clone)]
pub struct FederatedLogin {
    provider: Arc<dyn IdentityProvider>,
    pending: CsrfStateStore,
    principal: Username,
    secure_cookies: bool,
}

impl FederatedLogin {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        pending: CsrfStateStore,
        principal: Username,
        secure_cookies: bool,
    ) -> Self {
        Self {
            provider,
            pending,
            principal,
            secure_cookies,
        }
    }

    pub fn pending(&self) -> &CsrfStateStore {
        &self.pending
    }

    /// Start an attempt: store a fresh state/verifier pair and build the
    /// authorization redirect.
    pub async fn begin_login(&self) -> Result<LoginRedirect, FederatedError> {
        let state = StateToken::new(generate_token(TOKEN_BYTES)?);
        let verifier = pkce::generate_verifier()?;
        let challenge = pkce::challenge(&verifier);

        self.pending.put(&state, verifier).await;
        let url = self.provider.authorization_url(&state, &challenge);

        let state_cookie = Cookie::build((STATE_COOKIE, state.as_str().to_string()))
            .path("/")
            .max_age(time::Duration::seconds(STATE_COOKIE_MAX_AGE_SECONDS))
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .build();

        info!(state = state.log_prefix(), "Federated login initiated");
        Ok(LoginRedirect { url, state_cookie })
    }

    /// Run the callback to completion and return the admitted identity.
    ///
    /// The caller must clear the state cookie whatever the outcome
    /// (see [`clear_state_cookie`]).
    pub async fn handle_callback(
        &self,
        params: &CallbackParams,
        state_cookie: Option<&str>,
    ) -> Result<IdTokenClaims, FederatedError> {
        let state = check_state(params, state_cookie)?;

        let code = match check_code(params) {
            Ok(code) => code,
            Err(err) => {
                // The attempt is over; its pending entry must not outlive it.
                self.pending.take(&state).await;
                return Err(err);
            }
        };

        let claims = self.exchange(code, &state).await?;
        self.authorize(claims)
    }

    /// Consume the pending entry for `state`, redeem `code` and verify the
    /// returned ID token.
    pub async fn exchange(
        &self,
        code: &str,
        state: &StateToken,
    ) -> Result<IdTokenClaims, FederatedError> {
        let verifier = self
            .pending
            .take(state)
            .await
            .ok_or(FederatedError::UnknownState)?;

        let tokens = self
            .provider
            .exchange_code(code, &verifier)
            .await
            .map_err(FederatedError::Provider)?;

        let id_token = tokens
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or(FederatedError::Provider(OidcError::MissingIdToken))?;

        self.provider
            .verify_id_token(&id_token)
            .await
            .map_err(FederatedError::Provider)
    }

    /// Admit the identity only if it asserts exactly the configured username.
    ///
    /// This is a single-identity allow-list. Serving several principals means
    /// replacing this comparison with a directory lookup, not widening it.
    pub fn authorize(&self, claims: IdTokenClaims) -> Result<IdTokenClaims, FederatedError> {
        match claims.preferred_username.as_deref() {
            Some(name) if name == self.principal.as_str() => {
                info!(
                    sub = %claims.sub,
                    username = name,
                    email = claims.email.as_deref().unwrap_or(""),
                    "Federated identity accepted"
                );
                Ok(claims)
            }
            other => Err(FederatedError::UnauthorizedUser {
                asserted: other.map(str::to_string),
            }),
        }
    }
}

fn check_state(
    params: &CallbackParams,
    state_cookie: Option<&str>,
) -> Result<StateToken, FederatedError> {
    let expected = match state_cookie {
        Some(value) if !value.is_empty() => value,
        _ => return Err(FederatedError::MissingStateCookie),
    };

    match params.state.as_deref() {
        Some(state) if !state.is_empty() && state == expected => Ok(StateToken::new(state)),
        _ => Err(FederatedError::StateMismatch),
    }
}

fn check_code(params: &CallbackParams) -> Result<&str, FederatedError> {
    if let Some(error) = params.error.as_deref() {
        return Err(FederatedError::ProviderRejected {
            error: error.to_string(),
            description: params.error_description.clone(),
        });
    }

    match params.code.as_deref() {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(FederatedError::MissingCode),
    }
}

/// Expired replacement for the state cookie.
pub fn clear_state_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE, ""))
        .path("/")
        .max_age(time::Duration::ZERO)
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

/// How a rejection is reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The callback does not belong to an attempt we started.
    Protocol,
    /// A genuine identity that is not allowed in.
    Credential,
    /// We could not complete the attempt; the user may start over.
    Transient,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Credential => "credential",
            Self::Transient => "transient",
        }
    }
}

/// Reasons a federated login attempt was rejected.
#[derive(Debug)]
pub enum FederatedError {
    MissingStateCookie,
    StateMismatch,
    ProviderRejected {
        error: String,
        description: Option<String>,
    },
    MissingCode,
    /// Expired, replayed or forged state value.
    UnknownState,
    Provider(OidcError),
    UnauthorizedUser { asserted: Option<String> },
    Secret(SecretError),
}

impl FederatedError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MissingStateCookie
            | Self::StateMismatch
            | Self::ProviderRejected { .. }
            | Self::MissingCode
            | Self::UnknownState => FailureKind::Protocol,
            Self::Provider(err) if err.is_transient() => FailureKind::Transient,
            Self::Provider(_) => FailureKind::Protocol,
            Self::UnauthorizedUser { .. } => FailureKind::Credential,
            Self::Secret(_) => FailureKind::Transient,
        }
    }

    /// Short machine-readable reason for log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingStateCookie => "missing_state_cookie",
            Self::StateMismatch => "state_mismatch",
            Self::ProviderRejected { .. } => "provider_error",
            Self::MissingCode => "missing_code",
            Self::UnknownState => "unknown_state",
            Self::Provider(OidcError::MissingIdToken) => "missing_id_token",
            Self::Provider(OidcError::InvalidToken(_)) => "invalid_id_token",
            Self::Provider(OidcError::TokenEndpoint { .. }) => "exchange_rejected",
            Self::Provider(_) => "provider_unreachable",
            Self::UnauthorizedUser { .. } => "unauthorized_user",
            Self::Secret(_) => "random_source",
        }
    }

    /// HTTP status shown to the user. The body never says more than
    /// [`FederatedError::public_message`].
    pub fn status(&self) -> http::StatusCode {
        match self.kind() {
            FailureKind::Transient => http::StatusCode::INTERNAL_SERVER_ERROR,
            FailureKind::Protocol | FailureKind::Credential => http::StatusCode::UNAUTHORIZED,
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self.kind() {
            FailureKind::Transient => "Authentication temporarily unavailable",
            FailureKind::Protocol | FailureKind::Credential => "Authentication failed",
        }
    }

    /// Emit the full detail at warn level.
    pub fn log(&self) {
        warn!(
            kind = self.kind().as_str(),
            reason = self.reason(),
            "Federated login rejected: {}",
            self
        );
    }
}

impl fmt::Display for FederatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStateCookie => write!(f, "State cookie missing"),
            Self::StateMismatch => write!(f, "State parameter does not match cookie"),
            Self::ProviderRejected { error, description } => match description {
                Some(desc) => write!(f, "Provider returned error {}: {}", error, desc),
                None => write!(f, "Provider returned error {}", error),
            },
            Self::MissingCode => write!(f, "No authorization code in callback"),
            Self::UnknownState => write!(f, "State expired, replayed or never issued"),
            Self::Provider(err) => write!(f, "{}", err),
            Self::UnauthorizedUser { asserted } => write!(
                f,
                "Identity {} is not the configured user",
                asserted.as_deref().unwrap_or("<no preferred_username>")
            ),
            Self::Secret(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for FederatedError {}

impl From<SecretError> for FederatedError {
    fn from(err: SecretError) -> Self {
        Self::Secret(err)
    }
}
