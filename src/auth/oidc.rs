//! OpenID Connect client: discovery, authorization URL, code exchange and
//! ID-token verification.
//!
//! [`IdentityProvider`] is the seam the federated login flow talks to; the
//! production implementation is [`OidcClient`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::auth::jwks::{DEFAULT_CACHE_TTL_SECONDS, JwksCache};
use crate::auth::pkce::CHALLENGE_METHOD;
use crate::types::{PkceVerifier, StateToken};

/// Bound on every outbound call to the provider.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Clock skew tolerated when checking `exp`.
const LEEWAY_SECONDS: u64 = 60;

/// Client registration at the identity provider.
#[derive(Debug, Clone)]
pub struct OidcSettings {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub scopes: Vec<String>,
}

/// The subset of the discovery document this client uses.
#[derive(Debug, Clone, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    jwks_uri: String,
    #[serde(default)]
    code_challenge_methods_supported: Vec<String>,
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Claims read from a verified ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub iss: String,
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Operations the federated login flow needs from an identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authorization endpoint URL carrying `state` and the S256 `code_challenge`.
    fn authorization_url(&self, state: &StateToken, code_challenge: &str) -> String;

    /// Redeem an authorization code, proving possession of `verifier`.
    async fn exchange_code(
        &self,
        code: &str,
        verifier: &PkceVerifier,
    ) -> Result<TokenResponse, OidcError>;

    /// Verify signature, issuer, audience and expiry of a raw ID token.
    async fn verify_id_token(&self, raw: &str) -> Result<IdTokenClaims, OidcError>;
}

/// Build the HTTP client shared by discovery, key fetches and code exchange.
pub fn build_http_client() -> Result<reqwest::Client, OidcError> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("gatehouse/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| OidcError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// OpenID Connect relying party bound to one provider.
pub struct OidcClient {
    settings: OidcSettings,
    metadata: ProviderMetadata,
    authorization_endpoint: Url,
    jwks: JwksCache,
    http: reqwest::Client,
}

impl OidcClient {
    /// Fetch the provider's discovery document and prime its key set.
    pub async fn discover(
        settings: OidcSettings,
        http: reqwest::Client,
    ) -> Result<Self, OidcError> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            settings.issuer_url.trim_end_matches('/')
        );
        debug!("Fetching provider metadata from {}", discovery_url);

        let response = http
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OidcError::Discovery(format!(
                "HTTP {} from discovery endpoint",
                response.status()
            )));
        }

        let metadata: ProviderMetadata = response
            .json()
            .await
            .map_err(|e| OidcError::Discovery(format!("Invalid discovery document: {}", e)))?;

        let client = Self::from_metadata(settings, metadata, http)?;
        client
            .jwks
            .fetch_keys()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?;

        info!("OIDC provider initialized: {}", client.metadata.issuer);
        Ok(client)
    }

    /// Build a client from already-known metadata without contacting the provider.
    fn from_metadata(
        settings: OidcSettings,
        metadata: ProviderMetadata,
        http: reqwest::Client,
    ) -> Result<Self, OidcError> {
        if metadata.issuer.trim_end_matches('/') != settings.issuer_url.trim_end_matches('/') {
            return Err(OidcError::Discovery(format!(
                "Issuer mismatch: configured {}, provider reports {}",
                settings.issuer_url, metadata.issuer
            )));
        }

        if !metadata.code_challenge_methods_supported.is_empty()
            && !metadata
                .code_challenge_methods_supported
                .iter()
                .any(|m| m == CHALLENGE_METHOD)
        {
            return Err(OidcError::Discovery(
                "Provider does not support S256 PKCE".to_string(),
            ));
        }

        let authorization_endpoint = Url::parse(&metadata.authorization_endpoint)
            .map_err(|e| OidcError::Discovery(format!("Invalid authorization endpoint: {}", e)))?;

        let jwks = JwksCache::new(
            metadata.jwks_uri.clone(),
            DEFAULT_CACHE_TTL_SECONDS,
            http.clone(),
        );

        Ok(Self {
            settings,
            metadata,
            authorization_endpoint,
            jwks,
            http,
        })
    }
}

#[async_trait]
impl IdentityProvider for OidcClient {
    fn authorization_url(&self, state: &StateToken, code_challenge: &str) -> String {
        let mut url = self.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_url)
            .append_pair("scope", &self.settings.scopes.join(" "))
            .append_pair("state", state.as_str())
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", CHALLENGE_METHOD);
        url.into()
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &PkceVerifier,
    ) -> Result<TokenResponse, OidcError> {
        let response = self
            .http
            .post(&self.metadata.token_endpoint)
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.settings.redirect_url.as_str()),
                ("client_id", self.settings.client_id.as_str()),
                ("code_verifier", verifier.as_str()),
            ])
            .send()
            .await
            .map_err(|e| OidcError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error = response
                .json::<TokenErrorBody>()
                .await
                .map(|body| match body.error_description {
                    Some(desc) => format!("{}: {}", body.error, desc),
                    None => body.error,
                })
                .unwrap_or_else(|_| "unreadable error body".to_string());
            return Err(OidcError::TokenEndpoint {
                status: status.as_u16(),
                error,
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| OidcError::InvalidResponse(e.to_string()))
    }

    async fn verify_id_token(&self, raw: &str) -> Result<IdTokenClaims, OidcError> {
        let header = decode_header(raw)
            .map_err(|e| OidcError::InvalidToken(format!("Invalid JWT header: {}", e)))?;

        let key = self
            .jwks
            .get_key(header.kid.as_deref())
            .await
            .map_err(|e| {
                if e.is_transient() {
                    OidcError::Http(e.to_string())
                } else {
                    OidcError::InvalidToken(e.to_string())
                }
            })?;

        if !key.family.permits(header.alg) {
            return Err(OidcError::InvalidToken(format!(
                "Algorithm {:?} not allowed for this key",
                header.alg
            )));
        }

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.metadata.issuer]);
        validation.set_audience(&[&self.settings.client_id]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = LEEWAY_SECONDS;

        let data = decode::<IdTokenClaims>(raw, &key.key, &validation).map_err(|e| {
            OidcError::InvalidToken(format!("Signature or claim check failed: {}", e))
        })?;

        Ok(data.claims)
    }
}

/// Errors talking to the identity provider.
#[derive(Debug, Clone)]
pub enum OidcError {
    /// Discovery failed or the provider metadata is unusable.
    Discovery(String),
    /// Network failure or timeout.
    Http(String),
    /// The token endpoint rejected the exchange.
    TokenEndpoint { status: u16, error: String },
    /// The token endpoint answered 2xx with an unparseable body.
    InvalidResponse(String),
    /// The token response carried no ID token.
    MissingIdToken,
    /// The ID token failed verification.
    InvalidToken(String),
    /// Local misconfiguration.
    Config(String),
}

impl OidcError {
    /// Failures worth a 500: the user did nothing wrong and may simply retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::InvalidResponse(_) | Self::Discovery(_) | Self::Config(_)
        )
    }
}

impl fmt::Display for OidcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery(msg) => write!(f, "Provider discovery failed: {}", msg),
            Self::Http(msg) => write!(f, "Provider request failed: {}", msg),
            Self::TokenEndpoint { status, error } => {
                write!(f, "Token endpoint returned HTTP {}: {}", status, error)
            }
            Self::InvalidResponse(msg) => write!(f, "Invalid token response: {}", msg),
            Self::MissingIdToken => write!(f, "No id_token in token response"),
            Self::InvalidToken(msg) => write!(f, "Invalid ID token: {}", msg),
            Self::Config(msg) => write!(f, "OIDC configuration error: {}", msg),
        }
    }
}

impl std::error::Error for OidcError {}
