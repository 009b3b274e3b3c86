//! Shared request-handler state, built once from the loaded configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::FromRef;
use tokio::task::JoinHandle;
use tracing::info;

use crate::auth::api_key::ApiKeyGate;
use crate::auth::csrf::CsrfStateStore;
use crate::auth::federated::FederatedLogin;
use crate::auth::oidc::{IdentityProvider, OidcClient, build_http_client};
use crate::auth::session::{SessionSettings, SessionStore};
use crate::auth::store::spawn_sweeper;
use crate::config::AppConfig;

/// How often expired sessions and pending logins are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: SessionStore,
    /// `None` when federated login is disabled.
    pub federated: Option<FederatedLogin>,
    pub api_gate: ApiKeyGate,
}

impl AppState {
    /// Build the state, discovering the identity provider if federated
    /// login is enabled. Discovery failure is fatal.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let provider: Option<Arc<dyn IdentityProvider>> = match config.oidc_settings() {
            Some(settings) => {
                let http = build_http_client()?;
                let issuer = settings.issuer_url.clone();
                let client = OidcClient::discover(settings, http)
                    .await
                    .with_context(|| format!("Failed to initialize OIDC provider {}", issuer))?;
                Some(Arc::new(client))
            }
            None => {
                info!("Federated login is disabled");
                None
            }
        };

        Ok(Self::with_provider(config, provider))
    }

    /// Build the state around an already-constructed provider.
    pub fn with_provider(
        config: AppConfig,
        provider: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        let sessions = SessionStore::in_memory(SessionSettings {
            secure: config.server.use_https,
            lifetime: config.session_lifetime(),
        });

        let federated = provider.map(|provider| {
            FederatedLogin::new(
                provider,
                CsrfStateStore::in_memory(config.state_store.max_entries, config.state_ttl()),
                config.principal(),
                config.server.use_https,
            )
        });

        let api_gate = ApiKeyGate::from_digest(&config.api_key);

        Self {
            config: Arc::new(config),
            sessions,
            federated,
            api_gate,
        }
    }

    /// Start background reapers for expired sessions and pending logins.
    pub fn spawn_sweepers(&self, period: Duration) -> Vec<JoinHandle<()>> {
        let mut handles = vec![spawn_sweeper(self.sessions.backend(), period)];
        if let Some(federated) = &self.federated {
            handles.push(spawn_sweeper(federated.pending().backend(), period));
        }
        handles
    }

    pub fn secure_cookies(&self) -> bool {
        self.config.server.use_https
    }
}

impl FromRef<AppState> for SessionStore {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

impl FromRef<AppState> for ApiKeyGate {
    fn from_ref(state: &AppState) -> Self {
        state.api_gate.clone()
    }
}
