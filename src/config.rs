use serde::Deserialize;
use std::{env, fmt, fs, net::IpAddr, net::SocketAddr, path::Path, path::PathBuf, time::Duration};
use tracing::warn;
use url::Url;

use crate::auth::api_key::parse_digest;
use crate::auth::csrf::{DEFAULT_MAX_PENDING, DEFAULT_STATE_TTL};
use crate::auth::oidc::OidcSettings;
use crate::auth::session::DEFAULT_SESSION_LIFETIME;
use crate::types::Username;

pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const MAX_USERNAME_LEN: usize = 64;

/// Upper bound on the session lifetime.
const MAX_SESSION_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Validated application configuration. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub user: UserConfig,
    #[serde(default)]
    pub session_timeout: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, alias = "kanidm")]
    pub oidc: OidcConfig,
    #[serde(default)]
    pub state_store: StateStoreConfig,

    #[serde(skip)]
    session_lifetime: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u32,
    #[serde(default)]
    pub use_https: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT as u32,
            use_https: false,
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub username: String,
    /// Tagged digest, e.g. `{bcrypt}$2b$12$...`.
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct OidcConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub issuer_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcConfig")
            .field("enabled", &self.enabled)
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateStoreConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_state_ttl")]
    pub ttl_seconds: u64,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_seconds: default_state_ttl(),
        }
    }
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_PENDING
}

fn default_state_ttl() -> u64 {
    DEFAULT_STATE_TTL.as_secs()
}

impl AppConfig {
    /// Read, expand and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.expand().validate()
    }

    fn expand(mut self) -> Self {
        self.user.username = expand_env_vars(&self.user.username);
        self.user.password = expand_env_vars(&self.user.password);
        self.api_key = expand_env_vars(&self.api_key);
        self.oidc.issuer_url = expand_env_vars(&self.oidc.issuer_url);
        self.oidc.client_id = expand_env_vars(&self.oidc.client_id);
        self.oidc.client_secret = expand_env_vars(&self.oidc.client_secret);
        self.oidc.redirect_url = expand_env_vars(&self.oidc.redirect_url);
        self
    }

    fn validate(mut self) -> Result<Self, ConfigError> {
        if self.server.address.is_empty() {
            self.server.address = DEFAULT_ADDRESS.to_string();
        } else if self.server.address.parse::<IpAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "invalid server address: {}",
                self.server.address
            )));
        }

        if self.server.port == 0 {
            self.server.port = DEFAULT_PORT as u32;
        } else if self.server.port > u16::MAX as u32 {
            return Err(ConfigError::Invalid(format!(
                "invalid port: {} (must be between 1 and 65535)",
                self.server.port
            )));
        }

        let username_len = self.user.username.chars().count();
        if username_len == 0 {
            return Err(ConfigError::Invalid("username must be set".to_string()));
        }
        if username_len > MAX_USERNAME_LEN {
            return Err(ConfigError::Invalid(format!(
                "username length must be between 1 and {} characters",
                MAX_USERNAME_LEN
            )));
        }

        if self.user.password.is_empty() {
            return Err(ConfigError::Invalid(
                "password must be set (a {bcrypt} digest)".to_string(),
            ));
        }

        if self.api_key.is_empty() {
            warn!("api_key is empty, the API will reject every request");
        } else {
            parse_digest(&self.api_key)
                .map_err(|e| ConfigError::Invalid(format!("api_key: {}", e)))?;
        }

        self.session_lifetime = match parse_duration(&self.session_timeout) {
            Some(lifetime) => lifetime.min(MAX_SESSION_LIFETIME),
            None => {
                warn!(
                    "Invalid session_timeout {:?}, using default of 7 days",
                    self.session_timeout
                );
                DEFAULT_SESSION_LIFETIME
            }
        };

        if self.state_store.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "state_store.max_entries must be positive".to_string(),
            ));
        }
        if self.state_store.ttl_seconds == 0 {
            return Err(ConfigError::Invalid(
                "state_store.ttl_seconds must be positive".to_string(),
            ));
        }

        if self.oidc.enabled {
            self.validate_oidc()?;
        }

        Ok(self)
    }

    fn validate_oidc(&mut self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("issuer_url", &self.oidc.issuer_url),
            ("client_id", &self.oidc.client_id),
            ("redirect_url", &self.oidc.redirect_url),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!("oidc.{} must be set", field)));
            }
        }

        for (field, value) in [
            ("issuer_url", &self.oidc.issuer_url),
            ("redirect_url", &self.oidc.redirect_url),
        ] {
            Url::parse(value)
                .map_err(|e| ConfigError::Invalid(format!("oidc.{}: {}", field, e)))?;
        }

        if self.oidc.scopes.is_empty() {
            self.oidc.scopes = ["openid", "profile", "email"]
                .into_iter()
                .map(String::from)
                .collect();
        } else if !self.oidc.scopes.iter().any(|s| s == "openid") {
            self.oidc.scopes.insert(0, "openid".to_string());
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .server
            .address
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid server address: {}", self.server.address)))?;
        let port = u16::try_from(self.server.port)
            .map_err(|_| ConfigError::Invalid(format!("invalid port: {}", self.server.port)))?;
        Ok(SocketAddr::new(ip, port))
    }

    pub fn session_lifetime(&self) -> Duration {
        self.session_lifetime
    }

    pub fn principal(&self) -> Username {
        Username::new(self.user.username.clone())
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_store.ttl_seconds)
    }

    /// Provider settings when federated login is enabled.
    pub fn oidc_settings(&self) -> Option<OidcSettings> {
        self.oidc.enabled.then(|| OidcSettings {
            issuer_url: self.oidc.issuer_url.clone(),
            client_id: self.oidc.client_id.clone(),
            client_secret: self.oidc.client_secret.clone(),
            redirect_url: self.oidc.redirect_url.clone(),
            scopes: self.oidc.scopes.clone(),
        })
    }
}

/// Locate the configuration file: explicit path, then `GATEHOUSE_CONFIG`,
/// then `./config.json`.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    if let Ok(p) = env::var("GATEHOUSE_CONFIG") {
        return Ok(PathBuf::from(p));
    }

    let candidate = PathBuf::from("config.json");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(ConfigError::Read(
        "Could not find config.json (pass --config or set GATEHOUSE_CONFIG)".to_string(),
    ))
}

/// Parse `<n>s|m|h|d` segments, e.g. `30m`, `168h`, `1d12h`. Returns `None`
/// for anything malformed or zero.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for ch in input.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }

        let unit = match ch {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            _ => return None,
        };
        let value: u64 = digits.parse().ok()?;
        total = total.checked_add(value.checked_mul(unit)?)?;
        digits.clear();
    }

    if !digits.is_empty() || total == 0 {
        return None;
    }
    Some(Duration::from_secs(total))
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            match env::var(&name) {
                Ok(val) if closed => out.push_str(&val),
                _ => {
                    out.push_str("${");
                    out.push_str(&name);
                    if closed {
                        out.push('}');
                    }
                }
            }
        } else {
            out.push(ch);
        }
    }

    out
}

#[derive(Debug)]
pub enum ConfigError {
    Read(String),
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(msg) => write!(f, "Failed to read config file: {}", msg),
            Self::Parse(msg) => write!(f, "Invalid config format: {}", msg),
            Self::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
