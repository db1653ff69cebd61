//! Configuration for Tally.
//!
//! Loaded from `~/.tally/config.toml`. Every field is optional; [`TallyConfig::resolve`]
//! fills in defaults and validates what needs validating (the API base URL).
//!
//! ```toml
//! [api]
//! base_url = "https://api.example.com"
//! timeout_seconds = 30
//! token = "${TALLY_TOKEN}"
//!
//! [session]
//! credential_path = "~/.tally/credential"
//! identity_path = "/auth/me"
//!
//! [routes]
//! sign_in = "/sign-in"
//! landing = "/dashboard"
//! auth_only = ["/sign-in", "/sign-up", "/forgot-password"]
//!
//! [query]
//! stale_time_ms = 30000
//! gc_horizon_seconds = 300
//! read_retries = 2
//! mutation_retries = 1
//! ```

use serde::Deserialize;
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDENTITY_PATH: &str = "/auth/me";
pub const DEFAULT_SIGN_IN_ROUTE: &str = "/sign-in";
pub const DEFAULT_LANDING_ROUTE: &str = "/dashboard";
pub const DEFAULT_AUTH_ONLY_ROUTES: &[&str] = &["/sign-in", "/sign-up", "/forgot-password"];

pub const DEFAULT_STALE_TIME_MS: u64 = 30_000;
pub const DEFAULT_GC_HORIZON_SECS: u64 = 300;
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_READ_RETRIES: u32 = 2;
pub const DEFAULT_MUTATION_RETRIES: u32 = 1;
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

const CONFIG_DIR: &str = ".tally";
const CONFIG_FILE: &str = "config.toml";
const CREDENTIAL_FILE: &str = "credential";

#[derive(Debug, Default, Deserialize)]
pub struct TallyConfig {
    pub api: Option<ApiConfig>,
    pub session: Option<SessionConfig>,
    pub routes: Option<RoutesConfig>,
    pub query: Option<QueryConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid api.base_url {value:?}: {source}")]
    BaseUrl {
        value: String,
        source: url::ParseError,
    },
}

impl ConfigError {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::BaseUrl { .. } => None,
        }
    }
}

#[derive(Default, Deserialize)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    /// Credential override. Takes precedence over the credential file.
    pub token: Option<String>,
}

// Manual Debug impl to prevent leaking the token in logs.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("timeout_seconds", &self.timeout_seconds)
            .field(
                "token",
                &if self.token.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionConfig {
    /// Where the credential is persisted between runs.
    pub credential_path: Option<String>,
    /// Path of the identity endpoint, relative to `api.base_url`.
    pub identity_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoutesConfig {
    /// Protected trees redirect here when nobody is signed in.
    pub sign_in: Option<String>,
    /// Auth-only trees redirect here when somebody is signed in.
    pub landing: Option<String>,
    /// Routes only shown to signed-out users.
    pub auth_only: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryConfig {
    pub stale_time_ms: Option<u64>,
    pub gc_horizon_seconds: Option<u64>,
    pub gc_interval_seconds: Option<u64>,
    pub read_retries: Option<u32>,
    pub mutation_retries: Option<u32>,
    pub retry_initial_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
}

/// Configuration with every default applied.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub api: ResolvedApi,
    pub session: ResolvedSession,
    pub routes: ResolvedRoutes,
    pub query: ResolvedQuery,
}

#[derive(Clone)]
pub struct ResolvedApi {
    pub base_url: Url,
    pub timeout: Duration,
    pub token: Option<String>,
}

impl std::fmt::Debug for ResolvedApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedApi")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field(
                "token",
                &if self.token.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub credential_path: PathBuf,
    pub identity_path: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedRoutes {
    pub sign_in: String,
    pub landing: String,
    pub auth_only: Vec<String>,
}

impl ResolvedRoutes {
    #[must_use]
    pub fn is_auth_only(&self, route: &str) -> bool {
        self.auth_only.iter().any(|r| r == route)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedQuery {
    pub stale_time: Duration,
    pub gc_horizon: Duration,
    pub gc_interval: Duration,
    pub read_retries: u32,
    pub mutation_retries: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for ResolvedQuery {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_millis(DEFAULT_STALE_TIME_MS),
            gc_horizon: Duration::from_secs(DEFAULT_GC_HORIZON_SECS),
            gc_interval: Duration::from_secs(DEFAULT_GC_INTERVAL_SECS),
            read_retries: DEFAULT_READ_RETRIES,
            mutation_retries: DEFAULT_MUTATION_RETRIES,
            retry_initial_delay: Duration::from_millis(DEFAULT_RETRY_INITIAL_DELAY_MS),
            retry_max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

/// Replace `${VAR}` with the value of `VAR` (missing vars become empty).
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if var.is_empty() {
                    out.push_str("${}");
                } else {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Expand `${VAR}` references and a leading `~/`.
fn expand_path(value: &str) -> PathBuf {
    let expanded = expand_env_vars(value);
    if let Some(rest) = expanded.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(expanded)
}

impl TallyConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let api = self.api.as_ref();
        let raw_base = api
            .and_then(|a| a.base_url.as_deref())
            .map_or_else(|| DEFAULT_BASE_URL.to_string(), expand_env_vars);
        let base_url = Url::parse(&raw_base).map_err(|source| ConfigError::BaseUrl {
            value: raw_base.clone(),
            source,
        })?;
        let token = api
            .and_then(|a| a.token.as_deref())
            .map(expand_env_vars)
            .filter(|t| !t.trim().is_empty());

        let session = self.session.as_ref();
        let credential_path = session
            .and_then(|s| s.credential_path.as_deref())
            .map(expand_path)
            .or_else(default_credential_path)
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CREDENTIAL_FILE));

        let routes = self.routes.as_ref();
        let query = self.query.as_ref();
        let defaults = ResolvedQuery::default();

        Ok(ResolvedConfig {
            api: ResolvedApi {
                base_url,
                timeout: Duration::from_secs(
                    api.and_then(|a| a.timeout_seconds)
                        .unwrap_or(DEFAULT_TIMEOUT_SECS),
                ),
                token,
            },
            session: ResolvedSession {
                credential_path,
                identity_path: session
                    .and_then(|s| s.identity_path.clone())
                    .unwrap_or_else(|| DEFAULT_IDENTITY_PATH.to_string()),
            },
            routes: ResolvedRoutes {
                sign_in: routes
                    .and_then(|r| r.sign_in.clone())
                    .unwrap_or_else(|| DEFAULT_SIGN_IN_ROUTE.to_string()),
                landing: routes
                    .and_then(|r| r.landing.clone())
                    .unwrap_or_else(|| DEFAULT_LANDING_ROUTE.to_string()),
                auth_only: routes.and_then(|r| r.auth_only.clone()).unwrap_or_else(|| {
                    DEFAULT_AUTH_ONLY_ROUTES
                        .iter()
                        .map(ToString::to_string)
                        .collect()
                }),
            },
            query: ResolvedQuery {
                stale_time: query
                    .and_then(|q| q.stale_time_ms)
                    .map_or(defaults.stale_time, Duration::from_millis),
                gc_horizon: query
                    .and_then(|q| q.gc_horizon_seconds)
                    .map_or(defaults.gc_horizon, Duration::from_secs),
                gc_interval: query
                    .and_then(|q| q.gc_interval_seconds)
                    .map_or(defaults.gc_interval, Duration::from_secs),
                read_retries: query
                    .and_then(|q| q.read_retries)
                    .unwrap_or(defaults.read_retries),
                mutation_retries: query
                    .and_then(|q| q.mutation_retries)
                    .unwrap_or(defaults.mutation_retries),
                retry_initial_delay: query
                    .and_then(|q| q.retry_initial_delay_ms)
                    .map_or(defaults.retry_initial_delay, Duration::from_millis),
                retry_max_delay: query
                    .and_then(|q| q.retry_max_delay_ms)
                    .map_or(defaults.retry_max_delay, Duration::from_millis),
            },
        })
    }
}

pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR))
}

pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}

fn default_credential_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CREDENTIAL_FILE))
}
