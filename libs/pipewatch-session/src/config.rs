use std::path::PathBuf;
use std::time::Duration;

use pipewatch_http::HttpClientConfig;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SessionError;
use crate::guard::GuardConfig;
use crate::token_store::DEFAULT_EXPIRY_BUFFER;

/// Everything needed to build a [`SessionClient`](crate::SessionClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// API origin, optionally with a path prefix (`https://api.example.com/v2`).
    pub base_url: String,

    pub endpoints: AuthEndpoints,

    /// Access tokens count as expired this long before their real expiry.
    #[serde(with = "crate::humantime_serde")]
    pub expiry_buffer: Duration,

    pub refresh: RefreshPolicy,

    pub guard: GuardConfig,

    pub persistence: PersistenceConfig,

    pub http: HttpClientConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:8443".to_owned(),
            endpoints: AuthEndpoints::default(),
            expiry_buffer: DEFAULT_EXPIRY_BUFFER,
            refresh: RefreshPolicy::default(),
            guard: GuardConfig::default(),
            persistence: PersistenceConfig::default(),
            http: HttpClientConfig::default(),
        }
    }
}

/// Auth endpoint paths, relative to `base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthEndpoints {
    pub login: String,
    pub refresh: String,
    pub logout: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "/api/auth/login".to_owned(),
            refresh: "/api/auth/refresh".to_owned(),
            logout: "/api/auth/logout".to_owned(),
        }
    }
}

/// Proactive refresh timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshPolicy {
    /// Share of the remaining lifetime to wait before refreshing, in percent.
    pub refresh_at_percent: u8,

    /// Delay used when the session expiry is unknown.
    #[serde(with = "crate::humantime_serde")]
    pub default_delay: Duration,

    /// First backoff after a failed proactive refresh; doubles per retry.
    #[serde(with = "crate::humantime_serde")]
    pub initial_backoff: Duration,

    /// Retries after the first failed attempt.
    pub max_retries: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            refresh_at_percent: 80,
            default_delay: Duration::from_secs(4 * 60),
            initial_backoff: Duration::from_secs(5),
            max_retries: 2,
        }
    }
}

/// Where tokens are persisted. Both sinks are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Full session as JSON; enables resume across restarts.
    pub session_file: Option<PathBuf>,
    /// Access token only, read by the edge route guard.
    pub access_marker_file: Option<PathBuf>,
}

impl SessionConfig {
    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if:
    /// - `base_url` is not an absolute http(s) URL with a host,
    /// - an endpoint path does not start with `/`,
    /// - `refresh_at_percent` is outside `1..=100`.
    pub fn validate(&self) -> Result<(), SessionError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| SessionError::Config(format!("base_url '{}': {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SessionError::Config(format!(
                "base_url scheme must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(SessionError::Config("base_url has no host".to_owned()));
        }

        for (name, path) in [
            ("login", &self.endpoints.login),
            ("refresh", &self.endpoints.refresh),
            ("logout", &self.endpoints.logout),
        ] {
            if !path.starts_with('/') {
                return Err(SessionError::Config(format!(
                    "endpoints.{name} must start with '/', got '{path}'"
                )));
            }
        }

        if !(1..=100).contains(&self.refresh.refresh_at_percent) {
            return Err(SessionError::Config(format!(
                "refresh.refresh_at_percent must be within 1..=100, got {}",
                self.refresh.refresh_at_percent
            )));
        }

        Ok(())
    }

    /// Absolute URL for an API path. Absolute `http(s)://` inputs pass
    /// through unchanged.
    #[must_use]
    pub fn endpoint_url(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            return path.to_owned();
        }
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}
