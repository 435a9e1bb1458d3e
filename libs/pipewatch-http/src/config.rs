use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("pipewatch-http/", env!("CARGO_PKG_VERSION"));

/// Transport security configuration
///
/// Controls whether the client enforces TLS or allows insecure HTTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only) - default and recommended
    #[default]
    TlsOnly,
    /// Allow insecure HTTP connections (local gateways and mock servers)
    ///
    /// **WARNING**: traffic, including bearer tokens, is sent in clear text.
    AllowInsecureHttp,
}

/// Overall HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Per-request timeout in milliseconds (default: 30 seconds)
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,

    /// Maximum response body size in bytes (default: 10 MB)
    pub max_body_size: usize,

    /// User-Agent header value
    pub user_agent: String,

    /// Transport security mode (default: `TlsOnly`)
    pub transport: TransportSecurity,

    /// Buffer capacity for concurrent request handling (default: 1024)
    ///
    /// Requests beyond this many in the queue wait for a slot.
    pub buffer_capacity: usize,

    /// Maximum number of idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            transport: TransportSecurity::TlsOnly,
            buffer_capacity: 1024,
            pool_max_idle_per_host: 32,
        }
    }
}

impl HttpClientConfig {
    /// Configuration for talking to local mock servers in tests
    ///
    /// Allows plain HTTP and uses a short timeout.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024,
            transport: TransportSecurity::AllowInsecureHttp,
            buffer_capacity: 64,
            ..Self::default()
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn default_is_tls_only() {
        let cfg = HttpClientConfig::default();
        assert_eq!(cfg.transport, TransportSecurity::TlsOnly);
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn for_testing_allows_http() {
        let cfg = HttpClientConfig::for_testing();
        assert_eq!(cfg.transport, TransportSecurity::AllowInsecureHttp);
        assert_eq!(cfg.max_body_size, 1024 * 1024);
    }

    #[test]
    fn deserializes_partial_config() {
        let cfg: HttpClientConfig = serde_json::from_str(
            r#"{"request_timeout_ms":2500,"transport":"allow_insecure_http"}"#,
        )
        .unwrap();
        assert_eq!(cfg.request_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.transport, TransportSecurity::AllowInsecureHttp);
        assert_eq!(cfg.buffer_capacity, 1024);
    }
}
