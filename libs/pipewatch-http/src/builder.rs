use std::time::Duration;

use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::{ServiceBuilder, ServiceExt};

use crate::client::{BufferedService, HttpClient};
use crate::config::{HttpClientConfig, TransportSecurity};
use crate::error::HttpError;
use crate::response::ResponseBody;
use crate::tls;
use crate::user_agent::UserAgentLayer;

/// Configures and builds an [`HttpClient`].
///
/// `build()` spawns the buffer worker, so it must run inside a tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct HttpClientBuilder {
    config: HttpClientConfig,
}

impl HttpClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Upper bound for a buffered response body.
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Plain HTTP for local gateways and mock servers.
    ///
    /// Release builds need the `allow-insecure-http` feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(self) -> Self {
        self.transport(TransportSecurity::AllowInsecureHttp)
    }

    /// Queue depth in front of the connection pool (minimum 1).
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity.max(1);
        self
    }

    /// # Errors
    /// Returns [`HttpError::Tls`] if the rustls provider cannot be set up, or
    /// [`HttpError::Header`] for an unusable user agent.
    pub fn build(self) -> Result<HttpClient, HttpError> {
        let HttpClientConfig {
            request_timeout,
            max_body_size,
            user_agent,
            transport,
            buffer_capacity,
            pool_max_idle_per_host,
        } = self.config;

        if transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!("plain HTTP allowed; bearer tokens are sent unencrypted");
        }

        let connector = tls::build_https_connector(transport)?;
        let pool = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(pool_max_idle_per_host)
            .build::<_, Full<Bytes>>(connector);

        // Buffer -> Timeout -> UserAgent -> pool
        let stack = ServiceBuilder::new()
            .layer(TimeoutLayer::new(request_timeout))
            .layer(UserAgentLayer::try_new(&user_agent)?)
            .service(pool)
            .map_response(into_boxed_body)
            .map_err(move |e: tower::BoxError| classify(e, request_timeout))
            .boxed_clone();
        let service: BufferedService = Buffer::new(stack, buffer_capacity.max(1));

        Ok(HttpClient {
            service,
            max_body_size,
            transport_security: transport,
        })
    }
}

fn into_boxed_body(response: Response<hyper::body::Incoming>) -> Response<ResponseBody> {
    response.map(|body| body.map_err(Into::into).boxed_unsync())
}

fn classify(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }
    match err.downcast::<HttpError>() {
        Ok(err) => *err,
        Err(other) => HttpError::Transport(other),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_AGENT;

    #[test]
    fn starts_from_default_config() {
        let builder = HttpClientBuilder::new();
        assert_eq!(builder.config.request_timeout, Duration::from_secs(30));
        assert_eq!(builder.config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(builder.config.transport, TransportSecurity::TlsOnly);
    }

    #[test]
    fn zero_buffer_capacity_becomes_one() {
        let builder = HttpClientBuilder::new().buffer_capacity(0);
        assert_eq!(builder.config.buffer_capacity, 1);
    }

    #[test]
    fn elapsed_reports_configured_timeout() {
        let err: tower::BoxError = Box::new(tower::timeout::error::Elapsed::new());
        let mapped = classify(err, Duration::from_secs(3));
        assert!(matches!(mapped, HttpError::Timeout(d) if d == Duration::from_secs(3)));
    }

    #[test]
    fn inner_http_errors_pass_through() {
        let err: tower::BoxError = Box::new(HttpError::ServiceClosed);
        assert!(matches!(
            classify(err, Duration::from_secs(1)),
            HttpError::ServiceClosed
        ));
    }

    #[tokio::test]
    async fn invalid_user_agent_is_rejected() {
        let result = HttpClientBuilder::new().user_agent("bad\nagent").build();
        assert!(matches!(result, Err(HttpError::Header(_))));
    }
}
