use crate::builder::HttpClientBuilder;
use crate::config::TransportSecurity;
use crate::error::HttpError;
use crate::request::RequestBuilder;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use tower::buffer::Buffer;

/// Future returned by the middleware stack.
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// The middleware stack behind its buffer worker.
pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// Pooled HTTP(S) client.
///
/// Clones share the pool and the buffer worker; concurrent requests do not
/// contend on a lock.
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: BufferedService,
    pub(crate) max_body_size: usize,
    pub(crate) transport_security: TransportSecurity,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("max_body_size", &self.max_body_size)
            .field("transport_security", &self.transport_security)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Client with [`HttpClientConfig::default`](crate::HttpClientConfig).
    ///
    /// # Errors
    /// See [`HttpClientBuilder::build`].
    pub fn new() -> Result<Self, HttpError> {
        HttpClientBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Start a request. `url` must be absolute; anything else fails with
    /// [`HttpError::InvalidUrl`] at send time.
    pub fn request(&self, method: http::Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(
            self.service.clone(),
            self.max_body_size,
            method,
            url.to_owned(),
            self.transport_security,
        )
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::POST, url)
    }

    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::PUT, url)
    }

    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::DELETE, url)
    }
}

/// Errors coming out of the buffer are either ours, boxed, or the buffer
/// reporting that its worker is gone.
pub(crate) fn map_buffer_error(err: tower::BoxError) -> HttpError {
    err.downcast::<HttpError>().map_or_else(
        |err| {
            tracing::error!(error = %err, "http buffer worker stopped");
            HttpError::ServiceClosed
        },
        |err| *err,
    )
}
