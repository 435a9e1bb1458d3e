use crate::client::{BufferedService, map_buffer_error};
use crate::config::TransportSecurity;
use crate::error::HttpError;
use crate::response::HttpResponse;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::{Request, Uri};
use http_body_util::Full;
use serde::Serialize;
use tower::{Service, ServiceExt};

/// HTTP request builder with fluent API
///
/// Created by [`HttpClient::get`](crate::HttpClient::get),
/// [`HttpClient::request`](crate::HttpClient::request), etc. Builder errors
/// (bad header, serialization failure) are deferred to [`send`](Self::send).
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    service: BufferedService,
    max_body_size: usize,
    method: http::Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
    error: Option<HttpError>,
    transport_security: TransportSecurity,
}

impl RequestBuilder {
    pub(crate) fn new(
        service: BufferedService,
        max_body_size: usize,
        method: http::Method,
        url: String,
        transport_security: TransportSecurity,
    ) -> Self {
        Self {
            service,
            max_body_size,
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            error: None,
            transport_security,
        }
    }

    /// Add a single header, replacing any previous value of the same name
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => self.error = Some(HttpError::header(e)),
            (_, Err(e)) => self.error = Some(HttpError::header(e)),
        }
        self
    }

    /// Set `Authorization: Bearer <token>`, marked sensitive so it is never
    /// printed by hyper's debug output
    pub fn bearer_auth(mut self, token: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        match HeaderValue::try_from(format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.insert(AUTHORIZATION, value);
            }
            Err(e) => self.error = Some(HttpError::header(e)),
        }
        self
    }

    /// Merge a prepared header map into the request
    pub fn headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Set a raw request body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set request body as JSON
    ///
    /// Sets `Content-Type: application/json` unless the caller already
    /// provided a content type.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        if self.error.is_some() {
            return self;
        }
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.body = Bytes::from(bytes);
                self.headers
                    .entry(CONTENT_TYPE)
                    .or_insert(HeaderValue::from_static("application/json"));
            }
            Err(e) => self.error = Some(HttpError::Json(e)),
        }
        self
    }

    /// Send the request
    ///
    /// # Errors
    ///
    /// Returns the first deferred builder error, [`HttpError::InvalidUrl`] /
    /// [`HttpError::SchemeRefused`] for unusable URLs, or a transport,
    /// timeout, or TLS error. Non-2xx statuses are **not** errors.
    pub async fn send(self) -> Result<HttpResponse, HttpError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let uri = validate_url(&self.url, self.transport_security)?;

        let mut request = Request::builder()
            .method(self.method)
            .uri(uri)
            .body(Full::new(self.body))?;
        *request.headers_mut() = self.headers;

        let mut service = self.service;
        let response = service
            .ready()
            .await
            .map_err(map_buffer_error)?
            .call(request)
            .await
            .map_err(map_buffer_error)?;

        Ok(HttpResponse {
            inner: response,
            max_body_size: self.max_body_size,
        })
    }
}

/// Absolute URL check; plain `http` only when insecure transport is allowed.
fn validate_url(url: &str, transport: TransportSecurity) -> Result<Uri, HttpError> {
    let invalid = |reason: &str| HttpError::InvalidUrl {
        url: url.to_owned(),
        reason: reason.to_owned(),
    };

    let uri: Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
    let scheme = uri
        .scheme_str()
        .ok_or_else(|| invalid("not an absolute URL"))?;
    if uri.authority().is_none() {
        return Err(invalid("no host"));
    }

    let refused = |reason| HttpError::SchemeRefused {
        scheme: scheme.to_owned(),
        reason,
    };
    match (scheme, transport) {
        ("https", _) | ("http", TransportSecurity::AllowInsecureHttp) => {}
        ("http", TransportSecurity::TlsOnly) => return Err(refused("tls required")),
        _ => return Err(refused("only http and https are supported")),
    }
    Ok(uri)
}
