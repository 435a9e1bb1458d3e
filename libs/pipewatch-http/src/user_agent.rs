use crate::error::HttpError;
use http::{HeaderValue, Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that adds a User-Agent header to requests that lack one
#[derive(Clone)]
pub struct UserAgentLayer {
    user_agent: HeaderValue,
}

impl UserAgentLayer {
    /// Create a new `UserAgentLayer` with the specified user agent string
    ///
    /// # Errors
    /// Returns `HttpError::Header` if the user agent string is not valid
    pub fn try_new(user_agent: impl AsRef<str>) -> Result<Self, HttpError> {
        let user_agent =
            HeaderValue::from_str(user_agent.as_ref()).map_err(HttpError::header)?;
        Ok(Self { user_agent })
    }
}

impl<S> Layer<S> for UserAgentLayer {
    type Service = UserAgentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        UserAgentService {
            inner,
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Service that adds User-Agent header to requests
#[derive(Clone)]
pub struct UserAgentService<S> {
    inner: S,
    user_agent: HeaderValue,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for UserAgentService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        req.headers_mut()
            .entry(http::header::USER_AGENT)
            .or_insert_with(|| self.user_agent.clone());
        self.inner.call(req)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Method, StatusCode};
    use http_body_util::Full;
    use tower::ServiceExt;

    /// Echoes the User-Agent it received back as the response body.
    #[derive(Clone)]
    struct EchoUaService;

    impl Service<Request<Full<Bytes>>> for EchoUaService {
        type Response = Response<String>;
        type Error = Box<dyn std::error::Error + Send + Sync>;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            let ua = req
                .headers()
                .get(http::header::USER_AGENT)
                .map(|v| v.to_str().unwrap().to_owned())
                .unwrap_or_default();
            std::future::ready(Ok(Response::builder()
                .status(StatusCode::OK)
                .body(ua)
                .unwrap()))
        }
    }

    fn request(ua: Option<&str>) -> Request<Full<Bytes>> {
        let mut builder = Request::builder()
            .method(Method::GET)
            .uri("http://gateway.local/api/pipelines");
        if let Some(ua) = ua {
            builder = builder.header(http::header::USER_AGENT, ua);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    #[tokio::test]
    async fn adds_missing_user_agent() {
        let layer = UserAgentLayer::try_new("pipewatch-agent/0.3").unwrap();
        let svc = layer.layer(EchoUaService);

        let resp = svc.oneshot(request(None)).await.unwrap();
        assert_eq!(resp.body(), "pipewatch-agent/0.3");
    }

    #[tokio::test]
    async fn keeps_caller_user_agent() {
        let layer = UserAgentLayer::try_new("pipewatch-agent/0.3").unwrap();
        let svc = layer.layer(EchoUaService);

        let resp = svc.oneshot(request(Some("dashboard/2.0"))).await.unwrap();
        assert_eq!(resp.body(), "dashboard/2.0");
    }

    #[test]
    fn rejects_invalid_value() {
        assert!(UserAgentLayer::try_new("bad\x00agent").is_err());
    }
}
