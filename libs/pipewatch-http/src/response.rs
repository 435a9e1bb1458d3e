use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

/// Type-erased response body.
pub type ResponseBody =
    http_body_util::combinators::UnsyncBoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// A response whose body has not been read yet.
///
/// Body reads stop at the client's `max_body_size`. The status is left for the
/// caller to interpret.
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
}

impl HttpResponse {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Buffer the whole body.
    ///
    /// # Errors
    /// [`HttpError::BodyTooLarge`] past the limit; [`HttpError::Transport`]
    /// if the connection drops mid-body.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        collect_capped(self.inner, self.max_body_size).await
    }

    /// # Errors
    /// As [`bytes`](Self::bytes), or [`HttpError::Json`] for an undecodable body.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let body = self.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

async fn collect_capped(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, HttpError> {
    let mut body = std::pin::pin!(response.into_body());
    let mut buf = Vec::new();

    while let Some(frame) = body.frame().await {
        let Some(chunk) = frame.map_err(HttpError::Transport)?.into_data().ok() else {
            // trailers
            continue;
        };
        let actual = buf.len() + chunk.len();
        if actual > limit {
            return Err(HttpError::BodyTooLarge { limit, actual });
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(Bytes::from(buf))
}
