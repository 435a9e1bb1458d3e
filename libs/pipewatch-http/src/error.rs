use std::time::Duration;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by [`HttpClient`](crate::HttpClient).
///
/// Non-2xx responses are not errors at this layer.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    /// A header name or value could not be encoded.
    #[error("invalid header: {0}")]
    Header(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// Connect, protocol, or mid-body I/O failure.
    #[error("connection failed: {0}")]
    Transport(#[source] BoxError),

    #[error("tls setup failed: {0}")]
    Tls(#[source] BoxError),

    #[error("response body exceeds {limit} bytes (read {actual})")]
    BodyTooLarge { limit: usize, actual: usize },

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// The buffer worker is gone; the client cannot send anymore.
    #[error("http client worker stopped")]
    ServiceClosed,

    #[error("unusable URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Scheme refused by the transport security mode.
    #[error("scheme '{scheme}' refused: {reason}")]
    SchemeRefused {
        scheme: String,
        reason: &'static str,
    },
}

impl HttpError {
    /// The peer could not be reached or did not answer, as opposed to a
    /// request that was never valid to begin with.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Transport(_) | Self::Tls(_) | Self::ServiceClosed
        )
    }

    pub(crate) fn header(err: impl std::fmt::Display) -> Self {
        Self::Header(err.to_string())
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}
