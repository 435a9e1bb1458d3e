use http::StatusCode;
use pipewatch_http::HttpError;
use thiserror::Error;

/// Errors surfaced by the session client.
///
/// `Clone` so a single refresh failure can be delivered to every request that
/// was waiting on it. Variants carry rendered messages, never token values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    /// Transport failure (connection, TLS, timeout). Not retried by the
    /// dispatcher.
    #[error("network error: {0}")]
    Network(String),

    /// Authentication was rejected or cannot be attempted (401, missing
    /// refresh token).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The session could not be renewed and has been terminated.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// Well-formed `success: false` envelope; the message is the server's.
    #[error("{message}")]
    Application { status: StatusCode, message: String },

    /// Non-2xx response whose body was not a usable envelope.
    #[error("HTTP {status}: {message}")]
    Http { status: StatusCode, message: String },

    /// A successful response could not be decoded into the expected shape.
    #[error("invalid response: {0}")]
    Decode(String),

    /// The request could not be built (bad header, bad URL).
    #[error("invalid request: {0}")]
    Request(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Convert a transport error, prefixing the caller context.
    ///
    /// Only the error class and its source text are kept; response bodies
    /// never reach the message.
    #[must_use]
    pub fn from_http(err: &HttpError, context: &str) -> Self {
        if err.is_network() {
            Self::Network(format!("{context}: {err}"))
        } else {
            match err {
                HttpError::BodyTooLarge { .. } | HttpError::Json(_) => {
                    Self::Decode(format!("{context}: {err}"))
                }
                _ => Self::Request(format!("{context}: {err}")),
            }
        }
    }

    /// Failures worth retrying with backoff: transport errors and 5xx
    /// responses.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } | Self::Application { status, .. } => {
                status.is_server_error()
            }
            _ => false,
        }
    }

    /// Short, stable label for the error class.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Auth(_) => "auth",
            Self::SessionExpired(_) => "session_expired",
            Self::Application { .. } => "application",
            Self::Http { .. } => "http",
            Self::Decode(_) => "decode",
            Self::Request(_) => "request",
            Self::Config(_) => "config",
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeout_is_network() {
        let err = SessionError::from_http(&HttpError::Timeout(Duration::from_secs(5)), "refresh");
        assert!(matches!(err, SessionError::Network(ref m) if m.starts_with("refresh: ")));
        assert!(err.is_transient());
    }

    #[test]
    fn refused_scheme_is_request_error() {
        let err = SessionError::from_http(
            &HttpError::SchemeRefused {
                scheme: "http".into(),
                reason: "TLS required",
            },
            "API request",
        );
        assert_eq!(err.kind(), "request");
        assert!(!err.is_transient());
    }

    #[test]
    fn application_error_renders_server_message() {
        let err = SessionError::Application {
            status: StatusCode::OK,
            message: "station offline".into(),
        };
        assert_eq!(err.to_string(), "station offline");
    }

    #[test]
    fn server_errors_are_transient() {
        let err = SessionError::Http {
            status: StatusCode::BAD_GATEWAY,
            message: "Bad Gateway".into(),
        };
        assert!(err.is_transient());
        assert!(!SessionError::Auth("rejected".into()).is_transient());
    }
}
