//! The `{ success, data, message, error }` wrapper every API response uses.

use http::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::error::SessionError;

/// Wire shape of an API response envelope.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Envelope {
    /// Server-provided failure text, preferring `message` over `error`.
    #[must_use]
    pub fn failure_message(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .filter(|m| !m.trim().is_empty())
    }
}

/// Interpret a non-401 response.
///
/// - 2xx with `success: true` unwraps to `data` (`null` when absent).
/// - 2xx with `success: false` is an application error.
/// - 2xx without an envelope is returned as-is; an empty body is `null`.
/// - non-2xx with a `success: false` envelope carrying a message is an
///   application error with that message.
/// - anything else non-2xx falls back to the status text.
///
/// # Errors
///
/// See above; a 2xx body that is not JSON yields [`SessionError::Decode`].
pub fn decode_response(status: StatusCode, body: &[u8]) -> Result<Value, SessionError> {
    let parsed: Option<Value> = if body.iter().all(u8::is_ascii_whitespace) {
        Some(Value::Null)
    } else {
        serde_json::from_slice(body).ok()
    };

    if status.is_success() {
        let Some(value) = parsed else {
            return Err(SessionError::Decode(format!(
                "HTTP {status} response body is not JSON"
            )));
        };
        return match as_envelope(&value) {
            Some(envelope) if envelope.success => Ok(envelope.data.unwrap_or(Value::Null)),
            Some(envelope) => Err(SessionError::Application {
                status,
                message: envelope
                    .failure_message()
                    .unwrap_or("request was not successful")
                    .to_owned(),
            }),
            None => Ok(value),
        };
    }

    if let Some(envelope) = parsed.as_ref().and_then(as_envelope)
        && !envelope.success
        && let Some(message) = envelope.failure_message()
    {
        return Err(SessionError::Application {
            status,
            message: message.to_owned(),
        });
    }

    Err(SessionError::Http {
        status,
        message: status_text(status),
    })
}

fn as_envelope(value: &Value) -> Option<Envelope> {
    let object = value.as_object()?;
    if !object.get("success").is_some_and(Value::is_boolean) {
        return None;
    }
    Envelope::deserialize(value).ok()
}

/// Canonical reason phrase, or the bare code for unregistered statuses.
#[must_use]
pub fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| status.as_str().to_owned(), str::to_owned)
}
