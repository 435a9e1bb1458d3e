//! Login, refresh, and logout calls against the `PipeWatch` auth endpoints.

use std::fmt;

use async_trait::async_trait;
use http::StatusCode;
use pipewatch_http::HttpClient;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::config::SessionConfig;
use crate::envelope::{decode_response, status_text};
use crate::error::SessionError;
use crate::secret::SecretString;
use crate::types::{Session, TokenGrant};

/// Username and password for the login endpoint.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<SecretString>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password)
            .finish()
    }
}

// Request body of the login call; the only place the password is exposed.
impl Serialize for Credentials {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Credentials", 2)?;
        state.serialize_field("username", &self.username)?;
        state.serialize_field("password", self.password.expose())?;
        state.end()
    }
}

/// The three auth operations the session client depends on.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for a token pair.
    ///
    /// # Errors
    ///
    /// [`SessionError::Auth`] when the credentials are rejected,
    /// [`SessionError::Network`] on transport failure.
    async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, SessionError>;

    /// Exchange a refresh token for a new token pair.
    ///
    /// # Errors
    ///
    /// [`SessionError::Auth`] when the refresh token is rejected (401/403),
    /// [`SessionError::Network`] on transport failure, anything else the
    /// envelope decoder produces.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, SessionError>;

    /// Best-effort server-side invalidation.
    ///
    /// # Errors
    ///
    /// Any failure; callers log and ignore it.
    async fn logout(&self, session: &Session) -> Result<(), SessionError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// [`AuthApi`] over HTTP, using the response envelope.
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    http: HttpClient,
    login_url: String,
    refresh_url: String,
    logout_url: String,
}

impl HttpAuthApi {
    #[must_use]
    pub fn new(http: HttpClient, config: &SessionConfig) -> Self {
        Self {
            http,
            login_url: config.endpoint_url(&config.endpoints.login),
            refresh_url: config.endpoint_url(&config.endpoints.refresh),
            logout_url: config.endpoint_url(&config.endpoints.logout),
        }
    }

    async fn request_grant<B: Serialize + Sync>(
        &self,
        url: &str,
        body: &B,
        context: &str,
    ) -> Result<TokenGrant, SessionError> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| SessionError::from_http(&e, context))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SessionError::from_http(&e, context))?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let reason = match decode_response(status, &bytes) {
                Err(SessionError::Application { message, .. }) => message,
                _ => status_text(status),
            };
            return Err(SessionError::Auth(format!("{context} rejected: {reason}")));
        }

        let data = decode_response(status, &bytes)?;
        serde_json::from_value(data)
            .map_err(|e| SessionError::Decode(format!("{context} response: {e}")))
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, SessionError> {
        tracing::debug!(username = %credentials.username, "logging in");
        self.request_grant(&self.login_url, credentials, "login")
            .await
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, SessionError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.expose(),
        };
        self.request_grant(&self.refresh_url, &body, "token refresh")
            .await
    }

    async fn logout(&self, session: &Session) -> Result<(), SessionError> {
        let body = RefreshRequest {
            refresh_token: session.refresh_token().expose(),
        };
        let response = self
            .http
            .post(&self.logout_url)
            .bearer_auth(session.access_token().expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::from_http(&e, "logout"))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SessionError::from_http(&e, "logout"))?;
        decode_response(status, &bytes).map(drop)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("operator", "hunter2");
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("operator"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn credentials_serialize_for_login_body() {
        let creds = Credentials::new("operator", "hunter2");
        let body = serde_json::to_value(&creds).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"username": "operator", "password": "hunter2"})
        );
    }

    #[test]
    fn refresh_body_is_camel_case() {
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: "rt",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"refreshToken": "rt"}));
    }

    #[tokio::test]
    async fn urls_are_resolved_against_base() {
        let config = SessionConfig {
            base_url: "https://api.pipewatch.example".into(),
            ..SessionConfig::default()
        };
        let http = HttpClient::builder().build().unwrap();
        let api = HttpAuthApi::new(http, &config);
        assert_eq!(api.refresh_url, "https://api.pipewatch.example/api/auth/refresh");
        assert_eq!(api.logout_url, "https://api.pipewatch.example/api/auth/logout");
    }
}
