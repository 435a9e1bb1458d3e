//! Authenticated request dispatch with transparent token refresh.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use pipewatch_http::{HttpClient, HttpClientBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::Instrument;

use crate::auth_api::{AuthApi, Credentials, HttpAuthApi};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::envelope::decode_response;
use crate::error::SessionError;
use crate::gate::{self, Admission, RefreshGate, RefreshLease};
use crate::guard::RouteGuard;
use crate::lifecycle::{Lifecycle, SessionEvent, SessionState};
use crate::notify::Notifier;
use crate::secret::SecretString;
use crate::sinks::{AccessMarkerSink, JsonFileSink};
use crate::token_store::{TokenSink, TokenStore};
use crate::types::Session;

/// One API call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// Path relative to the configured base URL, or an absolute URL.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    /// Send without a bearer token and never attempt a refresh.
    pub skip_auth: bool,
}

impl RequestContext {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            skip_auth: false,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn without_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }
}

struct Inner {
    config: SessionConfig,
    http: HttpClient,
    auth: Arc<dyn AuthApi>,
    store: TokenStore,
    gate: RefreshGate,
    lifecycle: Lifecycle,
    notifier: Notifier,
}

/// Authenticated API client.
///
/// Clones share the token store, refresh gate, and lifecycle channels.
/// Construct one per process for the agent, or one per request scope on a
/// server so sessions never leak between users.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("base_url", &self.inner.config.base_url)
            .field("store", &self.inner.store)
            .field("state", &self.inner.lifecycle.state())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SessionClient`].
#[must_use]
pub struct SessionClientBuilder {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    http: Option<HttpClient>,
    auth: Option<Arc<dyn AuthApi>>,
    notifier: Option<Notifier>,
    sinks: Vec<Arc<dyn TokenSink>>,
}

impl SessionClientBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            http: None,
            auth: None,
            notifier: None,
            sinks: Vec::new(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Reuse an existing transport instead of building one from the config.
    pub fn http_client(mut self, http: HttpClient) -> Self {
        self.http = Some(http);
        self
    }

    /// Replace the HTTP auth endpoints (tests, alternative identity backends).
    pub fn auth_api(mut self, auth: Arc<dyn AuthApi>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Share a notification channel with other components.
    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Add a sink on top of those configured under `persistence`.
    pub fn sink(mut self, sink: Arc<dyn TokenSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Validate the config and assemble the client.
    ///
    /// # Errors
    ///
    /// [`SessionError::Config`] for invalid configuration or a transport that
    /// cannot be built.
    pub fn build(self) -> Result<SessionClient, SessionError> {
        self.config.validate()?;

        let http = match self.http {
            Some(http) => http,
            None => HttpClientBuilder::with_config(self.config.http.clone())
                .build()
                .map_err(|e| SessionError::Config(format!("HTTP client: {e}")))?,
        };

        let auth = self
            .auth
            .unwrap_or_else(|| Arc::new(HttpAuthApi::new(http.clone(), &self.config)));

        let mut store =
            TokenStore::new(self.clock).with_expiry_buffer(self.config.expiry_buffer);
        if let Some(path) = &self.config.persistence.session_file {
            store = store.with_sink(Arc::new(JsonFileSink::new(path)));
        }
        if let Some(path) = &self.config.persistence.access_marker_file {
            store = store.with_sink(Arc::new(AccessMarkerSink::new(path)));
        }
        for sink in self.sinks {
            store = store.with_sink(sink);
        }

        Ok(SessionClient {
            inner: Arc::new(Inner {
                config: self.config,
                http,
                auth,
                store,
                gate: RefreshGate::new(),
                lifecycle: Lifecycle::new(),
                notifier: self.notifier.unwrap_or_default(),
            }),
        })
    }
}

impl SessionClient {
    pub fn builder(config: SessionConfig) -> SessionClientBuilder {
        SessionClientBuilder::new(config)
    }

    // ---- dispatch ---------------------------------------------------------

    /// Perform an API call, refreshing the session once on 401.
    ///
    /// Returns the unwrapped envelope `data` (or the raw JSON body when the
    /// response is not enveloped). Every error is also published to the
    /// notifier.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Network`] on transport failure,
    /// - [`SessionError::Auth`] when no refresh is possible or the retried
    ///   request is rejected again,
    /// - [`SessionError::SessionExpired`] when the refresh failed,
    /// - [`SessionError::Application`] / [`SessionError::Http`] for error
    ///   responses.
    pub async fn execute(&self, ctx: &RequestContext) -> Result<Value, SessionError> {
        let span = tracing::debug_span!("api_request", method = %ctx.method, path = %ctx.path);
        let result = self.dispatch(ctx).instrument(span).await;
        if let Err(e) = &result {
            self.inner.notifier.publish(e);
        }
        result
    }

    /// [`execute`](Self::execute) and decode the result into `T`.
    ///
    /// # Errors
    ///
    /// As for `execute`, plus [`SessionError::Decode`] when the payload does
    /// not match `T`.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
    ) -> Result<T, SessionError> {
        let value = self.execute(ctx).await?;
        serde_json::from_value(value).map_err(|e| {
            let err = SessionError::Decode(format!("{} {}: {e}", ctx.method, ctx.path));
            self.inner.notifier.publish(&err);
            err
        })
    }

    /// `GET path`, decoded into `T`.
    ///
    /// # Errors
    ///
    /// See [`execute_json`](Self::execute_json).
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        self.execute_json(&RequestContext::get(path)).await
    }

    /// `POST path` with a JSON body, decoded into `T`.
    ///
    /// # Errors
    ///
    /// See [`execute_json`](Self::execute_json); [`SessionError::Request`]
    /// when `body` cannot be serialized.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, SessionError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let ctx = self.context_with_body(Method::POST, path, body)?;
        self.execute_json(&ctx).await
    }

    /// `PUT path` with a JSON body, decoded into `T`.
    ///
    /// # Errors
    ///
    /// See [`post`](Self::post).
    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, SessionError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let ctx = self.context_with_body(Method::PUT, path, body)?;
        self.execute_json(&ctx).await
    }

    /// `DELETE path`, decoded into `T`.
    ///
    /// # Errors
    ///
    /// See [`execute_json`](Self::execute_json).
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        self.execute_json(&RequestContext::new(Method::DELETE, path))
            .await
    }

    fn context_with_body<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<RequestContext, SessionError> {
        let body = serde_json::to_value(body).map_err(|e| {
            let err = SessionError::Request(format!("{method} {path}: {e}"));
            self.inner.notifier.publish(&err);
            err
        })?;
        Ok(RequestContext::new(method, path).with_body(body))
    }

    async fn dispatch(&self, ctx: &RequestContext) -> Result<Value, SessionError> {
        let token = if ctx.skip_auth {
            None
        } else {
            self.inner.store.access_token()
        };

        let (status, body) = self.send(ctx, token.as_ref()).await?;
        if status == StatusCode::UNAUTHORIZED && !ctx.skip_auth {
            return self.recover_from_unauthorized(ctx, token).await;
        }
        decode_response(status, &body)
    }

    async fn send(
        &self,
        ctx: &RequestContext,
        token: Option<&SecretString>,
    ) -> Result<(StatusCode, Bytes), SessionError> {
        let url = self.inner.config.endpoint_url(&ctx.path);
        let mut request = self
            .inner
            .http
            .request(ctx.method.clone(), &url)
            .headers(&ctx.headers);
        if let Some(token) = token {
            request = request.bearer_auth(token.expose());
        }
        if let Some(body) = &ctx.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::from_http(&e, "API request"))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| SessionError::from_http(&e, "API request"))?;
        tracing::debug!(status = status.as_u16(), "response received");
        Ok((status, body))
    }

    /// 401 handling: join or lead a refresh, then retry exactly once.
    async fn recover_from_unauthorized(
        &self,
        ctx: &RequestContext,
        sent_with: Option<SecretString>,
    ) -> Result<Value, SessionError> {
        let token = match self.inner.gate.admit() {
            Admission::Follower(rx) => {
                tracing::debug!("401 received; waiting for in-flight token refresh");
                gate::wait(rx).await?
            }
            Admission::Leader(lease) => {
                let current = self.inner.store.access_token();
                match current {
                    // A refresh finished while this request was in flight.
                    Some(current) if sent_with.as_ref() != Some(&current) => {
                        tracing::debug!("401 for a superseded token; retrying with current token");
                        lease.settle(Ok(current.clone()));
                        current
                    }
                    _ => self.refresh_as_leader(lease).await?,
                }
            }
        };

        let (status, body) = self.send(ctx, Some(&token)).await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(SessionError::Auth(
                "request rejected after token refresh".to_owned(),
            ));
        }
        decode_response(status, &body)
    }

    async fn refresh_as_leader(&self, lease: RefreshLease<'_>) -> Result<SecretString, SessionError> {
        let Some((session, refresh_token)) = self.refreshable_session() else {
            let err = SessionError::Auth("no refresh token".to_owned());
            let ended = self.inner.store.take().is_some();
            lease.settle(Err(err.clone()));
            if ended {
                self.inner.lifecycle.signed_out();
            }
            return Err(err);
        };

        tracing::debug!("401 received; refreshing access token");
        self.inner.lifecycle.refresh_started();

        match self.inner.auth.refresh(&refresh_token).await {
            Ok(grant) => {
                let Some(stored) = self.inner.store.apply_grant_if_current(&session, &grant) else {
                    let outcome = self.superseded_refresh();
                    lease.settle(outcome.clone());
                    return outcome;
                };
                let token = stored.access_token().clone();
                self.inner.lifecycle.refreshed();
                lease.settle(Ok(token.clone()));
                tracing::debug!("access token refreshed");
                Ok(token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                let reason = e.to_string();
                let ended = self.inner.store.take_if_current(&session).is_some();
                let err = SessionError::SessionExpired(reason.clone());
                lease.settle(Err(err.clone()));
                if ended {
                    self.inner.lifecycle.expired(&reason);
                }
                Err(err)
            }
        }
    }

    /// The session and its refresh token, if it has one.
    fn refreshable_session(&self) -> Option<(Arc<Session>, SecretString)> {
        let session = self.inner.store.session()?;
        let refresh_token = session.refresh_token().clone();
        (!refresh_token.is_empty()).then_some((session, refresh_token))
    }

    /// A refresh finished after its session was cleared or replaced. A
    /// newer session (a fresh login) is used as is; a cleared one stays
    /// cleared.
    fn superseded_refresh(&self) -> Result<SecretString, SessionError> {
        match self.inner.store.access_token() {
            Some(current) => Ok(current),
            None => Err(SessionError::Auth(
                "session ended during token refresh".to_owned(),
            )),
        }
    }

    // ---- proactive refresh hooks ------------------------------------------

    /// Refresh outside the 401 path. Joins the dispatcher's refresh when one
    /// is in flight; otherwise calls the refresh endpoint directly.
    pub(crate) async fn refresh_proactively(&self) -> Result<(), SessionError> {
        if let Some(rx) = self.inner.gate.follow() {
            tracing::debug!("proactive refresh joined in-flight refresh");
            return gate::wait(rx).await.map(drop);
        }

        let (session, refresh_token) = self
            .refreshable_session()
            .ok_or_else(|| SessionError::Auth("no refresh token".to_owned()))?;
        self.inner.lifecycle.refresh_started();
        let grant = self.inner.auth.refresh(&refresh_token).await?;
        let Some(stored) = self.inner.store.apply_grant_if_current(&session, &grant) else {
            return self.superseded_refresh().map(drop);
        };
        self.inner.lifecycle.refreshed();
        tracing::info!(expires_at_ms = ?stored.expires_at_ms(), "session refreshed proactively");
        Ok(())
    }

    /// Clear the session and signal expiry. Returns `false` if the session
    /// had already ended, in which case nothing is signalled.
    pub(crate) fn terminate_session(&self, reason: &str) -> bool {
        if self.inner.store.take().is_none() {
            return false;
        }
        self.inner.lifecycle.expired(reason);
        self.inner
            .notifier
            .publish(&SessionError::SessionExpired(reason.to_owned()));
        true
    }

    // ---- lifecycle ----------------------------------------------------------

    /// Log in and store the resulting session.
    ///
    /// # Errors
    ///
    /// Whatever the login endpoint returned; the previous state is restored.
    pub async fn login(&self, credentials: &Credentials) -> Result<(), SessionError> {
        let previous = self.inner.lifecycle.state();
        self.inner.lifecycle.set_state(SessionState::Authenticating);

        match self.inner.auth.login(credentials).await {
            Ok(grant) => {
                let session = self.inner.store.apply_grant(&grant);
                self.inner.lifecycle.signed_in();
                tracing::info!(
                    username = %credentials.username,
                    expires_at_ms = ?session.expires_at_ms(),
                    "signed in"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(username = %credentials.username, error = %e, "login failed");
                self.inner.lifecycle.set_state(previous);
                self.inner.notifier.publish(&e);
                Err(e)
            }
        }
    }

    /// Invalidate the session server-side (best effort) and clear it locally.
    pub async fn logout(&self) {
        if let Some(session) = self.inner.store.session()
            && let Err(e) = self.inner.auth.logout(&session).await
        {
            tracing::warn!(error = %e, "server-side logout failed; clearing local session anyway");
        }
        self.inner.store.clear();
        self.inner.lifecycle.signed_out();
        tracing::info!("signed out");
    }

    /// Resume a persisted session. Returns `true` when one was found.
    #[must_use = "false means a login is required"]
    pub fn restore(&self) -> bool {
        if self.inner.store.restore().is_some() {
            self.inner.lifecycle.signed_in();
            true
        } else {
            false
        }
    }

    /// A stored session that is not about to expire.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !self.inner.store.is_expired()
    }

    // ---- accessors ----------------------------------------------------------

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn token_store(&self) -> &TokenStore {
        &self.inner.store
    }

    #[must_use]
    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lifecycle.state()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.lifecycle.watch_state()
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.lifecycle.subscribe()
    }

    /// Whether a 401-triggered refresh is running right now.
    #[must_use]
    pub fn refresh_in_flight(&self) -> bool {
        self.inner.gate.is_in_flight()
    }

    /// Route guard configured from `guard`.
    #[must_use]
    pub fn route_guard(&self) -> RouteGuard {
        RouteGuard::new(self.inner.config.guard.clone())
    }
}
