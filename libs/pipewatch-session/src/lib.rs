#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Authenticated API sessions for the `PipeWatch` telemetry backend.
//!
//! [`SessionClient`] attaches bearer tokens to API calls, refreshes the
//! session once when a call comes back 401 (all concurrent callers share the
//! same refresh), and retries the call with the new token. A
//! [`RefreshScheduler`] renews the session ahead of expiry so most calls never
//! see a 401 at all.
//!
//! ```no_run
//! # async fn demo() -> Result<(), pipewatch_session::SessionError> {
//! use pipewatch_session::{Credentials, RefreshScheduler, SessionClient, SessionConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = SessionClient::builder(SessionConfig::default()).build()?;
//! client.login(&Credentials::new("operator", "secret")).await?;
//!
//! let shutdown = CancellationToken::new();
//! let scheduler = RefreshScheduler::spawn(client.clone(), &shutdown);
//!
//! let pipelines: serde_json::Value = client.get("/api/pipelines").await?;
//! println!("{pipelines}");
//!
//! client.logout().await;
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod auth_api;
mod clock;
mod config;
mod dispatcher;
mod envelope;
mod error;
mod gate;
mod guard;
pub mod humantime_serde;
mod lifecycle;
mod notify;
mod scheduler;
mod secret;
mod sinks;
mod token_store;
mod types;

pub use auth_api::{AuthApi, Credentials, HttpAuthApi};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthEndpoints, PersistenceConfig, RefreshPolicy, SessionConfig};
pub use dispatcher::{RequestContext, SessionClient, SessionClientBuilder};
pub use envelope::{Envelope, decode_response};
pub use error::SessionError;
pub use gate::{Admission, RefreshGate, RefreshLease, RefreshOutcome};
pub use guard::{GuardConfig, RouteDecision, RouteGuard};
pub use lifecycle::{SessionEvent, SessionState};
pub use notify::{Notice, NoticeKind, Notifier};
pub use scheduler::{RefreshScheduler, SchedulerHandle, next_refresh_delay};
pub use secret::SecretString;
pub use sinks::{AccessMarkerSink, JsonFileSink};
pub use token_store::{DEFAULT_EXPIRY_BUFFER, TokenSink, TokenStore};
pub use types::{Session, TokenGrant};
