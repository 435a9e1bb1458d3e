#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP transport for the `PipeWatch` session client
//!
//! This crate provides a hyper-based HTTP client with:
//! - Automatic TLS via rustls (HTTPS only by default)
//! - Connection pooling
//! - A per-attempt timeout
//! - User-Agent header injection
//! - Response body size limits
//!
//! `send()` resolves to `Ok` for every HTTP status; only transport, timeout,
//! and TLS failures are errors. Status handling belongs to the caller.
//!
//! # Example
//!
//! ```ignore
//! use pipewatch_http::HttpClient;
//! use std::time::Duration;
//!
//! let client = HttpClient::builder()
//!     .timeout(Duration::from_secs(10))
//!     .user_agent("pipewatch-agent/0.3")
//!     .build()?;
//!
//! let resp = client.get("https://telemetry.example.com/api/pipelines").send().await?;
//! let body = resp.bytes().await?;
//! ```

mod builder;
mod client;
mod config;
mod error;
mod request;
mod response;
mod tls;
mod user_agent;

pub use builder::HttpClientBuilder;
pub use client::HttpClient;
pub use config::{DEFAULT_USER_AGENT, HttpClientConfig, TransportSecurity};
pub use error::HttpError;
pub use request::RequestBuilder;
pub use response::{HttpResponse, ResponseBody};
pub use user_agent::{UserAgentLayer, UserAgentService};
