use pipewatch_session::{SessionClient, SessionError};
use serde_json::Value;

/// Outcome of one pass over the configured endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl PollReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Fetches telemetry endpoints through the session client.
pub struct Poller {
    client: SessionClient,
    endpoints: Vec<String>,
}

impl Poller {
    #[must_use]
    pub fn new(client: SessionClient, endpoints: Vec<String>) -> Self {
        Self { client, endpoints }
    }

    pub async fn poll_once(&self) -> PollReport {
        let mut report = PollReport::default();
        for endpoint in &self.endpoints {
            match self.client.get::<Value>(endpoint).await {
                Ok(payload) => {
                    report.succeeded += 1;
                    tracing::info!(
                        endpoint = endpoint.as_str(),
                        summary = %summarize(&payload),
                        "telemetry fetched"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    log_failure(endpoint, &e);
                }
            }
        }
        report
    }
}

fn log_failure(endpoint: &str, err: &SessionError) {
    if err.is_transient() {
        tracing::warn!(endpoint, kind = err.kind(), error = %err, "telemetry fetch failed; will retry next tick");
    } else {
        tracing::error!(endpoint, kind = err.kind(), error = %err, "telemetry fetch failed");
    }
}

/// One-line description of a payload for the log.
#[must_use]
pub fn summarize(payload: &Value) -> String {
    match payload {
        Value::Null => "empty".to_owned(),
        Value::Array(items) => format!("{} item(s)", items.len()),
        Value::Object(map) => {
            // Paged listings nest the rows under `items`.
            if let Some(Value::Array(items)) = map.get("items") {
                match map.get("total").and_then(Value::as_u64) {
                    Some(total) => format!("{} of {total} item(s)", items.len()),
                    None => format!("{} item(s)", items.len()),
                }
            } else {
                format!("object with {} field(s)", map.len())
            }
        }
        Value::Bool(_) | Value::Number(_) | Value::String(_) => format!("scalar {payload}"),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use pipewatch_session::SessionConfig;
    use serde_json::json;

    #[test]
    fn summaries() {
        assert_eq!(summarize(&Value::Null), "empty");
        assert_eq!(summarize(&json!([1, 2, 3])), "3 item(s)");
        assert_eq!(
            summarize(&json!({"items": [{"id": 1}], "total": 12})),
            "1 of 12 item(s)"
        );
        assert_eq!(summarize(&json!({"items": []})), "0 item(s)");
        assert_eq!(summarize(&json!({"id": 7, "name": "north"})), "object with 2 field(s)");
        assert_eq!(summarize(&json!(42)), "scalar 42");
    }

    #[tokio::test]
    async fn counts_successes_and_failures() {
        let server = MockServer::start();
        let pipelines = server.mock(|when, then| {
            when.method(GET)
                .path("/api/pipelines")
                .header("authorization", "Bearer access-1");
            then.status(200)
                .json_body(json!({"success": true, "data": [{"id": 1}, {"id": 2}]}));
        });
        let stations = server.mock(|when, then| {
            when.method(GET).path("/api/stations");
            then.status(503).body("maintenance");
        });

        let client = SessionClient::builder(SessionConfig {
            base_url: server.base_url(),
            http: pipewatch_http::HttpClientConfig::for_testing(),
            ..SessionConfig::default()
        })
        .build()
        .unwrap();
        client.token_store().set("access-1", "refresh-1", 3600);

        let poller = Poller::new(
            client,
            vec!["/api/pipelines".to_owned(), "/api/stations".to_owned()],
        );
        let report = poller.poll_once().await;

        assert_eq!(report, PollReport { succeeded: 1, failed: 1 });
        assert!(!report.is_clean());
        pipelines.assert();
        stations.assert();
    }
}
