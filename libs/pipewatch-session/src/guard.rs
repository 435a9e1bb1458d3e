//! Edge route guard: decides redirects from the path and token presence.

use serde::{Deserialize, Serialize};

/// Paths the guard protects and where it sends people.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    /// Prefixes that require an access token.
    pub protected_prefixes: Vec<String>,
    /// Auth pages that signed-in users are bounced away from.
    pub public_auth_paths: Vec<String>,
    pub login_path: String,
    pub home_path: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            protected_prefixes: ["/dashboard", "/pipelines", "/stations", "/settings"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            public_auth_paths: vec!["/login".to_owned()],
            login_path: "/login".to_owned(),
            home_path: "/dashboard".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    RedirectToLogin { return_to: String },
    RedirectToHome,
}

impl RouteDecision {
    /// Redirect target, or `None` for [`RouteDecision::Allow`].
    ///
    /// `return_to` is appended as a query parameter; `/` and the characters
    /// that would break the query are percent-encoded.
    #[must_use]
    pub fn location(&self, guard: &RouteGuard) -> Option<String> {
        match self {
            Self::Allow => None,
            Self::RedirectToHome => Some(guard.config.home_path.clone()),
            Self::RedirectToLogin { return_to } => Some(format!(
                "{}?returnTo={}",
                guard.config.login_path,
                url::form_urlencoded::byte_serialize(return_to.as_bytes()).collect::<String>()
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteGuard {
    config: GuardConfig,
}

impl RouteGuard {
    #[must_use]
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Decide what to do with a request for `path`.
    #[must_use]
    pub fn decide(&self, path: &str, has_access_token: bool) -> RouteDecision {
        let path = path.split(['?', '#']).next().unwrap_or(path);

        if !has_access_token && self.is_protected(path) {
            tracing::debug!(path, "unauthenticated request to protected route");
            return RouteDecision::RedirectToLogin {
                return_to: path.to_owned(),
            };
        }

        if has_access_token
            && self
                .config
                .public_auth_paths
                .iter()
                .any(|p| matches_prefix(path, p))
        {
            return RouteDecision::RedirectToHome;
        }

        RouteDecision::Allow
    }

    #[must_use]
    pub fn is_protected(&self, path: &str) -> bool {
        self.config
            .protected_prefixes
            .iter()
            .any(|p| matches_prefix(path, p))
    }
}

/// Segment-aware prefix match: `/dashboard` matches `/dashboard` and
/// `/dashboard/x` but not `/dashboards`.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
