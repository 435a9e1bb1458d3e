use std::fmt;

use serde::Deserialize;

use crate::secret::SecretString;

/// The authenticated session: both tokens and the absolute expiry.
///
/// Only the [`TokenStore`](crate::TokenStore) creates and replaces sessions,
/// always as a whole.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    access_token: SecretString,
    refresh_token: SecretString,
    /// `None` when the server did not report a lifetime.
    expires_at_ms: Option<u64>,
}

impl Session {
    #[must_use]
    pub fn new(
        access_token: SecretString,
        refresh_token: SecretString,
        expires_at_ms: Option<u64>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at_ms,
        }
    }

    #[must_use]
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> &SecretString {
        &self.refresh_token
    }

    #[must_use]
    pub fn expires_at_ms(&self) -> Option<u64> {
        self.expires_at_ms
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &self.access_token)
            .field("refresh_token", &self.refresh_token)
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

/// Token pair returned by the login and refresh endpoints.
///
/// `Deserialize`-only so grants are never written into logs or bodies by
/// accident.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
}
