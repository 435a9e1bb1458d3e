use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use pipewatch_session::{Credentials, SecretString, SessionConfig};
use serde::{Deserialize, Serialize, Serializer};

/// Prefix for environment overrides, e.g. `PIPEWATCH__SESSION__BASE_URL`.
pub const ENV_PREFIX: &str = "PIPEWATCH__";

/// Effective agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub credentials: CredentialsConfig,
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
        }
    }
}

/// Login credentials. Only needed when no persisted session can be resumed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialsConfig {
    pub username: String,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_redacted"
    )]
    pub password: Option<SecretString>,
}

impl CredentialsConfig {
    /// Credentials for a login, if both parts are configured.
    #[must_use]
    pub fn to_credentials(&self) -> Option<Credentials> {
        match &self.password {
            Some(password) if !self.username.is_empty() && !password.is_empty() => {
                Some(Credentials::new(self.username.clone(), password.clone()))
            }
            _ => None,
        }
    }
}

#[allow(clippy::ref_option)]
fn serialize_redacted<S: Serializer>(
    value: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(_) => serializer.serialize_str("[REDACTED]"),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollingConfig {
    #[serde(with = "pipewatch_session::humantime_serde")]
    pub interval: Duration,
    /// API paths fetched on every tick.
    pub endpoints: Vec<String>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            endpoints: vec!["/api/pipelines".to_owned(), "/api/stations".to_owned()],
        }
    }
}

/// Command-line values that override the layered configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub verbose: u8,
    pub base_url: Option<String>,
}

impl AgentConfig {
    /// Layered load: defaults, then the YAML file (if any), then
    /// `PIPEWATCH__*` environment variables.
    ///
    /// # Errors
    /// Returns an error if the file is missing or malformed, or if the merged
    /// configuration does not deserialize or validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.is_file() {
                bail!("config file does not exist: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .context("failed to load configuration (yaml/env)")?;
        config.validate()?;
        Ok(config)
    }

    /// `-v` raises the log level; `--base-url` replaces the session origin.
    pub fn apply_cli_overrides(&mut self, cli: &CliOverrides) {
        match cli.verbose {
            0 => {}
            1 => "info".clone_into(&mut self.logging.level),
            2 => "debug".clone_into(&mut self.logging.level),
            _ => "trace".clone_into(&mut self.logging.level),
        }
        if let Some(base_url) = &cli.base_url {
            base_url.clone_into(&mut self.session.base_url);
        }
    }

    /// # Errors
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.session.validate().context("invalid session configuration")?;
        if self.polling.interval.is_zero() {
            bail!("polling.interval must be greater than zero");
        }
        if let Some(path) = self.polling.endpoints.iter().find(|p| !p.starts_with('/')) {
            bail!("polling endpoint must start with '/', got '{path}'");
        }
        Ok(())
    }

    /// YAML rendering with secrets redacted.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_saphyr::to_string(self).context("failed to serialize configuration to YAML")
    }
}
