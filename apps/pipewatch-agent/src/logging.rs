use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. Uses `try_init` so repeated
/// calls are harmless.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.format {
        LogFormat::Json => fmt::fmt().with_env_filter(filter).json().try_init(),
        LogFormat::Text => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}
