//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

use crate::config::{DomainConfig, LogFormat};

/// Installs a global subscriber filtered by `config.log_level` (or
/// `RUST_LOG` when set) and formatted per `config.log_format`.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &DomainConfig) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_fails() {
        let config = DomainConfig {
            log_format: LogFormat::Json,
            ..DomainConfig::default()
        };
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
