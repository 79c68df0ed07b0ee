//! Domain configuration loaded from environment variables.

use crate::command::DEFAULT_CONTEXT;
use crate::mapping::DefinitionMapping;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Domain configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DOMAIN_DEFAULT_CONTEXT`: context of commands naming none (default: `"_general"`)
/// - `DOMAIN_WORKER_ID`: pinned worker id (default: one from the aggregate lock)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DOMAIN_LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
///
/// The envelope mappings are not read from the environment.
#[derive(Debug, Clone)]
pub struct DomainConfig {
    pub default_context: String,
    pub worker_id: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub command_mapping: DefinitionMapping,
    pub event_mapping: DefinitionMapping,
}

impl DomainConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            default_context: lookup("DOMAIN_DEFAULT_CONTEXT")
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTEXT.to_string()),
            worker_id: lookup("DOMAIN_WORKER_ID").filter(|w| !w.is_empty()),
            log_level: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            log_format: lookup("DOMAIN_LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_default_context(mut self, context: impl Into<String>) -> Self {
        self.default_context = context.into();
        self
    }

    pub fn with_command_mapping(mut self, mapping: DefinitionMapping) -> Self {
        self.command_mapping = mapping;
        self
    }

    pub fn with_event_mapping(mut self, mapping: DefinitionMapping) -> Self {
        self.event_mapping = mapping;
        self
    }
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            default_context: DEFAULT_CONTEXT.to_string(),
            worker_id: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            command_mapping: DefinitionMapping::default(),
            event_mapping: DefinitionMapping::default(),
        }
    }
}
