//! Layered configuration: built-in defaults, an optional TOML file, then
//! `SCHOLAR_HARVEST__SECTION__KEY` environment variables.

use crate::dedup::ClusterPolicy;
use crate::resilience::RetryConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const ENV_PREFIX: &str = "SCHOLAR_HARVEST";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub harvest: HarvestConfig,
    pub dedup: DedupConfig,
    pub http: HttpConfig,
    pub sources: SourcesConfig,
    pub logging: LoggingConfig,
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Coordinator redistribution tick and worker wait bound
    pub poll_interval_ms: u64,
    /// Hard stop for a whole harvest; 0 disables it
    pub deadline_secs: u64,
    /// Limit used by the CLI when none is given
    pub default_limit: u32,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            deadline_secs: 0,
            default_limit: 1000,
        }
    }
}

impl HarvestConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Duration> {
        if self.deadline_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.deadline_secs))
        }
    }
}

/// Deduplication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    /// Minimum author similarity for the author-gated rules
    pub author_threshold: f64,
    pub cluster_policy: ClusterPolicy,
    /// Compare every pair instead of DOI/title blocks
    pub all_pairs: bool,
    /// External classifier program; the in-process rule table is used when unset
    pub command: Option<PathBuf>,
    pub command_timeout_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            author_threshold: 0.5,
            cluster_policy: ClusterPolicy::default(),
            all_pairs: false,
            command: None,
            command_timeout_secs: 300,
        }
    }
}

/// HTTP client configuration shared by the network adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: format!(
                "scholar-harvest/{} (Academic Research Tool)",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

/// Per-provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Records requested per page, capped by the provider's own ceiling
    pub page_size: u32,
    pub requests_per_second: f64,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub api_key: Option<String>,
    /// Contact address for polite API pools
    pub mailto: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            page_size: 100,
            requests_per_second: 1.0,
            max_attempts: 5,
            initial_delay_ms: 1000,
            api_key: None,
            mailto: None,
        }
    }
}

impl SourceConfig {
    fn with(base_url: &str, page_size: u32, requests_per_second: f64) -> Self {
        Self {
            base_url: base_url.to_string(),
            page_size,
            requests_per_second,
            ..Self::default()
        }
    }

    /// Retry settings for this provider's page requests
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            ..RetryConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub crossref: SourceConfig,
    pub openalex: SourceConfig,
    pub arxiv: SourceConfig,
    pub core: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            crossref: SourceConfig::with("https://api.crossref.org", 1000, 1.0),
            openalex: SourceConfig::with("https://api.openalex.org", 200, 10.0),
            // arXiv asks for three seconds between calls
            arxiv: SourceConfig::with("http://export.arxiv.org/api/query", 500, 0.33),
            core: SourceConfig {
                enabled: false,
                ..SourceConfig::with("https://api.core.ac.uk/v3", 200, 1.0)
            },
        }
    }
}

impl SourcesConfig {
    /// Named view over every provider section
    #[must_use]
    pub fn entries(&self) -> [(&'static str, &SourceConfig); 4] {
        [
            ("crossref", &self.crossref),
            ("openalex", &self.openalex),
            ("arxiv", &self.arxiv),
            ("core", &self.core),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load defaults, then `path` (if any), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Defaults go in as a layer so partial provider tables keep their URLs
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.harvest.poll_interval_ms == 0 {
            return Err(invalid("harvest.poll_interval_ms", "must be greater than zero"));
        }

        if !(0.0..=1.0).contains(&self.dedup.author_threshold) {
            return Err(invalid("dedup.author_threshold", "must lie within [0, 1]"));
        }

        if self.dedup.command.is_some() && self.dedup.command_timeout_secs == 0 {
            return Err(invalid("dedup.command_timeout_secs", "must be greater than zero"));
        }

        if self.http.timeout_secs == 0 {
            return Err(invalid("http.timeout_secs", "must be greater than zero"));
        }

        for (name, source) in self.sources.entries() {
            if !source.enabled {
                continue;
            }
            if source.base_url.trim().is_empty() {
                return Err(invalid(&format!("sources.{name}.base_url"), "cannot be empty"));
            }
            if source.page_size == 0 {
                return Err(invalid(&format!("sources.{name}.page_size"), "must be greater than zero"));
            }
            if source.requests_per_second <= 0.0 {
                return Err(invalid(
                    &format!("sources.{name}.requests_per_second"),
                    "must be greater than zero",
                ));
            }
            if source.max_attempts == 0 {
                return Err(invalid(&format!("sources.{name}.max_attempts"), "must be at least 1"));
            }
        }

        if self.sources.core.enabled && self.sources.core.api_key.is_none() {
            return Err(invalid("sources.core.api_key", "required when CORE is enabled"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> Error {
    Error::InvalidInput {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.harvest.poll_interval(), Duration::from_millis(500));
        assert!(config.harvest.deadline().is_none());
        assert!((config.dedup.author_threshold - 0.5).abs() < f64::EPSILON);
        assert!(!config.sources.core.enabled);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.harvest.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidInput { .. })));

        let mut config = Config::default();
        config.dedup.author_threshold = 1.5;
        assert!(matches!(config.validate(), Err(Error::InvalidInput { .. })));

        let mut config = Config::default();
        config.sources.crossref.page_size = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidInput { .. })));

        let mut config = Config::default();
        config.sources.core.enabled = true;
        assert!(matches!(config.validate(), Err(Error::InvalidInput { field, .. }) if field == "sources.core.api_key"));
    }

    #[test]
    fn test_disabled_sources_skip_validation() {
        let mut config = Config::default();
        config.sources.arxiv.enabled = false;
        config.sources.arxiv.page_size = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[harvest]
poll_interval_ms = 50
deadline_secs = 120

[dedup]
author_threshold = 0.6
cluster_policy = "transitive"

[sources.openalex]
page_size = 25
mailto = "me@example.org"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.harvest.poll_interval_ms, 50);
        assert_eq!(config.harvest.deadline(), Some(Duration::from_secs(120)));
        assert_eq!(config.dedup.cluster_policy, ClusterPolicy::Transitive);
        assert_eq!(config.sources.openalex.page_size, 25);
        assert_eq!(config.sources.openalex.mailto.as_deref(), Some("me@example.org"));
        // untouched sections keep their defaults
        assert_eq!(config.sources.crossref.page_size, 1000);
    }

    #[test]
    fn test_retry_config_follows_source_settings() {
        let source = SourceConfig {
            max_attempts: 2,
            initial_delay_ms: 10,
            ..SourceConfig::default()
        };
        let retry = source.retry_config();
        assert_eq!(retry.max_attempts, 2);
        assert_eq!(retry.initial_delay, Duration::from_millis(10));
    }
}
