//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{RateLimitConfig, RateLimiter, RateLimiterFactory, Strategy};

/// Prefix of environment variables overriding file settings,
/// e.g. `TURNSTILE__SERVICE__CLEANUP_INTERVAL_SECS=60`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Background task configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Limiters to build; the api, auth and agent presets when empty
    #[serde(default)]
    pub limiters: Vec<LimiterDefinition>,
}

/// Background task configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Expired entry sweep period in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Metrics publication period in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Blocked identifiers reported per snapshot
    #[serde(default = "default_top_blocked")]
    pub top_blocked: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval(),
            metrics_interval_secs: default_metrics_interval(),
            top_blocked: default_top_blocked(),
        }
    }
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_metrics_interval() -> u64 {
    60
}

fn default_top_blocked() -> usize {
    crate::metrics::DEFAULT_TOP_BLOCKED
}

impl ServiceConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }
}

/// Which factory preset a limiter definition uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Api,
    Auth,
    Agent,
    /// External API quota; needs `service`, `max_requests` and `window_ms`
    External,
    /// Fully specified; needs `strategy`, `max_requests` and `window_ms`
    Custom,
}

/// One named limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterDefinition {
    /// Name used to address the limiter
    pub name: String,
    pub preset: Preset,
    /// External service name (`external` preset)
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub max_requests: Option<u64>,
    #[serde(default)]
    pub window_ms: Option<u64>,
    /// Key prefix (`custom` preset); defaults to `<name>:`
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub skip_failed_requests: bool,
    #[serde(default)]
    pub skip_successful_requests: bool,
}

impl LimiterDefinition {
    /// A definition using one of the fixed presets.
    pub fn preset(name: impl Into<String>, preset: Preset) -> Self {
        Self {
            name: name.into(),
            preset,
            service: None,
            strategy: None,
            max_requests: None,
            window_ms: None,
            key_prefix: None,
            skip_failed_requests: false,
            skip_successful_requests: false,
        }
    }

    fn require<T: Copy>(&self, value: Option<T>, field: &str) -> Result<T> {
        value.ok_or_else(|| {
            TurnstileError::Config(format!(
                "limiter '{}': preset {:?} requires '{}'",
                self.name, self.preset, field
            ))
        })
    }

    /// Build the limiter through `factory`.
    pub fn build(&self, factory: &RateLimiterFactory) -> Result<RateLimiter> {
        match self.preset {
            Preset::Api => Ok(factory.api()),
            Preset::Auth => Ok(factory.auth()),
            Preset::Agent => Ok(factory.agent()),
            Preset::External => {
                let service = self.service.as_deref().ok_or_else(|| {
                    TurnstileError::Config(format!(
                        "limiter '{}': preset External requires 'service'",
                        self.name
                    ))
                })?;
                let max_requests = self.require(self.max_requests, "max_requests")?;
                let window_ms = self.require(self.window_ms, "window_ms")?;
                factory.external(service, max_requests, window_ms)
            }
            Preset::Custom => {
                let strategy = self.require(self.strategy, "strategy")?;
                let max_requests = self.require(self.max_requests, "max_requests")?;
                let window_ms = self.require(self.window_ms, "window_ms")?;
                let prefix = self
                    .key_prefix
                    .clone()
                    .unwrap_or_else(|| format!("{}:", self.name));
                let window = Duration::from_millis(window_ms);
                let config = RateLimitConfig::new(strategy, max_requests, window)
                    .key_prefix(prefix)
                    .skip_failed_requests(self.skip_failed_requests)
                    .skip_successful_requests(self.skip_successful_requests);
                factory.custom(config)
            }
        }
    }
}

impl TurnstileConfig {
    /// Load configuration from an optional file plus `TURNSTILE__*` environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::from(Path::new(path)));
        }
        let config: TurnstileConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check intervals and limiter names.
    pub fn validate(&self) -> Result<()> {
        if self.service.cleanup_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "service.cleanup_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.service.metrics_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "service.metrics_interval_secs must be greater than zero".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for definition in &self.limiters {
            if definition.name.trim().is_empty() {
                return Err(TurnstileError::Config("limiter name must not be empty".to_string()));
            }
            if !names.insert(definition.name.as_str()) {
                return Err(TurnstileError::Config(format!(
                    "duplicate limiter name '{}'",
                    definition.name
                )));
            }
        }
        Ok(())
    }

    /// Configured limiter definitions, or the default presets.
    pub fn limiter_definitions(&self) -> Vec<LimiterDefinition> {
        if self.limiters.is_empty() {
            vec![
                LimiterDefinition::preset("api", Preset::Api),
                LimiterDefinition::preset("auth", Preset::Auth),
                LimiterDefinition::preset("agent", Preset::Agent),
            ]
        } else {
            self.limiters.clone()
        }
    }

    /// Build every limiter, in definition order.
    pub fn build_limiters(
        &self,
        factory: &RateLimiterFactory,
    ) -> Result<Vec<(String, Arc<RateLimiter>)>> {
        self.limiter_definitions()
            .into_iter()
            .map(|definition| {
                let limiter = definition.build(factory)?;
                info!(
                    name = %definition.name,
                    strategy = %limiter.config().strategy,
                    max_requests = limiter.config().max_requests,
                    window_ms = limiter.config().window_ms,
                    "Limiter configured"
                );
                Ok((definition.name, Arc::new(limiter)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::from_yaml("{}").unwrap();
        assert_eq!(config.service.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(config.service.metrics_interval(), Duration::from_secs(60));
        assert_eq!(config.service.top_blocked, 10);

        let names: Vec<String> = config
            .limiter_definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["api", "auth", "agent"]);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
service:
  cleanup_interval_secs: 30
  metrics_interval_secs: 15
  top_blocked: 3
limiters:
  - name: api
    preset: api
  - name: github
    preset: external
    service: github
    max_requests: 5000
    window_ms: 3600000
  - name: uploads
    preset: custom
    strategy: token_bucket
    max_requests: 10
    window_ms: 1000
    key_prefix: "upload:"
    skip_failed_requests: true
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.service.cleanup_interval_secs, 30);
        assert_eq!(config.limiters.len(), 3);

        let limiters = config.build_limiters(&RateLimiterFactory::new()).unwrap();
        let (name, github) = &limiters[1];
        assert_eq!(name, "github");
        assert_eq!(github.config().max_requests, 5000);
        assert_eq!(github.config().key_generator.generate("t"), "external:github:t");

        let (_, uploads) = &limiters[2];
        assert_eq!(uploads.config().strategy, Strategy::TokenBucket);
        assert_eq!(uploads.config().key_generator.generate("u1"), "upload:u1");
        assert!(uploads.config().skip_failed_requests);
    }

    #[test]
    fn test_custom_prefix_defaults_to_name() {
        let yaml = r#"
limiters:
  - name: search
    preset: custom
    strategy: fixed
    max_requests: 3
    window_ms: 1000
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        let limiters = config.build_limiters(&RateLimiterFactory::new()).unwrap();
        assert_eq!(limiters[0].1.config().key_generator.generate("q"), "search:q");
    }

    #[test]
    fn test_missing_fields_rejected() {
        let yaml = r#"
limiters:
  - name: github
    preset: external
    max_requests: 10
    window_ms: 1000
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        let err = config.build_limiters(&RateLimiterFactory::new()).unwrap_err();
        assert!(matches!(err, TurnstileError::Config(ref msg) if msg.contains("service")));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let yaml = r#"
limiters:
  - name: broken
    preset: custom
    strategy: sliding
    max_requests: 0
    window_ms: 1000
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.build_limiters(&RateLimiterFactory::new()),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let yaml = r#"
limiters:
  - name: broken
    preset: custom
    strategy: leaky_bucket
    max_requests: 1
    window_ms: 1000
"#;
        assert!(matches!(
            TurnstileConfig::from_yaml(yaml),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = r#"
limiters:
  - name: api
    preset: api
  - name: api
    preset: auth
"#;
        let err = TurnstileConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TurnstileError::Config(ref msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let yaml = "service:\n  metrics_interval_secs: 0\n";
        assert!(matches!(
            TurnstileConfig::from_yaml(yaml),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir()
            .join(format!("turnstile-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "service:\n  top_blocked: 4\nlimiters:\n  - name: auth\n    preset: auth\n",
        )
        .unwrap();

        let loaded = TurnstileConfig::load(path.to_str());
        let from_file = TurnstileConfig::from_file(&path);
        std::fs::remove_file(&path).unwrap();

        let loaded = loaded.unwrap();
        assert_eq!(loaded.service.top_blocked, 4);
        assert_eq!(loaded.service.cleanup_interval_secs, 300);
        assert_eq!(loaded.limiters[0].preset, Preset::Auth);
        assert_eq!(from_file.unwrap().limiters.len(), 1);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        assert!(matches!(
            TurnstileConfig::load(Some("/nonexistent/turnstile.yaml")),
            Err(TurnstileError::Config(_))
        ));
    }
}
