//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::PolicyRegistry;

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// In-memory store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Path to a YAML file overriding or adding policy presets
    #[serde(default)]
    pub policies_path: Option<String>,
}

/// Store housekeeping configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Run a stale-entry sweep every this many accesses to a map
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    /// Hard ceiling on entries per map before emergency eviction
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// How long a full token bucket may sit idle before it is swept
    #[serde(default = "default_bucket_idle_ttl")]
    pub bucket_idle_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: default_cleanup_interval(),
            max_entries: default_max_entries(),
            bucket_idle_ttl_secs: default_bucket_idle_ttl(),
        }
    }
}

impl StoreConfig {
    /// Idle threshold for token bucket cleanup.
    pub fn bucket_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_ttl_secs)
    }

    /// Reject settings that would disable housekeeping.
    pub fn validate(&self) -> Result<()> {
        if self.cleanup_interval == 0 {
            return Err(TollgateError::Config(
                "store.cleanup_interval must be greater than zero".to_string(),
            ));
        }
        if self.max_entries == 0 {
            return Err(TollgateError::Config(
                "store.max_entries must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_cleanup_interval() -> u64 {
    500
}

fn default_max_entries() -> usize {
    50_000
}

fn default_bucket_idle_ttl() -> u64 {
    600
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TollgateConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.store.validate()
    }

    /// Build the policy registry: built-in presets overlaid with the
    /// configured policies file, if any.
    pub fn load_registry(&self) -> Result<PolicyRegistry> {
        let registry = match &self.policies_path {
            Some(path) => PolicyRegistry::builtin().merge_file(path)?,
            None => PolicyRegistry::builtin(),
        };
        info!(
            version = registry.version(),
            policies = registry.len(),
            "Policy presets loaded"
        );
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.store.cleanup_interval, 500);
        assert_eq!(config.store.max_entries, 50_000);
        assert_eq!(config.store.bucket_idle_ttl(), Duration::from_secs(600));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(config.policies_path.is_none());
    }

    #[test]
    fn test_parse_partial_yaml_fills_defaults() {
        let yaml = r#"
store:
  max_entries: 1000
logging:
  json: true
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store.max_entries, 1000);
        assert_eq!(config.store.cleanup_interval, 500);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_cleanup_interval_rejected() {
        let yaml = r#"
store:
  cleanup_interval: 0
"#;
        let err = TollgateConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_zero_max_entries_rejected() {
        let config = StoreConfig {
            max_entries: 0,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_registry_without_policies_file_is_builtin() {
        let registry = TollgateConfig::default().load_registry().unwrap();
        assert!(registry.get("financial_write").is_some());
    }

    #[test]
    fn test_missing_policies_file_is_io_error() {
        let config = TollgateConfig {
            policies_path: Some("/nonexistent/tollgate-policies.yaml".to_string()),
            ..TollgateConfig::default()
        };
        let err = config.load_registry().unwrap_err();
        assert!(matches!(err, TollgateError::Io(_)));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_load_is_logged_once_with_policies_file() {
        let path = std::env::temp_dir().join(format!(
            "tollgate-policies-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "version: 7\npolicies:\n  - name: search\n    limit: 40\n",
        )
        .unwrap();
        let config = TollgateConfig {
            policies_path: Some(path.display().to_string()),
            ..TollgateConfig::default()
        };

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let registry =
            tracing::subscriber::with_default(subscriber, || config.load_registry()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(registry.version(), 7);
        assert!(registry.get("search").is_some());
        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert_eq!(output.matches("Policy presets loaded").count(), 1);
    }
}
