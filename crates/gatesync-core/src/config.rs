//! gatesync.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("plugin_sync.batch_size must be greater than zero")]
    ZeroBatchSize,
    #[error("invalid engine version '{version}': {reason}")]
    EngineVersion { version: String, reason: String },
    #[error("registry backend '{0}' requires a path")]
    MissingRegistryPath(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatesyncConfig {
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub publish: PublishConfig,
    pub stage: StageConfig,
    pub plugin_sync: PluginSyncConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/gatesync/control.redb"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegistryBackend {
    #[default]
    Redb,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,
    pub path: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Redb,
            path: Some(PathBuf::from("/var/lib/gatesync/registry.redb")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Name of the micro-gateway used for stages without a dedicated one.
    pub shared_micro_gateway: Option<String>,
    /// Engine version assumed when a micro-gateway does not declare one.
    pub default_engine_version: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            shared_micro_gateway: None,
            default_engine_version: "3.2.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Addresses trusted to set the real-ip header.
    pub trusted_proxies: Vec<String>,
    pub real_ip_header: String,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            trusted_proxies: vec!["127.0.0.1".to_string()],
            real_ip_header: "http_x_forwarded_for".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSyncConfig {
    pub batch_size: usize,
}

impl Default for PluginSyncConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub keep_versions: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { keep_versions: 20 }
    }
}

impl GatesyncConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GatesyncConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugin_sync.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        parse_engine_version(&self.publish.default_engine_version)?;
        if self.registry.backend == RegistryBackend::Redb && self.registry.path.is_none() {
            return Err(ConfigError::MissingRegistryPath("redb".to_string()));
        }
        Ok(())
    }
}

/// Parse a data-plane engine version string.
pub fn parse_engine_version(version: &str) -> Result<semver::Version, ConfigError> {
    semver::Version::parse(version).map_err(|e| ConfigError::EngineVersion {
        version: version.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GatesyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.plugin_sync.batch_size, 100);
        assert_eq!(config.retention.keep_versions, 20);
    }

    #[test]
    fn test_parse_partial() {
        let toml_str = r#"
[publish]
shared_micro_gateway = "shared-apisix"

[plugin_sync]
batch_size = 10
"#;
        let config: GatesyncConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.publish.shared_micro_gateway.as_deref(),
            Some("shared-apisix")
        );
        assert_eq!(config.plugin_sync.batch_size, 10);
        // Untouched sections keep their defaults.
        assert_eq!(config.publish.default_engine_version, "3.2.0");
        assert_eq!(config.registry.backend, RegistryBackend::Redb);
    }

    #[test]
    fn test_rejects_zero_batch() {
        let mut config = GatesyncConfig::default();
        config.plugin_sync.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroBatchSize)));
    }

    #[test]
    fn test_rejects_bad_engine_version() {
        let mut config = GatesyncConfig::default();
        config.publish.default_engine_version = "three".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EngineVersion { .. })
        ));
    }

    #[test]
    fn test_memory_registry_needs_no_path() {
        let toml_str = r#"
[registry]
backend = "memory"
"#;
        let mut config: GatesyncConfig = toml::from_str(toml_str).unwrap();
        config.registry.path = None;
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file_roundtrips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatesync.toml");
        let mut config = GatesyncConfig::default();
        config.stage.trusted_proxies = vec!["10.0.0.0/8".to_string()];
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = GatesyncConfig::from_file(&path).unwrap();
        assert_eq!(loaded.stage.trusted_proxies, vec!["10.0.0.0/8".to_string()]);
    }
}
