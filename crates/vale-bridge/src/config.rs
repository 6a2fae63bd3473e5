//! Configuration file support for vale-bridged
//!
//! Loads and validates the bridge layout from a TOML file.
//! Default location: /etc/vale/bridge.toml

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use vale_fabric::{PortIndex, PortMask, MAX_PORTS};

use crate::policy::PolicyKind;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vale/bridge.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Bridge layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeLayout {
    /// Bridge name, including the VALE prefix and trailing colon
    #[serde(default = "default_bridge_name")]
    pub name: String,

    /// Ports created and attached at startup, in order
    #[serde(default = "default_ports")]
    pub ports: Vec<String>,
}

/// Forwarding policy selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Policy to install
    #[serde(default)]
    pub kind: PolicyKind,

    /// Source indices whose frames are dropped (restricted policy only)
    #[serde(default = "default_restricted_ports")]
    pub restricted_ports: Vec<u16>,
}

/// Startup behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Run the shutdown sequence when startup fails
    #[serde(default)]
    pub rollback_on_failure: bool,
}

/// Complete vale-bridged configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub bridge: BridgeLayout,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub startup: StartupConfig,
}

fn default_bridge_name() -> String {
    "vale0:".to_string()
}

fn default_ports() -> Vec<String> {
    vec!["v0".to_string(), "v1".to_string(), "v2".to_string()]
}

fn default_restricted_ports() -> Vec<u16> {
    vec![1, 2]
}

impl Default for BridgeLayout {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            ports: default_ports(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: PolicyKind::default(),
            restricted_ports: default_restricted_ports(),
        }
    }
}

impl PolicyConfig {
    /// Restricted source indices as a mask. Out-of-range indices are skipped;
    /// `BridgeConfig::validate` rejects them.
    pub fn restricted_mask(&self) -> PortMask {
        self.restricted_ports
            .iter()
            .copied()
            .filter_map(PortIndex::new)
            .collect()
    }
}

impl BridgeConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> ConfigResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.bridge.name.is_empty() {
            return Err(ConfigError::invalid("bridge name must not be empty"));
        }

        if self.bridge.ports.is_empty() {
            return Err(ConfigError::invalid("at least one port is required"));
        }

        if self.bridge.ports.len() > MAX_PORTS {
            return Err(ConfigError::invalid(format!(
                "{} ports configured, a bridge holds at most {}",
                self.bridge.ports.len(),
                MAX_PORTS
            )));
        }

        let mut seen = HashSet::new();
        for port in &self.bridge.ports {
            if port.is_empty() {
                return Err(ConfigError::invalid("port names must not be empty"));
            }
            if !seen.insert(port.as_str()) {
                return Err(ConfigError::invalid(format!("duplicate port name '{}'", port)));
            }
        }

        if let Some(bad) = self
            .policy
            .restricted_ports
            .iter()
            .find(|&&index| usize::from(index) >= MAX_PORTS)
        {
            return Err(ConfigError::invalid(format!(
                "restricted port index {} must be below {}",
                bad, MAX_PORTS
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.bridge.name, "vale0:");
        assert_eq!(config.bridge.ports, vec!["v0", "v1", "v2"]);
        assert_eq!(config.policy.kind, PolicyKind::Restricted);
        assert_eq!(config.policy.restricted_ports, vec![1, 2]);
        assert!(!config.startup.rollback_on_failure);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(BridgeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_bridge_name() {
        let mut config = BridgeConfig::default();
        config.bridge.name.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_no_ports() {
        let mut config = BridgeConfig::default();
        config.bridge.ports.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_ports() {
        let mut config = BridgeConfig::default();
        config.bridge.ports.push("v1".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate port name 'v1'"));
    }

    #[test]
    fn test_validate_restricted_out_of_range() {
        let mut config = BridgeConfig::default();
        config.policy.restricted_ports = vec![1, 254];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_restricted_mask() {
        let config = BridgeConfig::default();
        let mask = config.policy.restricted_mask();
        assert_eq!(mask.len(), 2);
        assert!(mask.contains(PortIndex::new(1).unwrap()));
        assert!(mask.contains(PortIndex::new(2).unwrap()));

        let policy = PolicyConfig {
            restricted_ports: vec![3, 999],
            ..PolicyConfig::default()
        };
        assert_eq!(policy.restricted_mask().len(), 1);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[bridge]
name = "vale1:"

[policy]
kind = "flood"

[startup]
rollback_on_failure = true
"#;
        let config: BridgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bridge.name, "vale1:");
        assert_eq!(config.policy.kind, PolicyKind::Flood);
        assert!(config.startup.rollback_on_failure);
        // Unspecified values should use defaults
        assert_eq!(config.bridge.ports, vec!["v0", "v1", "v2"]);
        assert_eq!(config.policy.restricted_ports, vec![1, 2]);
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = BridgeConfig::load_or_default("/nonexistent/bridge.toml").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[bridge]\nname = \"vale7:\"\nports = [\"a\", \"b\"]\n\n[policy]\nrestricted_ports = [1]"
        )
        .unwrap();

        let config = BridgeConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.bridge.name, "vale7:");
        assert_eq!(config.bridge.ports, vec!["a", "b"]);
        assert_eq!(config.policy.restricted_ports, vec![1]);
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[bridge\nname = ").unwrap();
        let err = BridgeConfig::load_or_default(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        let mut config = BridgeConfig::default();
        config.startup.rollback_on_failure = true;
        config.save(&path).unwrap();

        let loaded = BridgeConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
