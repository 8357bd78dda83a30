//! Configuration management for rpmrepo

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::meta::DEFAULT_REPOSITORY;

const SYSTEM_CONFIG: &str = "/etc/rpmrepo/rpmrepo.conf";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "rookery", "rpmrepo")
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Signing configuration
    #[serde(default)]
    pub signing: SigningConfig,

    /// Delta generation
    #[serde(default)]
    pub deltas: DeltaConfig,

    /// Meta-repository layout
    #[serde(default)]
    pub meta: MetaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Path to the repository signing key
    pub key: PathBuf,
}

impl Default for SigningConfig {
    fn default() -> Self {
        let config_dir = project_dirs()
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("~/.config/rpmrepo"));

        Self {
            key: config_dir.join("signing-key.secret"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaConfig {
    /// The `makedeltarpm` executable
    #[serde(default = "default_delta_tool")]
    pub tool: PathBuf,
}

fn default_delta_tool() -> PathBuf {
    PathBuf::from("makedeltarpm")
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            tool: default_delta_tool(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Sub-repository every meta-repository has
    #[serde(default = "default_repository")]
    pub default_repository: String,
}

fn default_repository() -> String {
    DEFAULT_REPOSITORY.to_string()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            default_repository: default_repository(),
        }
    }
}

impl Config {
    /// Load configuration from file, or use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            // Try system config
            let system_config = PathBuf::from(SYSTEM_CONFIG);
            if system_config.exists() {
                return Some(system_config);
            }

            // Try user config
            project_dirs()
                .map(|d| d.config_dir().join("rpmrepo.conf"))
                .filter(|p| p.exists())
        });

        match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config: {}", path.display()))
            }
            None => Ok(Config::default()),
        }
    }

    /// Get the directory for signing keys
    pub fn signing_key_dir(&self) -> &Path {
        self.signing.key.parent().unwrap_or(Path::new("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpmrepo.conf");
        std::fs::write(&path, "[deltas]\ntool = \"/opt/bin/makedeltarpm\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.deltas.tool, PathBuf::from("/opt/bin/makedeltarpm"));
        assert_eq!(config.meta.default_repository, "common");
        assert!(config.signing.key.ends_with("signing-key.secret"));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpmrepo.conf");
        std::fs::write(&path, "[meta\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
