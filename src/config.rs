//! Engine configuration.
//!
//! Loaded from YAML, then overridden from the environment:
//!
//! ```yaml
//! platform-mode: core
//! catalog-dirs:
//!   - /usr/share/ifacepolicy/interfaces
//! include-builtins: true
//! backends: [apparmor, seccomp]
//! ```
//!
//! | variable | field |
//! |---|---|
//! | `IFACEPOLICY_PLATFORM_MODE` | `platform-mode` |
//! | `IFACEPOLICY_CATALOG_DIRS` | `catalog-dirs` (colon-separated) |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instance::PlatformMode;
use crate::interfaces::{BACKEND_APPARMOR, BACKEND_KMOD, BACKEND_SECCOMP, BACKEND_UDEV};

pub const ENV_PLATFORM_MODE: &str = "IFACEPOLICY_PLATFORM_MODE";
pub const ENV_CATALOG_DIRS: &str = "IFACEPOLICY_CATALOG_DIRS";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// How the engine is assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct EngineConfig {
    pub platform_mode: PlatformMode,

    /// Catalog directories loaded after the built-ins, in this order
    pub catalog_dirs: Vec<PathBuf>,

    pub include_builtins: bool,

    /// Enabled backend renderers
    pub backends: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            platform_mode: PlatformMode::default(),
            catalog_dirs: Vec::new(),
            include_builtins: true,
            backends: default_backends(),
        }
    }
}

fn default_backends() -> Vec<String> {
    [BACKEND_APPARMOR, BACKEND_SECCOMP, BACKEND_UDEV, BACKEND_KMOD]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Defaults overridden from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`. Unset or blank values are
    /// ignored.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(mode) = lookup(ENV_PLATFORM_MODE).filter(|v| !v.trim().is_empty()) {
            self.platform_mode = mode.parse().map_err(|reason| ConfigError::InvalidValue {
                key: ENV_PLATFORM_MODE.to_string(),
                reason,
            })?;
        }
        if let Some(dirs) = lookup(ENV_CATALOG_DIRS).filter(|v| !v.trim().is_empty()) {
            self.catalog_dirs = dirs
                .split(':')
                .filter(|d| !d.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        Ok(self)
    }
}
