//! Node cache configuration.
//!
//! Settings may be given in a TOML file; every field has a default.

use std::path::{Path, PathBuf};

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::node::Separators;

fn default_target() -> usize {
    8192
}

fn default_reclaim_attempts() -> usize {
    8
}

fn default_separator() -> char {
    '/'
}

fn default_xattr_separator() -> char {
    ':'
}

/// Sizing of the shared node pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PoolConfig {
    /// Number of nodes the pool aims to keep. Zero or absent means [`default_target`].
    ///
    /// [`default_target`]: Self::default_target
    #[serde(default)]
    pub node_target: Option<usize>,

    /// Target used when no explicit one is given.
    #[serde(default = "default_target")]
    pub default_target: usize,

    /// Memory the pool may size itself against. The target is capped so that node storage fits
    /// in a quarter of it. Probed from the system when absent.
    #[serde(default)]
    pub memory_budget: Option<ByteSize>,

    /// Hard ceiling on allocated nodes. Creation fails once it is reached and nothing idle can be
    /// recycled.
    #[serde(default)]
    pub max_nodes: Option<usize>,

    /// How many times a creation retries stealing an idle node that keeps getting resurrected
    /// before it allocates instead.
    #[serde(default = "default_reclaim_attempts")]
    pub reclaim_attempts: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            node_target: None,
            default_target: default_target(),
            memory_budget: None,
            max_nodes: None,
            reclaim_attempts: default_reclaim_attempts(),
        }
    }
}

/// Naming conventions of one mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MountOptions {
    /// Separator between a directory and its children.
    #[serde(default = "default_separator")]
    pub separator: char,

    /// Separator between a file and its extended-attribute directory.
    #[serde(default = "default_xattr_separator")]
    pub xattr_separator: char,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            xattr_separator: default_xattr_separator(),
        }
    }
}

impl MountOptions {
    /// The separators as path bytes. Non-ASCII separators fall back to the defaults; see
    /// [`FusenodeConfig::validate`].
    #[must_use]
    pub fn separators(&self) -> Separators {
        let defaults = Separators::default();
        Separators {
            path: ascii_byte(self.separator).unwrap_or(defaults.path),
            xattr: ascii_byte(self.xattr_separator).unwrap_or(defaults.xattr),
        }
    }
}

fn ascii_byte(c: char) -> Option<u8> {
    u8::try_from(c).ok().filter(u8::is_ascii)
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FusenodeConfig {
    /// Pool sizing.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Options applied to every mount.
    #[serde(default)]
    pub mount: MountOptions,
}

/// Failure to load a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration parsed but is inconsistent.
    #[error("configuration validation errors: {0:?}")]
    ValidationErrors(Vec<String>),

    /// The file is not valid TOML for this schema.
    #[error("deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    /// The file could not be read.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl FusenodeConfig {
    /// Validate the correctness of the configuration.
    ///
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (name, c) in [
            ("separator", self.mount.separator),
            ("xattr-separator", self.mount.xattr_separator),
        ] {
            if !c.is_ascii() {
                errors.push(format!("{name} {c:?} is not an ASCII character."));
            } else if c == '\0' {
                errors.push(format!("{name} must not be NUL."));
            }
        }
        if self.mount.separator == self.mount.xattr_separator {
            errors.push(format!(
                "separator and xattr-separator are both {:?}.",
                self.mount.separator
            ));
        }

        if self.pool.default_target == 0 {
            errors.push("default-target must be positive.".to_owned());
        }
        if let (Some(target), Some(max)) = (self.pool.node_target, self.pool.max_nodes)
            && target > max
        {
            errors.push(format!("node-target {target} exceeds max-nodes {max}."));
        }
        if self.pool.max_nodes == Some(0) {
            errors.push("max-nodes must be positive.".to_owned());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Returns config file paths in descending priority order.
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join("fusenode").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("fusenode").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/fusenode/config.toml"));

        paths
    }

    /// Loads and validates config from a single TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate().map_err(ConfigError::ValidationErrors)?;
        Ok(config)
    }

    /// Loads the external path if given, else the first config file found, else the defaults.
    pub fn load(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = external_config_path {
            return Self::load_from_file(path);
        }

        match Self::config_search_paths().into_iter().find(|p| p.exists()) {
            Some(path) => Self::load_from_file(&path),
            None => {
                debug!("No configuration file found, using defaults.");
                Ok(Self::default())
            }
        }
    }
}
