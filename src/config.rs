//! Engine configuration: depot locations and resolver options.
//!
//! Configuration is stored in TOML format at `~/.carton/config.toml`. Every
//! setting has a default so a missing file behaves like an empty one.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::toml_io;

/// User configuration file (`~/.carton/config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Depot directories searched for installed packages, registries and
    /// named environments, in priority order.
    #[serde(default)]
    pub depots: Vec<PathBuf>,

    /// Dependency resolver settings
    #[serde(default)]
    pub resolver: ResolverOptions,

    /// Consult the process-wide registry file cache. Safe to disable; reads
    /// then always go to disk.
    #[serde(default = "default_use_registry_cache")]
    pub use_registry_cache: bool,
}

fn default_use_registry_cache() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverOptions {
    /// Show the full derivation tree in conflict errors instead of the
    /// collapsed summary.
    #[serde(default)]
    pub verbose_conflicts: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            verbose_conflicts: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            depots: Vec::new(),
            resolver: ResolverOptions::default(),
            use_registry_cache: default_use_registry_cache(),
        }
    }
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "could not determine a home directory",
        ))
    })
}

impl Config {
    /// Get the default config file path.
    ///
    /// Uses `CARTON_CONFIG_DIR` if set, otherwise `~/.carton/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("CARTON_CONFIG_DIR") {
            return Ok(PathBuf::from(dir).join("config.toml"));
        }
        Ok(home_dir()?.join(".carton").join("config.toml"))
    }

    /// Load config from file, or return defaults if it doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let table = toml_io::read_table(&path)?;
        let config: Config = Self::from_table(table, &path)?;
        Ok(config)
    }

    fn from_table(table: toml::Table, path: &std::path::Path) -> Result<Self> {
        toml::Value::Table(table)
            .try_into()
            .map_err(|e| Error::parse(path, e.to_string()))
    }

    /// Save config to file.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        let table = toml::Value::try_from(self)
            .map_err(|e| Error::parse(&path, e.to_string()))?;
        let toml::Value::Table(table) = table else {
            unreachable!("config serializes to a table");
        };
        toml_io::write_table(&path, &table, None)
    }

    /// The active depot list: `CARTON_DEPOT_PATH` (colon-separated) when
    /// set, the configured depots otherwise, the default depot as a
    /// fallback.
    pub fn depot_paths(&self) -> Result<Vec<PathBuf>> {
        if let Ok(env) = std::env::var("CARTON_DEPOT_PATH") {
            let depots: Vec<PathBuf> = env
                .split(':')
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
            if !depots.is_empty() {
                return Ok(depots);
            }
        }
        if !self.depots.is_empty() {
            return Ok(self.depots.clone());
        }
        Ok(vec![home_dir()?.join(".carton")])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_the_registry_cache() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.use_registry_cache);
        assert!(!config.resolver.verbose_conflicts);
        assert!(config.depots.is_empty());
    }

    #[test]
    fn resolver_options_round_trip() {
        let config: Config = toml::from_str("[resolver]\nverbose_conflicts = true\n").unwrap();
        assert!(config.resolver.verbose_conflicts);
    }
}
