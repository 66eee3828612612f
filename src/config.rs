//! Engine configuration, loaded from a TOML file.
//!
//! Grounded on the teacher's `Config`/`StorageConfig` (`examples/onurtuna-OasisNvr/src/config.rs`):
//! per-field `#[serde(default = "...")]` values plus a `validate()` pass run
//! once after deserializing.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub store: StoreConfig,
}

/// Parameters for the object store and its front-end cache.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Absolute path to the directory housing `objects/`, `names/`, and
    /// the lock/registry bookkeeping for this engine.
    pub dir: PathBuf,
    /// Maximum number of OIDCache entries kept resident before a sweep is
    /// considered.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Sweep throttle: only re-sweep once `full_events_since_sweep /
    /// len(entries)` exceeds this ratio.
    #[serde(default = "default_sweep_threshold")]
    pub sweep_threshold: f64,
}

fn default_cache_capacity() -> usize {
    4096
}

fn default_sweep_threshold() -> f64 {
    0.4
}

impl EngineConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read config file: {e}")))?;
        let config: EngineConfig =
            toml::from_str(&content).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.store.dir.as_os_str().is_empty() {
            return Err(Error::Config("store.dir must not be empty".into()));
        }
        if !self.store.dir.is_absolute() {
            return Err(Error::Config("store.dir must be an absolute path".into()));
        }
        if self.store.cache_capacity == 0 {
            return Err(Error::Config("store.cache_capacity must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.store.sweep_threshold) {
            return Err(Error::Config("store.sweep_threshold must be between 0.0 and 1.0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_defaults_for_omitted_fields() {
        let file = write_config("[store]\ndir = \"/var/lib/pdstore/example\"\n");
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.store.cache_capacity, default_cache_capacity());
        assert_eq!(config.store.sweep_threshold, default_sweep_threshold());
    }

    #[test]
    fn rejects_relative_dir() {
        let file = write_config("[store]\ndir = \"relative/path\"\n");
        assert!(EngineConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn rejects_zero_cache_capacity() {
        let file = write_config("[store]\ndir = \"/var/lib/pdstore\"\ncache_capacity = 0\n");
        assert!(EngineConfig::from_file(file.path()).is_err());
    }
}
