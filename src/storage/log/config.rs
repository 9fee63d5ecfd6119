use std::path::Path;

use serde_derive::{Deserialize, Serialize};

use super::index::ENTRY_WIDTH;
use crate::common::{Error, Result};

/// Limits and starting point for the segments of a log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Store size at which a segment counts as maxed.
    pub max_store_bytes: u64,
    /// Size the index file is grown to while open; bounds the entry count.
    pub max_index_bytes: u64,
    /// Base offset of the first segment.
    pub initial_offset: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_store_bytes: 1024 * 1024,
            max_index_bytes: 1024 * 1024,
            initial_offset: 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub segment: SegmentConfig,
}

impl Config {
    pub fn with_limits(max_store_bytes: u64, max_index_bytes: u64) -> Self {
        Config {
            segment: SegmentConfig {
                max_store_bytes,
                max_index_bytes,
                ..Default::default()
            },
        }
    }

    /// Loads the config from an optional TOML file, then lets
    /// `PROGLOG_SEGMENT__*` environment variables override it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                ::config::Environment::with_prefix("PROGLOG")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects limits under which no record could ever be appended.
    pub fn validate(&self) -> Result<()> {
        if self.segment.max_index_bytes < ENTRY_WIDTH {
            return Err(Error::Config(format!(
                "max_index_bytes must hold at least one {}-byte entry, got {}",
                ENTRY_WIDTH, self.segment.max_index_bytes
            )));
        }
        if self.segment.max_store_bytes == 0 {
            return Err(Error::Config("max_store_bytes must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.segment.initial_offset, 0);
    }

    #[test]
    fn test_tiny_index_is_rejected() {
        let config = Config::with_limits(1024, ENTRY_WIDTH - 1);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = Config::with_limits(0, 1024);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_file_and_env() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proglog.toml");
        std::fs::write(
            &path,
            "[segment]\nmax_store_bytes = 2048\nmax_index_bytes = 120\n",
        )
        .unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.segment.max_store_bytes, 2048);
        assert_eq!(config.segment.max_index_bytes, 120);
        assert_eq!(config.segment.initial_offset, 0);

        std::env::set_var("PROGLOG_SEGMENT__INITIAL_OFFSET", "16");
        let config = Config::load(Some(path.as_path()));
        std::env::remove_var("PROGLOG_SEGMENT__INITIAL_OFFSET");
        let config = config.unwrap();
        assert_eq!(config.segment.initial_offset, 16);
        assert_eq!(config.segment.max_store_bytes, 2048);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = Config::load(Some(dir.path().join("absent.toml").as_path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
