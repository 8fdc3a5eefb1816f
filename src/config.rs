//! Configuration for livestock-ledger

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ProcurementError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("livestock-ledger")
}

/// Inclusive numeric range for one external-id prefix.
///
/// The numeric part is zero-padded to the number of digits in `max`,
/// so `{ min = 1, max = 99999 }` yields ids like `VEN00042`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub min: u64,
    pub max: u64,
}

impl IdRange {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Digits in the formatted numeric part
    pub fn width(&self) -> usize {
        self.max.to_string().len()
    }

    /// Number of distinct values in the range, saturating at `u64::MAX`
    pub fn size(&self) -> u64 {
        self.max.saturating_sub(self.min).saturating_add(1)
    }
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the database and uploaded files
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Numeric ranges per external-id prefix
    #[serde(default = "default_id_ranges")]
    pub id_ranges: HashMap<String, IdRange>,

    /// Attempts before an allocation gives up with ExhaustedIdentifierSpace
    #[serde(default = "default_max_allocation_retries")]
    pub max_allocation_retries: u32,

    /// How long a writer waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

pub fn default_id_ranges() -> HashMap<String, IdRange> {
    [
        ("VEN", IdRange::new(1, 99_999)),
        ("HS", IdRange::new(1, 99_999)),
        ("ANI", IdRange::new(1, 9_999_999)),
        ("PAY", IdRange::new(1, 999_999)),
        ("SEL", IdRange::new(1, 99_999)),
        ("CA", IdRange::new(1, 99_999)),
        ("USR", IdRange::new(1, 99_999)),
        ("ROL", IdRange::new(1, 999)),
    ]
    .into_iter()
    .map(|(prefix, range)| (prefix.to_string(), range))
    .collect()
}

fn default_max_allocation_retries() -> u32 {
    20
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            id_ranges: default_id_ranges(),
            max_allocation_retries: default_max_allocation_retries(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Config rooted at a specific directory, defaults elsewhere
    pub fn with_storage_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Self::default()
        }
    }

    /// Range configured for a prefix
    pub fn id_range(&self, prefix: &str) -> Result<IdRange, ProcurementError> {
        self.id_ranges
            .get(prefix)
            .copied()
            .ok_or_else(|| ProcurementError::Config(format!("No id range configured for prefix {}", prefix)))
    }

    /// Reject ranges that cannot produce a formatted id
    pub fn validate(&self) -> Result<(), ProcurementError> {
        for (prefix, range) in &self.id_ranges {
            if range.min > range.max {
                return Err(ProcurementError::Config(format!(
                    "Id range for {} is empty: {} > {}",
                    prefix, range.min, range.max
                )));
            }
        }
        if self.max_allocation_retries == 0 {
            return Err(ProcurementError::Config(
                "max_allocation_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Get database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("procurement.db")
    }

    /// Get uploads directory
    pub fn uploads_dir(&self) -> PathBuf {
        self.storage_dir.join("uploads")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ranges_match_id_formats() {
        let config = Config::default();
        assert_eq!(config.id_range("VEN").unwrap().width(), 5);
        assert_eq!(config.id_range("HS").unwrap().width(), 5);
        assert_eq!(config.id_range("ANI").unwrap().width(), 7);
        assert_eq!(config.id_range("PAY").unwrap().width(), 6);
        assert_eq!(config.max_allocation_retries, 20);
    }

    #[test]
    fn test_missing_prefix_is_config_error() {
        let config = Config::default();
        let err = config.id_range("XYZ").unwrap_err();
        assert!(matches!(err, ProcurementError::Config(_)));
    }

    #[test]
    fn test_toml_roundtrip_keeps_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::with_storage_dir(dir.path());
        config.id_ranges.insert("ANI".into(), IdRange::new(1, 3));
        config.max_allocation_retries = 5;
        config.save(config.config_path()).unwrap();

        let loaded = Config::load(config.config_path()).unwrap();
        assert_eq!(loaded.id_range("ANI").unwrap(), IdRange::new(1, 3));
        assert_eq!(loaded.max_allocation_retries, 5);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("max_allocation_retries = 7").unwrap();
        assert_eq!(config.max_allocation_retries, 7);
        assert!(config.id_ranges.contains_key("PAY"));
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let mut config = Config::default();
        config.id_ranges.insert("VEN".into(), IdRange::new(10, 1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_range_size_saturates() {
        assert_eq!(IdRange::new(1, 99999).size(), 99999);
        assert_eq!(IdRange::new(0, u64::MAX).size(), u64::MAX);

        let mut config = Config::default();
        config.id_ranges.insert("VEN".into(), IdRange::new(0, u64::MAX));
        assert!(config.validate().is_ok());
    }
}
