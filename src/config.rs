//! Build configuration.
//!
//! All build-time constants live in one [`BuildConfig`] value that is passed
//! explicitly to every stage of the pipeline. It can be loaded from YAML:
//!
//! ```yaml
//! raw_dir: raw
//! data_dir: data
//! locations_file: GeoLite2-City-Locations-en.csv
//! blocks_file: GeoLite2-City-Blocks-IPv4.csv
//! shard_size_limit: 49052
//! malformed_rows: abort
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Storage block size on almost every current file system (4 KiB).
pub const STORAGE_BLOCK_SIZE: usize = 4096;

/// Default shard byte threshold.
///
/// Twelve storage blocks minus a small allowance for file system overhead, so
/// every block of a shard file is addressed directly from its inode.
pub const DEFAULT_SHARD_SIZE_LIMIT: usize = STORAGE_BLOCK_SIZE * 12 - 100;

/// Default directory holding the vendor CSV tables.
pub const DEFAULT_RAW_DIR: &str = "raw";

/// Default output directory.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default locations table file name.
pub const DEFAULT_LOCATIONS_FILE: &str = "GeoLite2-City-Locations-en.csv";

/// Default IPv4 blocks table file name.
pub const DEFAULT_BLOCKS_FILE: &str = "GeoLite2-City-Blocks-IPv4.csv";

/// What to do with an input row that cannot be converted into a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowPolicy {
    /// Fail the whole build.
    #[default]
    Abort,
    /// Log a warning and leave the row out.
    Skip,
}

impl RowPolicy {
    /// Apply the policy to a failed row conversion.
    ///
    /// Returns `Ok(())` when the row should be dropped and the build continue.
    pub(crate) fn recover(self, error: Error) -> Result<()> {
        match self {
            RowPolicy::Skip if error.is_row_error() => {
                log::warn!("Skipping {}", error);
                Ok(())
            }
            _ => Err(error),
        }
    }
}

/// Immutable configuration of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Directory containing the two input tables.
    pub raw_dir: PathBuf,
    /// Output directory, replaced wholesale by every build.
    pub data_dir: PathBuf,
    /// Locations table file name inside `raw_dir`.
    pub locations_file: String,
    /// Blocks table file name inside `raw_dir`.
    pub blocks_file: String,
    /// Maximum serialized size of a shard file in bytes.
    pub shard_size_limit: usize,
    /// Malformed row handling.
    pub malformed_rows: RowPolicy,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from(DEFAULT_RAW_DIR),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            locations_file: DEFAULT_LOCATIONS_FILE.to_string(),
            blocks_file: DEFAULT_BLOCKS_FILE.to_string(),
            shard_size_limit: DEFAULT_SHARD_SIZE_LIMIT,
            malformed_rows: RowPolicy::Abort,
        }
    }
}

impl BuildConfig {
    /// Create a configuration with default settings for the given directories.
    pub fn new(raw_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load a configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse a configuration from YAML text. Missing keys take their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the shard byte threshold.
    pub fn with_shard_size_limit(mut self, limit: usize) -> Self {
        self.shard_size_limit = limit;
        self
    }

    /// Set the malformed row policy.
    pub fn with_row_policy(mut self, policy: RowPolicy) -> Self {
        self.malformed_rows = policy;
        self
    }

    /// Check values that would make a build meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.shard_size_limit == 0 {
            return Err(Error::Config("shard_size_limit must be positive".to_string()));
        }
        if self.locations_file.is_empty() || self.blocks_file.is_empty() {
            return Err(Error::Config("input file names must not be empty".to_string()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("data_dir must not be empty".to_string()));
        }
        Ok(())
    }

    /// Full path of the locations table.
    pub fn locations_path(&self) -> PathBuf {
        self.raw_dir.join(&self.locations_file)
    }

    /// Full path of the blocks table.
    pub fn blocks_path(&self) -> PathBuf {
        self.raw_dir.join(&self.blocks_file)
    }
}
