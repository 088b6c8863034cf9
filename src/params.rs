//! Decoding parameters persisted alongside the index.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::format::PARAMS_FILE;
use crate::Result;

/// The two values a reader needs to decode a build.
///
/// Stored as the values computed by the writer so readers never redo the
/// square-root rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Byte length of every location slot
    #[serde(rename = "LOCATION_RECORD_SIZE")]
    pub location_record_size: usize,
    /// Entries per mid index page
    #[serde(rename = "NUMBER_NODES_PER_MIDINDEX")]
    pub nodes_per_mid_index: usize,
}

impl Params {
    /// Load params from a build directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let content = fs::read(dir.join(PARAMS_FILE))?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Save params into a build directory.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::write(dir.join(PARAMS_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Persist the location record size and mid page size into `out_dir`.
pub fn write_params(
    location_record_size: usize,
    nodes_per_mid_index: usize,
    out_dir: &Path,
) -> Result<Params> {
    let params = Params {
        location_record_size,
        nodes_per_mid_index,
    };
    params.save(out_dir)?;
    Ok(params)
}
