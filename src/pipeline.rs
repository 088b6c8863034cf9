//! Full index build: CSV tables in, published index directory out.

use std::path::Path;

use crate::block::build_shards;
use crate::index::build_index;
use crate::ingest::CsvTable;
use crate::location::build_locations;
use crate::params::write_params;
use crate::publish::{publish, scratch_dir_for};
use crate::{BuildConfig, Params, Result};

/// Counts reported by a finished build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    /// Location records written
    pub locations: usize,
    /// Block records written
    pub blocks: usize,
    /// Shard files written
    pub shards: usize,
    /// Rows dropped under [`RowPolicy::Skip`](crate::RowPolicy::Skip)
    pub skipped_rows: usize,
    /// Persisted decoding parameters
    pub params: Params,
}

/// Builds the index directory described by a [`BuildConfig`].
///
/// # Example
///
/// ```ignore
/// use geoshard::{BuildConfig, GeoIpIndexBuilder};
///
/// let summary = GeoIpIndexBuilder::new(BuildConfig::new("raw", "data")).build()?;
/// println!("{} shards", summary.shards);
/// ```
pub struct GeoIpIndexBuilder {
    config: BuildConfig,
}

impl GeoIpIndexBuilder {
    /// Create a builder for the given configuration.
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// The configuration this builder runs with.
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run the whole pipeline and publish the result over `data_dir`.
    ///
    /// Both input tables are opened before anything is written. On any error
    /// the scratch directory is discarded and the previous output stays as it
    /// was.
    pub fn build(&self) -> Result<BuildSummary> {
        let config = &self.config;
        config.validate()?;

        let locations = CsvTable::open(config.locations_path())?;
        let blocks = CsvTable::open(config.blocks_path())?;

        let scratch = scratch_dir_for(&config.data_dir)?;
        log::info!(
            "Building index from {:?} into scratch directory {:?}",
            config.raw_dir,
            scratch.path()
        );

        let summary = self.build_into(locations, blocks, scratch.path())?;
        publish(scratch, &config.data_dir)?;

        log::info!(
            "Build complete: {} locations, {} blocks, {} shards",
            summary.locations,
            summary.blocks,
            summary.shards
        );
        Ok(summary)
    }

    fn build_into(
        &self,
        locations: CsvTable,
        blocks: CsvTable,
        out_dir: &Path,
    ) -> Result<BuildSummary> {
        let config = &self.config;

        log::info!("Processing locations from {:?}", locations.path());
        let location_table = build_locations(locations, config.malformed_rows, out_dir)?;

        log::info!("Processing blocks from {:?}", blocks.path());
        let shards = build_shards(
            blocks,
            location_table.geonames(),
            config.shard_size_limit,
            config.malformed_rows,
            out_dir,
        )?;

        let page_size = build_index(&shards.first_ips, out_dir)?;
        let params = write_params(location_table.record_size(), page_size, out_dir)?;

        Ok(BuildSummary {
            locations: location_table.len(),
            blocks: shards.block_count,
            shards: shards.first_ips.len(),
            skipped_rows: location_table.skipped() + shards.skipped,
            params,
        })
    }
}
