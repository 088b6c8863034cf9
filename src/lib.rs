//! geoshard - builds a static, binary-searchable IPv4 geolocation index.
//!
//! This crate converts the GeoLite2 City CSV tables (locations and IPv4
//! blocks) into a directory of small files that a lookup client can search
//! without loading the dataset into memory.
//!
//! # Features
//!
//! - **Fixed-width location file**: record `i` lives at byte `i * record_size`
//! - **Size-bounded shards**: block records packed into files that fit in a
//!   handful of storage blocks
//! - **Two-level index**: root and mid pages of about `sqrt(N)` keys each over
//!   the shard boundaries
//! - **Atomic publish**: builds go into a scratch directory that replaces the
//!   output directory in one rename
//! - **Lookup client**: [`GeoIpReader`] resolves an address with at most three
//!   small file reads
//!
//! # Quick Start
//!
//! ```ignore
//! use geoshard::{BuildConfig, GeoIpIndexBuilder, GeoIpReader};
//!
//! let config = BuildConfig::new("raw", "data");
//! let summary = GeoIpIndexBuilder::new(config).build()?;
//! println!("{} shards, {} blocks", summary.shards, summary.blocks);
//!
//! let reader = GeoIpReader::open("data")?;
//! if let Some(info) = reader.lookup_str("207.97.227.239")? {
//!     println!("{} {}", info.country, info.timezone);
//! }
//! ```
//!
//! # Pipeline
//!
//! 1. [`ingest`]: CSV tables as lazy row iterators
//! 2. [`location`]: geoname id mapping and the location file
//! 3. [`block`]: block records and shard files
//! 4. [`index`]: root and mid pages over shard first IPs
//! 5. [`params`]: record size and page size for readers

mod config;
mod error;
mod metadata;
mod pipeline;

pub mod block;
pub mod download;
pub mod format;
pub mod index;
pub mod ingest;
pub mod location;
pub mod params;
pub mod publish;
pub mod reader;

// Re-export core types
pub use config::{BuildConfig, RowPolicy, DEFAULT_SHARD_SIZE_LIMIT, STORAGE_BLOCK_SIZE};
pub use error::{Error, Result};
pub use params::Params;

// Re-export the pipeline
pub use pipeline::{BuildSummary, GeoIpIndexBuilder};

// Re-export pipeline stages
pub use block::{build_shards, ip_to_int, BlockRecord, LocationRef, ShardWriter};
pub use index::{build_index, TwoLevelIndex};
pub use location::{build_locations, GeonameIndex, LocationRecord, LocationTable};
pub use params::write_params;

// Re-export the lookup client
pub use reader::{GeoIpReader, IpInfo, ReaderConfig};

// Re-export dataset download
pub use download::DatasetDownloader;
pub use metadata::DownloadMetadata;
