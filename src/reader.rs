//! Lookup client over a built index directory.
//!
//! A lookup opens at most three files besides the root page, which is held in
//! memory: one mid page, one shard, and a single fixed-width slot of the
//! location file.

use quick_cache::sync::Cache;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::block::BlockRecord;
use crate::format::{
    mid_index_file_name, shard_file_name, unframe_slot, LOCATIONS_FILE, ROOT_INDEX_FILE,
};
use crate::location::LocationRecord;
use crate::{Error, Params, Result};

/// Default cache capacity (number of parsed files).
const DEFAULT_CACHE_CAPACITY: usize = 1_000;

/// Configuration for [`GeoIpReader`].
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Maximum number of parsed mid pages and shards kept in memory.
    pub cache_capacity: usize,
    /// Whether to cache parsed files at all.
    pub cache_enabled: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_enabled: false,
        }
    }
}

impl ReaderConfig {
    /// Create a configuration caching up to `capacity` parsed files.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache_capacity: capacity,
            cache_enabled: true,
        }
    }
}

/// Geolocation of one IPv4 address.
#[derive(Debug, Clone, PartialEq)]
pub struct IpInfo {
    /// Start of the matching block and start of the next known block
    pub range: (u32, u32),
    pub country: String,
    pub region: String,
    pub eu: bool,
    pub timezone: String,
    pub city: String,
    /// Latitude and longitude
    pub ll: (f64, f64),
    pub metro: u32,
    /// Accuracy radius in kilometers
    pub area: u32,
}

/// Reader for an index directory produced by [`GeoIpIndexBuilder`](crate::GeoIpIndexBuilder).
pub struct GeoIpReader {
    dir: PathBuf,
    params: Params,
    root: Vec<u32>,
    pages: Option<Cache<usize, Arc<Vec<u32>>>>,
    shards: Option<Cache<usize, Arc<Vec<BlockRecord>>>>,
}

impl GeoIpReader {
    /// Open an index directory without caching.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(dir, ReaderConfig::default())
    }

    /// Open an index directory with a custom configuration.
    pub fn open_with_config(dir: impl AsRef<Path>, config: ReaderConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let params = Params::load(&dir)?;
        let root: Vec<u32> = read_json(&dir, ROOT_INDEX_FILE)?;

        let (pages, shards) = if config.cache_enabled && config.cache_capacity > 0 {
            (
                Some(Cache::new(config.cache_capacity)),
                Some(Cache::new(config.cache_capacity)),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            dir,
            params,
            root,
            pages,
            shards,
        })
    }

    /// Parameters of the opened build.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Look up a dotted-quad address.
    pub fn lookup_str(&self, ip: &str) -> Result<Option<IpInfo>> {
        let addr: Ipv4Addr = ip
            .parse()
            .map_err(|_| Error::InvalidIpAddress(ip.to_string()))?;
        self.lookup(addr)
    }

    /// Look up an address.
    ///
    /// Returns `None` when the address precedes every block or its block has
    /// no location.
    pub fn lookup(&self, addr: Ipv4Addr) -> Result<Option<IpInfo>> {
        let ip = u32::from(addr);

        let Some(root_pos) = last_at_or_below(self.root.as_slice(), ip, |&key| key) else {
            return Ok(None);
        };
        let mut next_ip = self.root.get(root_pos + 1).copied().unwrap_or(u32::MAX);

        let page = self.mid_page(root_pos)?;
        let mid_pos = last_at_or_below(page.as_slice(), ip, |&key| key).ok_or_else(|| {
            corrupt(mid_index_file_name(root_pos), "page starts after its root entry")
        })?;
        if let Some(&next) = page.get(mid_pos + 1) {
            next_ip = next;
        }

        let shard_no = root_pos * self.params.nodes_per_mid_index + mid_pos;
        let shard = self.shard(shard_no)?;
        let pos = last_at_or_below(shard.as_slice(), ip, |record| record.range_start)
            .ok_or_else(|| {
                corrupt(shard_file_name(shard_no), "shard starts after its index entry")
            })?;
        let block = shard[pos];
        if let Some(next) = shard.get(pos + 1) {
            next_ip = next.range_start;
        }

        let Some(location) = block.location else {
            return Ok(None);
        };
        let location = self.location(location)?;

        Ok(Some(IpInfo {
            range: (block.range_start, next_ip),
            country: location.country,
            region: location.subdivision,
            eu: location.in_eu,
            timezone: location.time_zone,
            city: location.city,
            ll: (block.latitude, block.longitude),
            metro: location.metro_code,
            area: block.accuracy_radius,
        }))
    }

    /// Read location record `index` from its fixed-width slot.
    pub fn location(&self, index: u32) -> Result<LocationRecord> {
        let size = self.params.location_record_size;
        let mut file = File::open(self.dir.join(LOCATIONS_FILE))?;
        file.seek(SeekFrom::Start(index as u64 * size as u64))?;

        let mut slot = vec![0u8; size];
        file.read_exact(&mut slot)?;
        Ok(serde_json::from_slice(unframe_slot(&slot)?)?)
    }

    /// Drop all cached files.
    pub fn clear_cache(&self) {
        if let Some(ref pages) = self.pages {
            pages.clear();
        }
        if let Some(ref shards) = self.shards {
            shards.clear();
        }
    }

    fn mid_page(&self, n: usize) -> Result<Arc<Vec<u32>>> {
        cached(self.pages.as_ref(), n, || read_json(&self.dir, &mid_index_file_name(n)))
    }

    fn shard(&self, n: usize) -> Result<Arc<Vec<BlockRecord>>> {
        cached(self.shards.as_ref(), n, || read_json(&self.dir, &shard_file_name(n)))
    }
}

fn cached<T, F>(cache: Option<&Cache<usize, Arc<T>>>, key: usize, load: F) -> Result<Arc<T>>
where
    F: FnOnce() -> Result<T>,
{
    if let Some(value) = cache.and_then(|c| c.get(&key)) {
        return Ok(value);
    }
    let value = Arc::new(load()?);
    if let Some(c) = cache {
        c.insert(key, value.clone());
    }
    Ok(value)
}

fn read_json<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T> {
    let bytes = fs::read(dir.join(name))?;
    serde_json::from_slice(&bytes).map_err(|e| corrupt(name.to_string(), &e.to_string()))
}

fn corrupt(file: String, reason: &str) -> Error {
    Error::CorruptData {
        file,
        reason: reason.to_string(),
    }
}

/// Position of the last item whose key is `<= ip`.
fn last_at_or_below<T, F>(items: &[T], ip: u32, key: F) -> Option<usize>
where
    F: Fn(&T) -> u32,
{
    items.partition_point(|item| key(item) <= ip).checked_sub(1)
}
