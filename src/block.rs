//! IPv4 block records and the size-bounded shard writer.

use ipnet::Ipv4Net;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::format::shard_file_name;
use crate::ingest::CsvRow;
use crate::location::GeonameIndex;
use crate::{Error, Result, RowPolicy};

/// Column indices consumed from the blocks table.
pub mod columns {
    pub const NETWORK: usize = 0;
    pub const GEONAME_ID: usize = 1;
    pub const REGISTERED_COUNTRY_GEONAME_ID: usize = 2;
    pub const LATITUDE: usize = 7;
    pub const LONGITUDE: usize = 8;
    pub const ACCURACY_RADIUS: usize = 9;
}

const TABLE: &str = "blocks";

/// Convert a dotted-quad IPv4 address to its big-endian integer value.
pub fn ip_to_int(ip: &str) -> Result<u32> {
    ip.parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| Error::InvalidIpAddress(ip.to_string()))
}

/// Range start of a CIDR network. The prefix length is discarded.
pub fn cidr_start(cidr: &str) -> Result<u32> {
    cidr.parse::<Ipv4Net>()
        .map(|net| u32::from(net.addr()))
        .map_err(|_| Error::InvalidCidr(cidr.to_string()))
}

/// Outcome of resolving a block's location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationRef {
    /// Resolved through the block's own geoname id
    Primary(u32),
    /// Resolved through the registered country's geoname id
    RegisteredCountry(u32),
    /// Neither id is present in the locations table
    Unresolved,
}

impl LocationRef {
    /// Resolve a block's location: primary geoname id first, then the
    /// registered country's. Empty ids never match.
    pub fn resolve(geonames: &GeonameIndex, primary: &str, registered_country: &str) -> Self {
        let lookup = |id: &str| {
            if id.is_empty() {
                None
            } else {
                geonames.get(id).copied()
            }
        };

        if let Some(index) = lookup(primary) {
            LocationRef::Primary(index)
        } else if let Some(index) = lookup(registered_country) {
            LocationRef::RegisteredCountry(index)
        } else {
            LocationRef::Unresolved
        }
    }

    /// Location index, if resolved.
    pub fn index(self) -> Option<u32> {
        match self {
            LocationRef::Primary(index) | LocationRef::RegisteredCountry(index) => Some(index),
            LocationRef::Unresolved => None,
        }
    }
}

/// One IPv4 block as stored in a shard.
///
/// Encoded as the JSON array
/// `[range_start, location | null, latitude, longitude, accuracy_radius]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockRecord {
    pub range_start: u32,
    pub location: Option<u32>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_radius: u32,
}

impl Serialize for BlockRecord {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (
            self.range_start,
            self.location,
            self.latitude,
            self.longitude,
            self.accuracy_radius,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BlockRecord {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (range_start, location, latitude, longitude, accuracy_radius) =
            <(u32, Option<u32>, f64, f64, u32)>::deserialize(deserializer)?;
        Ok(Self {
            range_start,
            location,
            latitude,
            longitude,
            accuracy_radius,
        })
    }
}

/// A typed row of the blocks table.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRow {
    pub range_start: u32,
    pub location: LocationRef,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_radius: u32,
}

impl BlockRow {
    /// Convert a raw CSV row, resolving its location against `geonames`.
    ///
    /// Empty numeric fields become zero.
    pub fn from_csv(row: &CsvRow, geonames: &GeonameIndex) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedRow {
            table: TABLE,
            line: row.line,
            reason,
        };
        let field = move |column: usize| {
            row.get(column)
                .ok_or_else(|| malformed(format!("missing column {}", column)))
        };

        let range_start =
            cidr_start(field(columns::NETWORK)?).map_err(|e| malformed(e.to_string()))?;
        let location = LocationRef::resolve(
            geonames,
            field(columns::GEONAME_ID)?,
            field(columns::REGISTERED_COUNTRY_GEONAME_ID)?,
        );

        Ok(Self {
            range_start,
            location,
            latitude: parse_coordinate(field(columns::LATITUDE)?, "latitude")
                .map_err(malformed)?,
            longitude: parse_coordinate(field(columns::LONGITUDE)?, "longitude")
                .map_err(malformed)?,
            accuracy_radius: parse_number(field(columns::ACCURACY_RADIUS)?, "accuracy radius")
                .map_err(malformed)?,
        })
    }

    /// The record written to the shard.
    pub fn record(&self) -> BlockRecord {
        BlockRecord {
            range_start: self.range_start,
            location: self.location.index(),
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy_radius: self.accuracy_radius,
        }
    }
}

fn parse_number<T>(value: &str, name: &str) -> std::result::Result<T, String>
where
    T: std::str::FromStr + Default,
{
    if value.is_empty() {
        return Ok(T::default());
    }
    value
        .parse()
        .map_err(|_| format!("invalid {}: {:?}", name, value))
}

/// Like [`parse_number`], but rejects NaN and infinities, which JSON cannot hold.
fn parse_coordinate(value: &str, name: &str) -> std::result::Result<f64, String> {
    let parsed: f64 = parse_number(value, name)?;
    if !parsed.is_finite() {
        return Err(format!("non-finite {}: {:?}", name, value));
    }
    Ok(parsed)
}

/// Packs serialized block records into shard files no larger than a byte limit.
///
/// A shard file is a JSON array of records. When appending a record would
/// push the shard past the limit, the shard is written out and the record
/// opens the next one. A record that alone exceeds the limit gets a shard of
/// its own.
pub struct ShardWriter {
    out_dir: PathBuf,
    limit: usize,
    buffer: Vec<u8>,
    first_ip: Option<u32>,
    last_ip: Option<u32>,
    out_of_order: usize,
    first_ips: Vec<u32>,
}

impl ShardWriter {
    /// Create a writer emitting shards into `out_dir`.
    pub fn new(out_dir: &Path, limit: usize) -> Self {
        Self {
            out_dir: out_dir.to_path_buf(),
            limit,
            buffer: Vec::with_capacity(limit),
            first_ip: None,
            last_ip: None,
            out_of_order: 0,
            first_ips: Vec::new(),
        }
    }

    /// Append a record to the current shard.
    pub fn push(&mut self, record: &BlockRecord) -> Result<()> {
        let encoded = serde_json::to_vec(record)?;

        // Open shard grows by ',' + record, and closes with ']'
        if self.first_ip.is_some() && self.buffer.len() + encoded.len() + 2 > self.limit {
            self.flush_shard()?;
        }

        if self.first_ip.is_none() {
            if encoded.len() + 2 > self.limit {
                log::warn!(
                    "Block record at {} is {} bytes, exceeding the {} byte shard limit",
                    Ipv4Addr::from(record.range_start),
                    encoded.len(),
                    self.limit
                );
            }
            self.buffer.push(b'[');
            self.first_ip = Some(record.range_start);
        } else {
            self.buffer.push(b',');
        }
        self.buffer.extend_from_slice(&encoded);

        if self.last_ip.is_some_and(|last| record.range_start < last) {
            self.out_of_order += 1;
        }
        self.last_ip = Some(record.range_start);
        Ok(())
    }

    /// Write the final shard and return the first IP of every shard.
    pub fn finish(mut self) -> Result<Vec<u32>> {
        if self.first_ip.is_some() {
            self.flush_shard()?;
        }
        if self.out_of_order > 0 {
            log::warn!(
                "{} block records were not in ascending order; lookups over them will be wrong",
                self.out_of_order
            );
        }
        Ok(self.first_ips)
    }

    /// Number of shards written so far.
    pub fn shard_count(&self) -> usize {
        self.first_ips.len()
    }

    fn flush_shard(&mut self) -> Result<()> {
        let Some(first_ip) = self.first_ip.take() else {
            return Ok(());
        };
        self.buffer.push(b']');

        let name = shard_file_name(self.first_ips.len());
        fs::write(self.out_dir.join(&name), &self.buffer)?;
        log::debug!("Wrote shard {} ({} bytes)", name, self.buffer.len());

        self.first_ips.push(first_ip);
        self.buffer.clear();
        Ok(())
    }
}

/// Result of sharding the blocks table.
#[derive(Debug, Default)]
pub struct BlockShards {
    /// First range start of every shard, in shard order
    pub first_ips: Vec<u32>,
    /// Number of records written
    pub block_count: usize,
    /// Rows dropped under [`RowPolicy::Skip`]
    pub skipped: usize,
}

/// Shard the rows of the blocks table into `out_dir`.
///
/// Rows must already be sorted by range start; they are written in input order.
pub fn build_shards<I>(
    rows: I,
    geonames: &GeonameIndex,
    limit: usize,
    policy: RowPolicy,
    out_dir: &Path,
) -> Result<BlockShards>
where
    I: IntoIterator<Item = Result<CsvRow>>,
{
    let mut writer = ShardWriter::new(out_dir, limit);
    let mut block_count = 0;
    let mut skipped = 0;

    for row in rows {
        let row = row?;
        match BlockRow::from_csv(&row, geonames) {
            Ok(block) => {
                writer.push(&block.record())?;
                block_count += 1;
            }
            Err(e) => {
                policy.recover(e)?;
                skipped += 1;
            }
        }
    }

    let first_ips = writer.finish()?;
    log::info!(
        "Wrote {} block records into {} shards",
        block_count,
        first_ips.len()
    );

    Ok(BlockShards {
        first_ips,
        block_count,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn geonames() -> GeonameIndex {
        let mut map = GeonameIndex::default();
        map.insert("6252001".to_string(), 1);
        map
    }

    fn block_row(line: u64, network: &str, geoname: &str, country: &str, ll: [&str; 3]) -> CsvRow {
        CsvRow::new(
            line,
            &[network, geoname, country, "", "0", "0", "", ll[0], ll[1], ll[2]],
        )
    }

    fn read_shard(dir: &Path, n: usize) -> (Vec<u8>, Vec<BlockRecord>) {
        let bytes = fs::read(dir.join(shard_file_name(n))).unwrap();
        let records = serde_json::from_slice(&bytes).unwrap();
        (bytes, records)
    }

    #[test]
    fn test_ip_to_int() {
        assert_eq!(ip_to_int("0.0.1.0").unwrap(), 256);
        assert_eq!(ip_to_int("0.0.0.244").unwrap(), 244);
        assert_eq!(ip_to_int("255.255.255.255").unwrap(), u32::MAX);
        assert_eq!(ip_to_int("81.22.36.183").unwrap(), 1360405687);
        assert!(ip_to_int("256.0.0.1").is_err());
        assert!(ip_to_int("1.2.3").is_err());
    }

    #[test]
    fn test_cidr_start_discards_prefix() {
        assert_eq!(cidr_start("1.0.0.0/24").unwrap(), 16777216);
        assert_eq!(cidr_start("207.97.192.0/18").unwrap(), ip_to_int("207.97.192.0").unwrap());
        assert!(matches!(cidr_start("1.0.0.0"), Err(Error::InvalidCidr(_))));
        assert!(cidr_start("1.0.0.0/33").is_err());
        assert!(cidr_start("::1/128").is_err());
    }

    #[test]
    fn test_location_fallback_chain() {
        let geonames = geonames();
        assert_eq!(
            LocationRef::resolve(&geonames, "6252001", "999"),
            LocationRef::Primary(1)
        );
        assert_eq!(
            LocationRef::resolve(&geonames, "", "6252001"),
            LocationRef::RegisteredCountry(1)
        );
        assert_eq!(
            LocationRef::resolve(&geonames, "123", "6252001"),
            LocationRef::RegisteredCountry(1)
        );
        assert_eq!(LocationRef::resolve(&geonames, "", ""), LocationRef::Unresolved);
        assert_eq!(LocationRef::Unresolved.index(), None);
    }

    #[test]
    fn test_block_row_defaults() {
        let geonames = geonames();
        let row = block_row(3, "23.161.144.0/20", "", "6252001", ["", "", ""]);
        let block = BlockRow::from_csv(&row, &geonames).unwrap();
        assert_eq!(block.location, LocationRef::RegisteredCountry(1));
        assert_eq!(
            block.record(),
            BlockRecord {
                range_start: ip_to_int("23.161.144.0").unwrap(),
                location: Some(1),
                latitude: 0.0,
                longitude: 0.0,
                accuracy_radius: 0,
            }
        );
    }

    #[test]
    fn test_block_row_encoding() {
        let geonames = geonames();
        let row = block_row(
            2,
            "207.97.192.0/18",
            "6252001",
            "6252001",
            ["37.7510", "-97.8220", "1000"],
        );
        let record = BlockRow::from_csv(&row, &geonames).unwrap().record();
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            "[3479289856,1,37.751,-97.822,1000]"
        );

        let unresolved = block_row(4, "80.231.5.0/24", "", "", ["", "", ""]);
        let record = BlockRow::from_csv(&unresolved, &geonames).unwrap().record();
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            "[1357317376,null,0.0,0.0,0]"
        );
    }

    #[test]
    fn test_block_row_errors() {
        let geonames = geonames();
        let bad_cidr = block_row(5, "not-an-ip/8", "", "", ["", "", ""]);
        assert!(matches!(
            BlockRow::from_csv(&bad_cidr, &geonames),
            Err(Error::MalformedRow { line: 5, .. })
        ));

        let bad_radius = block_row(6, "1.0.0.0/24", "", "", ["", "", "far"]);
        assert!(BlockRow::from_csv(&bad_radius, &geonames).is_err());

        let short = CsvRow::new(7, &["1.0.0.0/24", ""]);
        assert!(BlockRow::from_csv(&short, &geonames).is_err());

        // serde_json would write these as null
        for value in ["NaN", "inf", "-infinity"] {
            let row = block_row(8, "1.0.0.0/24", "6252001", "", [value, "1.0", "5"]);
            assert!(matches!(
                BlockRow::from_csv(&row, &geonames),
                Err(Error::MalformedRow { line: 8, .. })
            ));
            let row = block_row(9, "1.0.0.0/24", "6252001", "", ["1.0", value, "5"]);
            assert!(BlockRow::from_csv(&row, &geonames).is_err());
        }
    }

    #[test]
    fn test_shards_respect_limit() {
        let dir = tempdir().unwrap();
        let limit = 100;
        let mut writer = ShardWriter::new(dir.path(), limit);

        for i in 0..50u32 {
            writer
                .push(&BlockRecord {
                    range_start: i * 256,
                    location: Some(i % 3),
                    latitude: 1.5,
                    longitude: -2.25,
                    accuracy_radius: 10,
                })
                .unwrap();
        }
        let first_ips = writer.finish().unwrap();
        assert!(first_ips.len() > 1);

        let mut all = Vec::new();
        for (n, first_ip) in first_ips.iter().enumerate() {
            let (bytes, records) = read_shard(dir.path(), n);
            assert!(bytes.len() <= limit, "shard {} is {} bytes", n, bytes.len());
            assert_eq!(records[0].range_start, *first_ip);
            all.extend(records);
        }
        assert_eq!(all.len(), 50);
        assert!(first_ips.windows(2).all(|w| w[0] < w[1]));
        assert!(all.iter().enumerate().all(|(i, r)| r.range_start == i as u32 * 256));
    }

    #[test]
    fn test_shard_fills_to_exact_limit() {
        let dir = tempdir().unwrap();
        let record = BlockRecord {
            range_start: 1,
            location: None,
            latitude: 0.0,
            longitude: 0.0,
            accuracy_radius: 0,
        };
        // "[1,null,0.0,0.0,0]" is 18 bytes; two records fill "[" + 18 + "," + 18 + "]"
        let mut writer = ShardWriter::new(dir.path(), 39);
        writer.push(&record).unwrap();
        writer.push(&record).unwrap();
        assert_eq!(writer.shard_count(), 0);
        writer.push(&record).unwrap();
        assert_eq!(writer.shard_count(), 1);
        let first_ips = writer.finish().unwrap();

        assert_eq!(first_ips.len(), 2);
        assert_eq!(read_shard(dir.path(), 0).0.len(), 39);
        assert_eq!(read_shard(dir.path(), 1).1.len(), 1);
    }

    #[test]
    fn test_oversized_record_gets_own_shard() {
        let dir = tempdir().unwrap();
        let mut writer = ShardWriter::new(dir.path(), 10);
        for ip in [1u32, 2, 3] {
            writer
                .push(&BlockRecord {
                    range_start: ip,
                    location: Some(7),
                    latitude: 12.5,
                    longitude: 1.0,
                    accuracy_radius: 5,
                })
                .unwrap();
        }
        let first_ips = writer.finish().unwrap();
        assert_eq!(first_ips, vec![1, 2, 3]);
        for n in 0..3 {
            assert_eq!(read_shard(dir.path(), n).1.len(), 1);
        }
    }

    #[test]
    fn test_no_rows_no_shards() {
        let dir = tempdir().unwrap();
        let rows = Vec::<Result<CsvRow>>::new();
        let shards = build_shards(rows, &geonames(), 1000, RowPolicy::Abort, dir.path()).unwrap();
        assert!(shards.first_ips.is_empty());
        assert!(!dir.path().join(shard_file_name(0)).exists());
    }

    #[test]
    fn test_build_shards_row_policy() {
        let rows = || -> Vec<Result<CsvRow>> {
            vec![
                Ok(block_row(2, "1.0.0.0/24", "6252001", "", ["", "", ""])),
                Ok(block_row(3, "1.0.1.x/24", "", "", ["", "", ""])),
                Ok(block_row(4, "1.0.2.0/24", "", "", ["", "", ""])),
            ]
        };

        let dir = tempdir().unwrap();
        let result = build_shards(rows(), &geonames(), 1000, RowPolicy::Abort, dir.path());
        assert!(matches!(result, Err(Error::MalformedRow { line: 3, .. })));

        let dir = tempdir().unwrap();
        let shards = build_shards(rows(), &geonames(), 1000, RowPolicy::Skip, dir.path()).unwrap();
        assert_eq!(shards.block_count, 2);
        assert_eq!(shards.skipped, 1);
        assert_eq!(shards.first_ips, vec![16777216]);
    }
}
