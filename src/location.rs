//! Location table: geoname id mapping and the fixed-width location file.

use ahash::AHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::format::{frame_slot, LOCATIONS_FILE, SLOT_OVERHEAD};
use crate::ingest::CsvRow;
use crate::{Error, Result, RowPolicy};

/// Column indices consumed from the locations table.
pub mod columns {
    pub const GEONAME_ID: usize = 0;
    pub const COUNTRY_ISO_CODE: usize = 4;
    pub const SUBDIVISION_ISO_CODE: usize = 6;
    pub const CITY_NAME: usize = 10;
    pub const METRO_CODE: usize = 11;
    pub const TIME_ZONE: usize = 12;
    pub const IS_IN_EU: usize = 13;
}

const TABLE: &str = "locations";

/// Mapping from vendor geoname id to dense location index.
pub type GeonameIndex = AHashMap<String, u32>;

/// Attributes of one location as stored in the location file.
///
/// Encoded as the JSON array
/// `[country, subdivision, city, metro_code, time_zone, "0" | "1"]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocationRecord {
    pub country: String,
    pub subdivision: String,
    pub city: String,
    pub metro_code: u32,
    pub time_zone: String,
    pub in_eu: bool,
}

impl Serialize for LocationRecord {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (
            &self.country,
            &self.subdivision,
            &self.city,
            self.metro_code,
            &self.time_zone,
            if self.in_eu { "1" } else { "0" },
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LocationRecord {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (country, subdivision, city, metro_code, time_zone, eu): (
            String,
            String,
            String,
            u32,
            String,
            String,
        ) = Deserialize::deserialize(deserializer)?;
        Ok(Self {
            country,
            subdivision,
            city,
            metro_code,
            time_zone,
            in_eu: eu == "1",
        })
    }
}

/// A typed row of the locations table.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRow {
    pub geoname_id: String,
    pub record: LocationRecord,
}

impl LocationRow {
    /// Convert a raw CSV row.
    pub fn from_csv(row: &CsvRow) -> Result<Self> {
        let field = move |column: usize| {
            row.get(column).ok_or_else(|| Error::MalformedRow {
                table: TABLE,
                line: row.line,
                reason: format!("missing column {}", column),
            })
        };

        let metro = field(columns::METRO_CODE)?;
        let metro_code = if metro.is_empty() {
            0
        } else {
            metro.parse().map_err(|_| Error::MalformedRow {
                table: TABLE,
                line: row.line,
                reason: format!("invalid metro code: {:?}", metro),
            })?
        };

        let in_eu = match field(columns::IS_IN_EU)? {
            "1" => true,
            "0" | "" => false,
            other => {
                return Err(Error::MalformedRow {
                    table: TABLE,
                    line: row.line,
                    reason: format!("invalid EU flag: {:?}", other),
                })
            }
        };

        Ok(Self {
            geoname_id: field(columns::GEONAME_ID)?.to_string(),
            record: LocationRecord {
                country: field(columns::COUNTRY_ISO_CODE)?.to_string(),
                subdivision: field(columns::SUBDIVISION_ISO_CODE)?.to_string(),
                city: field(columns::CITY_NAME)?.to_string(),
                metro_code,
                time_zone: field(columns::TIME_ZONE)?.to_string(),
                in_eu,
            },
        })
    }
}

/// Result of building the location file.
#[derive(Debug, Default)]
pub struct LocationTable {
    geonames: GeonameIndex,
    record_size: usize,
    count: usize,
    skipped: usize,
}

impl LocationTable {
    /// Read-only geoname id mapping.
    pub fn geonames(&self) -> &GeonameIndex {
        &self.geonames
    }

    /// Index assigned to a geoname id.
    pub fn index_of(&self, geoname_id: &str) -> Option<u32> {
        self.geonames.get(geoname_id).copied()
    }

    /// Byte length of every location slot.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Number of stored location records.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no record was stored.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Rows dropped under [`RowPolicy::Skip`].
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Build the location file in `out_dir` from the rows of the locations table.
///
/// Rows are indexed in the order they are read. Every record is framed to the
/// width of the longest serialized record plus the slot terminator, so record
/// `i` starts at `i * record_size`.
pub fn build_locations<I>(rows: I, policy: RowPolicy, out_dir: &Path) -> Result<LocationTable>
where
    I: IntoIterator<Item = Result<CsvRow>>,
{
    let mut table = LocationTable::default();
    let mut payloads: Vec<Vec<u8>> = Vec::new();
    let mut max_len = 0;

    for row in rows {
        let row = row?;
        let parsed = match LocationRow::from_csv(&row) {
            Ok(parsed) => parsed,
            Err(e) => {
                policy.recover(e)?;
                table.skipped += 1;
                continue;
            }
        };

        let index = payloads.len() as u32;
        table.geonames.insert(parsed.geoname_id, index);

        let payload = serde_json::to_vec(&parsed.record)?;
        max_len = max_len.max(payload.len());
        payloads.push(payload);
    }

    table.count = payloads.len();
    table.record_size = max_len + SLOT_OVERHEAD;

    let path = out_dir.join(LOCATIONS_FILE);
    let mut writer = BufWriter::new(File::create(&path)?);
    let mut slot = Vec::with_capacity(table.record_size);
    for payload in &payloads {
        slot.clear();
        frame_slot(payload, table.record_size, &mut slot)?;
        writer.write_all(&slot)?;
    }
    writer.flush()?;

    log::info!(
        "Wrote {} location records of {} bytes to {:?}",
        table.count,
        table.record_size,
        path
    );
    Ok(table)
}
