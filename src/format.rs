//! On-disk layout of a built index directory.
//!
//! Directory structure:
//! ```text
//! data/
//! +-- locations.dat   fixed-width location slots
//! +-- 0.json          shard 0: [[start, location, lat, lon, radius], ...]
//! +-- 1.json          shard 1
//! +-- ...
//! +-- i0.json         mid page 0: [first_ip, ...]
//! +-- i1.json         mid page 1
//! +-- ...
//! +-- index.json      root page: first entry of every mid page
//! +-- params.json     {"LOCATION_RECORD_SIZE": .., "NUMBER_NODES_PER_MIDINDEX": ..}
//! ```
//!
//! Location slot layout (`record_size` bytes each, no file header):
//! ```text
//! +-----------------+------------------+------+
//! | JSON payload    | 0x00 padding     | '\n' |
//! +-----------------+------------------+------+
//! ```
//! Slot `i` starts at byte `i * record_size`.

use crate::{Error, Result};

/// Location file name.
pub const LOCATIONS_FILE: &str = "locations.dat";

/// Root index file name.
pub const ROOT_INDEX_FILE: &str = "index.json";

/// Params file name.
pub const PARAMS_FILE: &str = "params.json";

/// Byte closing every location slot.
pub const SLOT_TERMINATOR: u8 = b'\n';

/// Byte filling a location slot between payload and terminator.
pub const SLOT_PADDING: u8 = 0x00;

/// Bytes a slot adds on top of the payload it frames.
pub const SLOT_OVERHEAD: usize = 1;

/// File name of shard `n`.
pub fn shard_file_name(n: usize) -> String {
    format!("{}.json", n)
}

/// File name of mid page `n`.
pub fn mid_index_file_name(n: usize) -> String {
    format!("i{}.json", n)
}

/// Append `payload` framed into a slot of exactly `slot_size` bytes.
pub fn frame_slot(payload: &[u8], slot_size: usize, out: &mut Vec<u8>) -> Result<()> {
    if payload.len() + SLOT_OVERHEAD > slot_size {
        return Err(Error::CorruptData {
            file: LOCATIONS_FILE.to_string(),
            reason: format!(
                "payload of {} bytes does not fit a {} byte slot",
                payload.len(),
                slot_size
            ),
        });
    }
    out.extend_from_slice(payload);
    out.resize(out.len() + slot_size - payload.len() - SLOT_OVERHEAD, SLOT_PADDING);
    out.push(SLOT_TERMINATOR);
    Ok(())
}

/// Extract the payload of one slot.
pub fn unframe_slot(slot: &[u8]) -> Result<&[u8]> {
    let body = match slot.split_last() {
        Some((&SLOT_TERMINATOR, body)) => body,
        _ => {
            return Err(Error::CorruptData {
                file: LOCATIONS_FILE.to_string(),
                reason: "slot is not terminated".to_string(),
            })
        }
    };
    let end = body
        .iter()
        .rposition(|&b| b != SLOT_PADDING)
        .map_or(0, |pos| pos + 1);
    Ok(&body[..end])
}
