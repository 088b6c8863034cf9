//! Two-level (root / mid page) index over shard first IPs.
//!
//! With `N` shards, `floor(sqrt(N))` mid pages of `ceil(N / floor(sqrt(N)))`
//! entries each are written, so a reader searches about `sqrt(N)` keys in the
//! root page and about `sqrt(N)` keys in one mid page before opening a shard.

use std::fs;
use std::path::Path;

use crate::format::{mid_index_file_name, ROOT_INDEX_FILE};
use crate::Result;

/// Integer square root, rounded down.
fn isqrt(n: usize) -> usize {
    let mut root = (n as f64).sqrt() as usize;
    while root * root > n {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= n {
        root += 1;
    }
    root
}

/// Number of entries per mid page for `shard_count` shards.
///
/// Zero shards yield a page size of zero.
pub fn page_size(shard_count: usize) -> usize {
    match isqrt(shard_count) {
        0 => 0,
        root_count => shard_count.div_ceil(root_count),
    }
}

/// In-memory form of the two-level index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TwoLevelIndex {
    /// First entry of every mid page
    pub root: Vec<u32>,
    /// Consecutive slices of the shard first IPs
    pub pages: Vec<Vec<u32>>,
    /// Entries per mid page (the last page may be shorter)
    pub page_size: usize,
}

impl TwoLevelIndex {
    /// Partition the ordered shard first IPs into root and mid pages.
    ///
    /// Every page is non-empty: with `r = floor(sqrt(N))` and
    /// `p = ceil(N / r)`, `(r - 1) * p < N <= r * p`.
    pub fn build(first_ips: &[u32]) -> Self {
        let page_size = page_size(first_ips.len());
        if page_size == 0 {
            return Self::default();
        }

        let pages: Vec<Vec<u32>> = first_ips.chunks(page_size).map(<[u32]>::to_vec).collect();
        let root = pages.iter().map(|page| page[0]).collect();

        Self {
            root,
            pages,
            page_size,
        }
    }

    /// Write one file per mid page and the root file into `out_dir`.
    pub fn write(&self, out_dir: &Path) -> Result<()> {
        for (n, page) in self.pages.iter().enumerate() {
            let name = mid_index_file_name(n);
            fs::write(out_dir.join(&name), serde_json::to_vec(page)?)?;
            log::debug!("Wrote mid page {} ({} entries)", name, page.len());
        }
        fs::write(out_dir.join(ROOT_INDEX_FILE), serde_json::to_vec(&self.root)?)?;

        log::info!(
            "Wrote index: {} root entries, {} entries per mid page",
            self.root.len(),
            self.page_size
        );
        Ok(())
    }
}

/// Build and write the index for `first_ips`, returning the page size.
pub fn build_index(first_ips: &[u32], out_dir: &Path) -> Result<usize> {
    let index = TwoLevelIndex::build(first_ips);
    index.write(out_dir)?;
    Ok(index.page_size)
}
