//! Vendor dataset download.
//!
//! Fetches the GeoLite2 City CSV archive, extracts the two tables the build
//! consumes, and replaces the raw directory with them in one publish step.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::metadata::DownloadMetadata;
use crate::publish::{publish, scratch_dir_for};
use crate::{BuildConfig, Error, Result};

/// Environment variable holding the vendor license key.
pub const LICENSE_KEY_ENV: &str = "MAXMIND_LICENSE_KEY";

/// Vendor download endpoint.
pub const DEFAULT_DOWNLOAD_URL: &str = "https://download.maxmind.com/app/geoip_download";

/// Dataset edition containing the City CSV tables.
pub const DEFAULT_EDITION: &str = "GeoLite2-City-CSV";

/// Default update interval (1 day).
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Metadata file written into the raw directory.
pub const METADATA_FILE: &str = ".download.meta";

/// Downloads the vendor archive into the raw directory.
pub struct DatasetDownloader {
    raw_dir: PathBuf,
    url: String,
    edition: String,
    tables: [String; 2],
    update_interval: Duration,
}

impl DatasetDownloader {
    /// Create a downloader filling the raw directory of `config`.
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            raw_dir: config.raw_dir.clone(),
            url: DEFAULT_DOWNLOAD_URL.to_string(),
            edition: DEFAULT_EDITION.to_string(),
            tables: [config.locations_file.clone(), config.blocks_file.clone()],
            update_interval: DEFAULT_UPDATE_INTERVAL,
        }
    }

    /// Use a different download endpoint.
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    /// Set a custom update interval.
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Read the license key from [`LICENSE_KEY_ENV`].
    pub fn license_key_from_env() -> Result<String> {
        Self::license_key_from(LICENSE_KEY_ENV)
    }

    /// Read the license key from the named environment variable.
    pub fn license_key_from(var: &str) -> Result<String> {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(Error::MissingCredential(var.to_string())),
        }
    }

    fn metadata_path(&self) -> PathBuf {
        self.raw_dir.join(METADATA_FILE)
    }

    /// Time of the last successful download.
    pub fn last_updated(&self) -> Option<SystemTime> {
        DownloadMetadata::load(self.metadata_path())
            .ok()
            .and_then(|m| m.last_updated)
    }

    /// Whether the raw tables are missing or older than the update interval.
    pub fn needs_update(&self) -> bool {
        let tables_present = self.tables.iter().all(|t| self.raw_dir.join(t).exists());
        let meta = DownloadMetadata::load(self.metadata_path()).unwrap_or_default();
        !tables_present || meta.needs_update(self.update_interval)
    }

    /// Download unless the raw tables are still fresh.
    ///
    /// The credential is checked before any network access. Returns `true` if
    /// a download happened.
    pub fn ensure_fresh(&self, force: bool) -> Result<bool> {
        if !force && !self.needs_update() {
            log::info!("Raw dataset in {:?} is up to date", self.raw_dir);
            return Ok(false);
        }
        let license_key = Self::license_key_from_env()?;
        self.download(&license_key)?;
        Ok(true)
    }

    /// Fetch the archive and install its tables into the raw directory.
    pub fn download(&self, license_key: &str) -> Result<()> {
        if license_key.is_empty() {
            return Err(Error::MissingCredential(LICENSE_KEY_ENV.to_string()));
        }

        log::info!("Downloading {} edition", self.edition);
        // Errors are reported without the request URL, which carries the key
        let response = ureq::get(&self.url)
            .query("edition_id", &self.edition)
            .query("suffix", "zip")
            .query("license_key", license_key)
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => Error::Download(format!("HTTP error: {}", code)),
                ureq::Error::Transport(t) => {
                    Error::Download(format!("transport error: {}", t.kind()))
                }
            })?;

        let mut archive = tempfile::tempfile()?;
        let size = io::copy(&mut response.into_reader(), &mut archive)?;
        archive.seek(SeekFrom::Start(0))?;
        log::info!("Downloaded archive: {} bytes", size);

        self.install_archive(archive)
    }

    /// Extract the two tables from a zip archive and publish them as the new
    /// raw directory.
    pub fn install_archive<R: Read + Seek>(&self, archive: R) -> Result<()> {
        let scratch = scratch_dir_for(&self.raw_dir)?;
        self.extract_tables(archive, scratch.path())?;
        DownloadMetadata::now(&self.edition).save(scratch.path().join(METADATA_FILE))?;
        publish(scratch, &self.raw_dir)
    }

    /// Copy the two tables out of the archive into `dest`.
    ///
    /// Tables are matched by file name; the dated folder the vendor wraps
    /// them in is ignored.
    pub fn extract_tables<R: Read + Seek>(&self, archive: R, dest: &Path) -> Result<()> {
        let mut archive = zip::ZipArchive::new(archive)?;
        let mut found = [false; 2];

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let file_name = entry.name().rsplit('/').next().unwrap_or_default().to_string();
            let Some(slot) = self.tables.iter().position(|t| *t == file_name) else {
                continue;
            };

            let mut out = File::create(dest.join(&file_name))?;
            let size = io::copy(&mut entry, &mut out)?;
            out.sync_all()?;
            found[slot] = true;
            log::info!("Extracted {} ({} bytes)", file_name, size);
        }

        for (table, found) in self.tables.iter().zip(found) {
            if !found {
                return Err(Error::Download(format!("archive does not contain {}", table)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{Cursor, Write};
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn archive(files: &[(&str, &str)]) -> Cursor<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    fn downloader(raw_dir: &Path) -> DatasetDownloader {
        DatasetDownloader::new(&BuildConfig::new(raw_dir, raw_dir.join("unused")))
    }

    #[test]
    fn test_missing_credential() {
        let result = DatasetDownloader::license_key_from("GEOSHARD_TEST_UNSET_LICENSE_KEY");
        assert!(matches!(result, Err(Error::MissingCredential(_))));
    }

    #[test]
    fn test_empty_key_rejected_before_network() {
        let root = tempdir().unwrap();
        let result = downloader(&root.path().join("raw"))
            .with_url("http://127.0.0.1:9/unreachable")
            .download("");
        assert!(matches!(result, Err(Error::MissingCredential(_))));
    }

    #[test]
    fn test_install_archive_replaces_raw_dir() {
        let root = tempdir().unwrap();
        let raw = root.path().join("raw");
        fs::create_dir(&raw).unwrap();
        fs::write(raw.join("leftover.csv"), "old").unwrap();

        let zip = archive(&[
            ("GeoLite2-City-CSV_20240102/GeoLite2-City-Locations-en.csv", "geoname_id\n1\n"),
            ("GeoLite2-City-CSV_20240102/GeoLite2-City-Blocks-IPv4.csv", "network\n1.0.0.0/24\n"),
            ("GeoLite2-City-CSV_20240102/GeoLite2-City-Blocks-IPv6.csv", "network\n::/0\n"),
            ("GeoLite2-City-CSV_20240102/LICENSE.txt", "license"),
        ]);

        let downloader = downloader(&raw);
        assert!(downloader.needs_update());
        downloader.install_archive(zip).unwrap();

        assert_eq!(
            fs::read_to_string(raw.join("GeoLite2-City-Locations-en.csv")).unwrap(),
            "geoname_id\n1\n"
        );
        assert!(raw.join("GeoLite2-City-Blocks-IPv4.csv").exists());
        assert!(!raw.join("GeoLite2-City-Blocks-IPv6.csv").exists());
        assert!(!raw.join("leftover.csv").exists());
        assert!(downloader.last_updated().is_some());
        assert!(!downloader.needs_update());
    }

    #[test]
    fn test_update_interval_expires_download() {
        let root = tempdir().unwrap();
        let raw = root.path().join("raw");
        let zip = archive(&[
            ("GeoLite2-City-Locations-en.csv", "geoname_id\n"),
            ("GeoLite2-City-Blocks-IPv4.csv", "network\n"),
        ]);

        downloader(&raw).install_archive(zip).unwrap();
        assert!(!downloader(&raw).needs_update());
        assert!(downloader(&raw)
            .with_update_interval(Duration::ZERO)
            .needs_update());
        // Already fresh, so no credential or network access is needed
        assert!(!downloader(&raw).ensure_fresh(false).unwrap());
    }

    #[test]
    fn test_archive_missing_table() {
        let root = tempdir().unwrap();
        let raw = root.path().join("raw");
        let zip = archive(&[("dir/GeoLite2-City-Locations-en.csv", "geoname_id\n")]);

        let result = downloader(&raw).install_archive(zip);
        assert!(matches!(result, Err(Error::Download(_))));
        assert!(!raw.exists());
    }
}
