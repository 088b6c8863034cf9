//! Error types for geoshard.

use std::path::PathBuf;

use thiserror::Error;

/// Error type for geoshard operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An input table is missing or unreadable
    #[error("cannot read input table {path:?}: {source}")]
    InputUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV parsing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A row of an input table could not be converted into a record
    #[error("malformed {table} row at line {line}: {reason}")]
    MalformedRow {
        table: &'static str,
        line: u64,
        reason: String,
    },

    /// Invalid CIDR notation
    #[error("invalid CIDR pattern: {0}")]
    InvalidCidr(String),

    /// Invalid IP address
    #[error("invalid IP address: {0}")]
    InvalidIpAddress(String),

    /// Download credential not supplied
    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    /// Download error
    #[error("download error: {0}")]
    Download(String),

    /// Dataset archive error
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// A produced file does not decode
    #[error("corrupt data in {file}: {reason}")]
    CorruptData { file: String, reason: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for geoshard operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error was caused by a single bad input row.
    ///
    /// Only these errors are eligible for [`RowPolicy::Skip`](crate::RowPolicy::Skip).
    pub fn is_row_error(&self) -> bool {
        matches!(self, Error::MalformedRow { .. })
    }
}
