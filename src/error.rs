use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid partition code: {0}")]
    InvalidPartition(String),

    #[error("invalid traversal order: {0}")]
    InvalidOrder(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("partition enumeration failed: {0}")]
    Enumeration(String),

    #[error("source listed no partitions")]
    NoPartitions,

    #[error("session error: {0}")]
    Session(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("WebDriver request failed: {0}")]
    WebDriverHttp(String),

    #[error("WebDriver returned status {status}: {message}")]
    WebDriverStatus { status: u16, message: String },

    #[error("shard directory not readable: {0}")]
    ShardDirectory(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(PathBuf),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
