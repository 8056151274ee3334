//! Configuration of an ingestion run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Backoff, DEFAULT_WORKER_COUNT, MAX_BATCH_SIZE};

/// Column of the detailed billing report identifying each line item.
pub const DEFAULT_PRIMARY_KEY: &str = "RecordId";

/// Settings of the ingestion pipeline. Missing fields take their default value when
/// deserializing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Scratch directory receiving the downloaded archives.
    pub download_dir: PathBuf,
    /// Scratch directory receiving the extracted CSV files.
    pub unzip_dir: PathBuf,
    /// Number of concurrent writers.
    pub worker_count: usize,
    /// Items per multi-write request, at most [MAX_BATCH_SIZE].
    pub batch_size: usize,
    /// CSV header naming the primary key of the record table.
    pub primary_key: String,
    /// Resubmission policy for unprocessed items.
    pub backoff: Backoff,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("/tmp/billing-reports-download/"),
            unzip_dir: PathBuf::from("/tmp/billing-reports-unzip/"),
            worker_count: DEFAULT_WORKER_COUNT,
            batch_size: MAX_BATCH_SIZE,
            primary_key: DEFAULT_PRIMARY_KEY.to_owned(),
            backoff: Backoff::default(),
        }
    }
}

impl IngestConfig {
    /// Use `root` for both scratch directories.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.download_dir = root.join("billing-reports-download");
        self.unzip_dir = root.join("billing-reports-unzip");
        self
    }
}

/// Static credentials and region of an AWS service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsConfig {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl std::fmt::Debug for AwsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}
