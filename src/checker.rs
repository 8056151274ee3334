//! Decide whether a report needs to be ingested, by comparing fingerprints.

use std::sync::Arc;

use tracing::debug;

use crate::{
    BlobReader, Fingerprint, IngestError, IngestResult, KvStore, ReportEntry, ReportName,
    BILLING_REPORT_TABLE,
};

/// Compares the fingerprint of a report in the blob store with the one recorded at its last
/// ingestion.
pub struct FingerprintChecker {
    blob: Arc<dyn BlobReader>,
    kv: Arc<dyn KvStore>,
    bucket: String,
    report_name: ReportName,
}

/// The fingerprints observed by [FingerprintChecker::check].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Fingerprint of the last ingestion, empty if the report was never ingested.
    pub stored: Fingerprint,
    /// Fingerprint of the object currently in the blob store.
    pub current: Fingerprint,
}

impl CheckOutcome {
    pub fn needs_ingest(&self) -> bool {
        self.current != self.stored
    }

    /// Whether the current version was already ingested, along with the fingerprint to commit
    /// once it is.
    pub fn already_present(&self) -> (bool, &Fingerprint) {
        (!self.needs_ingest(), &self.current)
    }
}

impl FingerprintChecker {
    pub fn new(
        blob: Arc<dyn BlobReader>,
        kv: Arc<dyn KvStore>,
        bucket: impl Into<String>,
        report_name: ReportName,
    ) -> Self {
        Self {
            blob,
            kv,
            bucket: bucket.into(),
            report_name,
        }
    }

    pub async fn check(&self) -> IngestResult<CheckOutcome> {
        let stored = self.stored_fingerprint().await?;
        let current = self.current_fingerprint().await?;
        debug!(report = %self.report_name, %stored, %current, "compared fingerprints");
        Ok(CheckOutcome { stored, current })
    }

    async fn stored_fingerprint(&self) -> IngestResult<Fingerprint> {
        let item = self
            .kv
            .get_item(BILLING_REPORT_TABLE, &ReportEntry::key_for(&self.report_name))
            .await
            .map_err(IngestError::Transport)?;
        match item {
            None => Ok(Fingerprint::default()),
            Some(item) => Ok(ReportEntry::from_item(&item)?.fingerprint),
        }
    }

    async fn current_fingerprint(&self) -> IngestResult<Fingerprint> {
        let prefix = self.report_name.as_str();
        let objects = self
            .blob
            .list_objects(&self.bucket, prefix)
            .await
            .map_err(IngestError::Transport)?;
        let object = match objects.as_slice() {
            [object] => object,
            [] => {
                return Err(IngestError::MissingReport {
                    prefix: prefix.to_owned(),
                })
            }
            _ => {
                return Err(IngestError::AmbiguousReport {
                    prefix: prefix.to_owned(),
                    count: objects.len(),
                })
            }
        };
        let etag = object
            .etag
            .as_deref()
            .ok_or_else(|| IngestError::MissingReport {
                prefix: prefix.to_owned(),
            })?;
        Ok(Fingerprint::from_etag(etag))
    }
}
