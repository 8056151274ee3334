//! Write line items and report entries to the key-value store.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    Backoff, Batch, Fingerprint, IngestError, IngestResult, KvStore, ReportEntry, ReportName,
    BILLING_RECORD_TABLE, BILLING_REPORT_TABLE, MAX_BATCH_SIZE,
};

/// Batched writer into the record table, shared by the loader's workers.
///
/// Items the store leaves unprocessed are resubmitted following [Backoff], until none are left
/// or the attempts are exhausted.
#[derive(Clone)]
pub struct BatchInjector {
    kv: Arc<dyn KvStore>,
    batch_size: usize,
    backoff: Backoff,
}

impl BatchInjector {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            batch_size: MAX_BATCH_SIZE,
            backoff: Backoff::default(),
        }
    }

    /// Use smaller requests than the store allows. Clamped to `1..=MAX_BATCH_SIZE`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Write `items` to the record table, in requests of at most [Self::batch_size] items.
    ///
    /// On [IngestError::WriteTimeout], the residual holds every item not written, including
    /// those of requests never sent.
    pub async fn write_batch(&self, mut items: Batch, cancel: &CancellationToken) -> IngestResult<()> {
        while !items.is_empty() {
            let rest = items.split_off(self.batch_size.min(items.len()));
            match self.write_request(items, cancel).await {
                Ok(()) => {}
                Err(IngestError::WriteTimeout {
                    attempts,
                    mut residual,
                }) => {
                    residual.extend(rest);
                    return Err(IngestError::WriteTimeout { attempts, residual });
                }
                Err(error) => return Err(error),
            }
            items = rest;
        }
        Ok(())
    }

    async fn write_request(&self, mut pending: Batch, cancel: &CancellationToken) -> IngestResult<()> {
        let max_attempts = self.backoff.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let submitted = pending.len();
            let output = self
                .kv
                .batch_write_item(BILLING_RECORD_TABLE, pending)
                .await
                .map_err(IngestError::Transport)?;
            if output.unprocessed.is_empty() {
                debug!(items = submitted, attempt, "batch written");
                return Ok(());
            }
            pending = output.unprocessed;
            if attempt >= max_attempts {
                return Err(IngestError::WriteTimeout {
                    attempts: attempt,
                    residual: pending,
                });
            }
            warn!(
                unprocessed = pending.len(),
                attempt,
                delay_ms = self.backoff.delay_for_retry(attempt).as_millis() as u64,
                "store left items unprocessed, resubmitting"
            );
            self.backoff.wait(attempt, cancel).await?;
        }
    }

    /// Record `fingerprint` as the last ingested version of `name`, overwriting any previous one.
    pub async fn create_report(&self, name: &ReportName, fingerprint: &Fingerprint) -> IngestResult<()> {
        let entry = ReportEntry {
            name: name.clone(),
            fingerprint: fingerprint.clone(),
        };
        self.kv
            .put_item(BILLING_REPORT_TABLE, entry.to_item())
            .await
            .map_err(IngestError::Transport)
    }
}
