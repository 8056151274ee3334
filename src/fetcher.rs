//! Download a report from the blob store to local scratch space.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{BlobReader, IngestError, IngestResult, ReportName};

/// Streams one object of the blob store to a local file, chunk by chunk.
pub struct Fetcher {
    blob: Arc<dyn BlobReader>,
    bucket: String,
    report_name: ReportName,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn new(blob: Arc<dyn BlobReader>, bucket: impl Into<String>, report_name: ReportName) -> Self {
        Self {
            blob,
            bucket: bucket.into(),
            report_name,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Download the report into `dest_dir`, named after the report, overwriting any previous
    /// download. A partial file is left behind on error.
    pub async fn download(&self, dest_dir: &Path) -> IngestResult<PathBuf> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(self.report_name.as_str());

        let mut stream = self
            .blob
            .get_object(&self.bucket, self.report_name.as_str())
            .await
            .map_err(IngestError::Transport)?;
        let mut file = tokio::fs::File::create(&path).await?;
        let mut written = 0u64;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(IngestError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.map_err(IngestError::Transport)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(path = %path.display(), bytes = written, "downloaded report");
        Ok(path)
    }
}
