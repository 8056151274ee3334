//! Load a billing report CSV into the record table through a bounded pool of workers.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{Batch, BatchInjector, IngestError, IngestResult, RecordParser, ReportName};

/// Number of workers writing batches concurrently, unless configured otherwise.
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Couples a [RecordParser] with a [BatchInjector].
///
/// Parsing runs on a blocking thread which hands batches over to the workers through a channel
/// holding at most one batch per worker, so the parser waits whenever every worker is busy.
pub struct Loader {
    injector: Arc<BatchInjector>,
    workers: usize,
    primary_key: String,
    cancel: CancellationToken,
}

/// What a [Loader] wrote.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub batches: usize,
    pub items: usize,
}

impl std::ops::AddAssign for LoadSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.batches += rhs.batches;
        self.items += rhs.items;
    }
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<Batch>>>;

impl Loader {
    pub fn new(injector: BatchInjector, workers: usize, primary_key: impl Into<String>) -> Self {
        Self {
            injector: Arc::new(injector),
            workers: workers.max(1),
            primary_key: primary_key.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Parse the CSV at `csv_path` and write its rows to the record table.
    ///
    /// The first error stops every worker and is returned. Whatever was already written stays
    /// in the table.
    pub async fn process_file(
        &self,
        report_name: &ReportName,
        csv_path: &Path,
    ) -> IngestResult<LoadSummary> {
        info!(report = %report_name, workers = self.workers, "loading line items");
        let cancel = self.cancel.child_token();
        let (tx, rx) = mpsc::channel::<Batch>(self.workers);
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for worker in 0..self.workers {
            workers.spawn(run_worker(
                worker,
                self.injector.clone(),
                rx.clone(),
                cancel.clone(),
            ));
        }
        drop(rx);

        let producer = {
            let path = csv_path.to_owned();
            let primary_key = self.primary_key.clone();
            let batch_size = self.injector.batch_size();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                produce_batches(&path, &primary_key, batch_size, tx, &cancel)
            })
        };

        let mut summary = LoadSummary::default();
        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(written)) => summary += written,
                Ok(Err(error)) => keep_first_error(&mut first_error, error, &cancel),
                Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
                Err(_) => keep_first_error(&mut first_error, IngestError::Cancelled, &cancel),
            }
        }
        match producer.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => keep_first_error(&mut first_error, error, &cancel),
            Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
            Err(_) => keep_first_error(&mut first_error, IngestError::Cancelled, &cancel),
        }

        match first_error {
            Some(error) => Err(error),
            None => {
                info!(report = %report_name, batches = summary.batches, items = summary.items, "line items loaded");
                Ok(summary)
            }
        }
    }
}

/// Record `error` and stop the other tasks. Errors caused by that stop do not replace the
/// original one.
fn keep_first_error(
    first_error: &mut Option<IngestError>,
    error: IngestError,
    cancel: &CancellationToken,
) {
    cancel.cancel();
    match first_error {
        Some(IngestError::Cancelled) if !matches!(error, IngestError::Cancelled) => {
            *first_error = Some(error)
        }
        Some(_) => {}
        None => *first_error = Some(error),
    }
}

async fn run_worker(
    worker: usize,
    injector: Arc<BatchInjector>,
    rx: SharedReceiver,
    cancel: CancellationToken,
) -> IngestResult<LoadSummary> {
    let mut written = LoadSummary::default();
    loop {
        let batch = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                batch = rx.recv() => batch,
            }
        };
        let Some(batch) = batch else {
            return Ok(written);
        };
        let items = batch.len();
        injector.write_batch(batch, &cancel).await?;
        written += LoadSummary { batches: 1, items };
        debug!(worker, items, "worker wrote batch");
    }
}

/// Parse the file into batches and send them to the workers, until the file or the workers
/// are exhausted. A parse error cancels the workers.
fn produce_batches(
    path: &Path,
    primary_key: &str,
    batch_size: usize,
    tx: mpsc::Sender<Batch>,
    cancel: &CancellationToken,
) -> IngestResult<()> {
    let result = send_batches(path, primary_key, batch_size, &tx, cancel);
    if result.is_err() {
        cancel.cancel();
    }
    result
}

fn send_batches(
    path: &Path,
    primary_key: &str,
    batch_size: usize,
    tx: &mpsc::Sender<Batch>,
    cancel: &CancellationToken,
) -> IngestResult<()> {
    let parser = RecordParser::from_path(path, primary_key)?;
    let mut batch = Vec::with_capacity(batch_size);
    for item in parser {
        batch.push(item?);
        if batch.len() == batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            // Workers only go away once cancelled or failed.
            if cancel.is_cancelled() || tx.blocking_send(full).is_err() {
                return Ok(());
            }
        }
    }
    if !batch.is_empty() && !cancel.is_cancelled() {
        let _ = tx.blocking_send(batch);
    }
    Ok(())
}
