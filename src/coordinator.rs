//! Import a monthly billing report, skipping it when already ingested.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    unzip, BatchInjector, BillingDate, BlobReader, Fetcher, Fingerprint, FingerprintChecker,
    IngestConfig, IngestResult, KvStore, LoadSummary, Loader, ReportDescriptor, ReportName,
};

/// The stages of an import, in order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Checking,
    Fetching,
    Unzipping,
    Loading,
    Committing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Checking => "checking",
            Stage::Fetching => "fetching",
            Stage::Unzipping => "unzipping",
            Stage::Loading => "loading",
            Stage::Committing => "committing",
        };
        f.write_str(name)
    }
}

/// How a successful import ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The report had already been ingested with this fingerprint: nothing was written.
    UpToDate {
        report_name: ReportName,
        fingerprint: Fingerprint,
    },
    /// The report was loaded and its fingerprint committed.
    Imported {
        report_name: ReportName,
        fingerprint: Fingerprint,
        summary: LoadSummary,
    },
}

/// Sequences check, fetch, unzip, load and commit for one report.
///
/// The fingerprint is committed only once every line item was written, so a failed import is
/// retried in full by the next one.
pub struct IngestCoordinator {
    blob: Arc<dyn BlobReader>,
    kv: Arc<dyn KvStore>,
    config: IngestConfig,
    cancel: CancellationToken,
}

impl IngestCoordinator {
    pub fn new(blob: Arc<dyn BlobReader>, kv: Arc<dyn KvStore>, config: IngestConfig) -> Self {
        Self {
            blob,
            kv,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the import when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Import the report of `date` from `bucket`. The first error of any stage is returned as
    /// is, after being logged along with its stage.
    pub async fn import(&self, date: BillingDate, bucket: &str) -> IngestResult<ImportOutcome> {
        let descriptor = ReportDescriptor::new(self.blob.account_id(), date, bucket);
        let mut stage = Stage::Checking;
        let result = self.run(&descriptor, &mut stage).await;
        if let Err(err) = &result {
            error!(report = %descriptor.report_name, %stage, error = %err, "import failed");
        }
        result
    }

    async fn run(
        &self,
        descriptor: &ReportDescriptor,
        stage: &mut Stage,
    ) -> IngestResult<ImportOutcome> {
        let report_name = &descriptor.report_name;

        *stage = Stage::Checking;
        let check = FingerprintChecker::new(
            self.blob.clone(),
            self.kv.clone(),
            &descriptor.bucket,
            report_name.clone(),
        )
        .check()
        .await?;
        let (present, fingerprint) = check.already_present();
        if present {
            info!(report = %report_name, %fingerprint, "report doesn't need import");
            return Ok(ImportOutcome::UpToDate {
                report_name: report_name.clone(),
                fingerprint: fingerprint.clone(),
            });
        }
        info!(report = %report_name, stored = %check.stored, %fingerprint, "report needs import");

        *stage = Stage::Fetching;
        let archive = Fetcher::new(self.blob.clone(), &descriptor.bucket, report_name.clone())
            .with_cancellation(self.cancel.clone())
            .download(&self.config.download_dir)
            .await?;
        info!(path = %archive.display(), "report downloaded");

        *stage = Stage::Unzipping;
        let csv_path = unzip(&archive, &self.config.unzip_dir).await?;
        info!(path = %csv_path.display(), "report unzipped");

        *stage = Stage::Loading;
        let injector = BatchInjector::new(self.kv.clone())
            .with_batch_size(self.config.batch_size)
            .with_backoff(self.config.backoff);
        let summary = Loader::new(
            injector.clone(),
            self.config.worker_count,
            &self.config.primary_key,
        )
        .with_cancellation(self.cancel.clone())
        .process_file(report_name, &csv_path)
        .await?;

        *stage = Stage::Committing;
        injector.create_report(report_name, fingerprint).await?;
        info!(report = %report_name, %fingerprint, items = summary.items, "report entry created");

        Ok(ImportOutcome::Imported {
            report_name: report_name.clone(),
            fingerprint: fingerprint.clone(),
            summary,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{dump_items, report_csv, zip_bytes, Scripted, ScriptedKvStore};
    use crate::{
        IngestError, MemoryBlobStore, MemoryKvStore, ReportEntry, BILLING_RECORD_TABLE,
        BILLING_REPORT_TABLE,
    };
    use expect_test::expect;
    use tempfile::TempDir;

    const REPORT: &str = "111-aws-billing-detailed-line-items-with-resources-and-tags-2024-03.csv.zip";
    const CSV: &str = "111-aws-billing-detailed-line-items-with-resources-and-tags-2024-03.csv";

    fn march() -> BillingDate {
        "2024-03".parse().unwrap()
    }

    fn coordinator(
        blob: &Arc<MemoryBlobStore>,
        kv: Arc<dyn KvStore>,
        scratch: &TempDir,
    ) -> IngestCoordinator {
        let config = IngestConfig::default().with_scratch_root(scratch.path());
        IngestCoordinator::new(blob.clone(), kv, config)
    }

    async fn publish(blob: &MemoryBlobStore, fingerprint: &str, csv: &str) {
        blob.put_object("b", REPORT, fingerprint, zip_bytes(&[(CSV, csv)]))
            .await;
    }

    async fn commit(kv: &dyn KvStore, fingerprint: &str) {
        let entry = ReportEntry {
            name: ReportName(REPORT.into()),
            fingerprint: Fingerprint(fingerprint.into()),
        };
        kv.put_item(BILLING_REPORT_TABLE, entry.to_item())
            .await
            .unwrap();
    }

    async fn committed(kv: &MemoryKvStore) -> Option<String> {
        kv.items(BILLING_REPORT_TABLE)
            .await
            .first()
            .map(|row| ReportEntry::from_item(row).unwrap().fingerprint.0)
    }

    #[tokio::test]
    async fn skip_up_to_date_report() {
        let scratch = tempfile::tempdir().unwrap();
        let blob = Arc::new(MemoryBlobStore::new("111"));
        publish(&blob, "abc", inline_csv!("RecordId,Cost", "r1,1.0")).await;
        let kv = Arc::new(MemoryKvStore::new());
        commit(kv.as_ref(), "abc").await;

        let outcome = coordinator(&blob, kv.clone(), &scratch)
            .import(march(), "b")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ImportOutcome::UpToDate {
                report_name: ReportName(REPORT.into()),
                fingerprint: Fingerprint("abc".into()),
            }
        );
        assert!(kv.batch_writes().await.is_empty());
        assert_eq!(kv.puts().await.len(), 1);
        assert!(blob.gets().await.is_empty());
    }

    #[tokio::test]
    async fn first_ingest() {
        let scratch = tempfile::tempdir().unwrap();
        let blob = Arc::new(MemoryBlobStore::new("111"));
        publish(
            &blob,
            "xyz",
            inline_csv!("RecordId,Cost", "r1,1.0", "r2,2.0", "r3,3.0"),
        )
        .await;
        let kv = Arc::new(MemoryKvStore::new());

        let outcome = coordinator(&blob, kv.clone(), &scratch)
            .import(march(), "b")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ImportOutcome::Imported {
                report_name: ReportName(REPORT.into()),
                fingerprint: Fingerprint("xyz".into()),
                summary: LoadSummary { batches: 1, items: 3 },
            }
        );
        expect![[r#"
            RecordId=r1: {"Cost": "1.0", "RecordId": "r1"}
            RecordId=r2: {"Cost": "2.0", "RecordId": "r2"}
            RecordId=r3: {"Cost": "3.0", "RecordId": "r3"}
        "#]]
        .assert_eq(&dump_items(&kv.items(BILLING_RECORD_TABLE).await));
        expect![[r#"
            name=111-aws-billing-detailed-line-items-with-resources-and-tags-2024-03.csv.zip: {"md5": "xyz", "name": "111-aws-billing-detailed-line-items-with-resources-and-tags-2024-03.csv.zip"}
        "#]]
        .assert_eq(&dump_items(&kv.items(BILLING_REPORT_TABLE).await));
        assert!(scratch
            .path()
            .join("billing-reports-download")
            .join(REPORT)
            .exists());
    }

    #[tokio::test]
    async fn second_import_is_a_no_op() {
        let scratch = tempfile::tempdir().unwrap();
        let blob = Arc::new(MemoryBlobStore::new("111"));
        publish(&blob, "xyz", &report_csv(0..30)).await;
        let kv = Arc::new(MemoryKvStore::new());
        let coordinator = coordinator(&blob, kv.clone(), &scratch);

        coordinator.import(march(), "b").await.unwrap();
        let second = coordinator.import(march(), "b").await.unwrap();

        assert!(matches!(second, ImportOutcome::UpToDate { .. }));
        assert_eq!(kv.puts().await, [BILLING_REPORT_TABLE]);
        assert_eq!(kv.batch_writes().await.len(), 2);
        assert_eq!(blob.gets().await.len(), 1);
    }

    #[tokio::test]
    async fn refresh_changed_report() {
        let scratch = tempfile::tempdir().unwrap();
        let blob = Arc::new(MemoryBlobStore::new("111"));
        let kv = Arc::new(MemoryKvStore::new());
        publish(
            &blob,
            "xyz",
            inline_csv!("RecordId,Cost", "r1,1.0", "r2,2.0", "r3,3.0"),
        )
        .await;
        let coordinator = coordinator(&blob, kv.clone(), &scratch);
        coordinator.import(march(), "b").await.unwrap();

        publish(
            &blob,
            "pqr",
            inline_csv!("RecordId,Cost", "r1,1.5", "r2,2.0", "r3,3.0", "r4,4.0"),
        )
        .await;
        let outcome = coordinator.import(march(), "b").await.unwrap();

        assert!(matches!(outcome, ImportOutcome::Imported { ref fingerprint, .. } if fingerprint.as_str() == "pqr"));
        assert_eq!(committed(&kv).await.as_deref(), Some("pqr"));
        expect![[r#"
            RecordId=r1: {"Cost": "1.5", "RecordId": "r1"}
            RecordId=r2: {"Cost": "2.0", "RecordId": "r2"}
            RecordId=r3: {"Cost": "3.0", "RecordId": "r3"}
            RecordId=r4: {"Cost": "4.0", "RecordId": "r4"}
        "#]]
        .assert_eq(&dump_items(&kv.items(BILLING_RECORD_TABLE).await));
    }

    #[tokio::test]
    async fn failed_load_is_not_committed_and_retried() {
        let scratch = tempfile::tempdir().unwrap();
        let blob = Arc::new(MemoryBlobStore::new("111"));
        publish(&blob, "pqr", &report_csv(0..50)).await;
        let kv = Arc::new(ScriptedKvStore::new([Scripted::Write, Scripted::Fail]));
        commit(&kv.inner, "xyz").await;
        let coordinator = coordinator(&blob, kv.clone(), &scratch);

        let error = coordinator.import(march(), "b").await.unwrap_err();
        assert!(matches!(error, IngestError::Transport(_)));
        assert_eq!(committed(&kv.inner).await.as_deref(), Some("xyz"));

        let outcome = coordinator.import(march(), "b").await.unwrap();
        assert!(matches!(
            outcome,
            ImportOutcome::Imported { summary: LoadSummary { batches: 2, items: 50 }, .. }
        ));
        assert_eq!(committed(&kv.inner).await.as_deref(), Some("pqr"));
        assert_eq!(kv.inner.items(BILLING_RECORD_TABLE).await.len(), 50);
    }

    #[tokio::test]
    async fn ambiguous_report_touches_nothing() {
        let scratch = tempfile::tempdir().unwrap();
        let blob = Arc::new(MemoryBlobStore::new("111"));
        publish(&blob, "xyz", &report_csv(0..3)).await;
        blob.put_object("b", &format!("{}.old", REPORT), "abc", "old")
            .await;
        let kv = Arc::new(MemoryKvStore::new());

        let error = coordinator(&blob, kv.clone(), &scratch)
            .import(march(), "b")
            .await
            .unwrap_err();

        assert!(matches!(error, IngestError::AmbiguousReport { count: 2, .. }));
        assert!(blob.gets().await.is_empty());
        assert!(kv.puts().await.is_empty());
        assert!(kv.batch_writes().await.is_empty());
    }

    #[tokio::test]
    async fn missing_report_for_other_account() {
        let scratch = tempfile::tempdir().unwrap();
        let blob = Arc::new(MemoryBlobStore::new("222"));
        publish(&blob, "xyz", &report_csv(0..3)).await;
        let kv = Arc::new(MemoryKvStore::new());

        let error = coordinator(&blob, kv, &scratch)
            .import(march(), "b")
            .await
            .unwrap_err();
        assert!(matches!(error, IngestError::MissingReport { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn unprocessed_items_are_resubmitted() {
        let scratch = tempfile::tempdir().unwrap();
        let blob = Arc::new(MemoryBlobStore::new("111"));
        publish(&blob, "xyz", &report_csv(0..25)).await;
        let kv = Arc::new(ScriptedKvStore::new([Scripted::Unprocessed(5)]));

        coordinator(&blob, kv.clone(), &scratch)
            .import(march(), "b")
            .await
            .unwrap();

        assert_eq!(kv.call_sizes(), [25, 5]);
        assert_eq!(kv.inner.items(BILLING_RECORD_TABLE).await.len(), 25);
        assert_eq!(committed(&kv.inner).await.as_deref(), Some("xyz"));
    }

    #[tokio::test]
    async fn bad_archive_is_not_committed() {
        let scratch = tempfile::tempdir().unwrap();
        let blob = Arc::new(MemoryBlobStore::new("111"));
        let archive = zip_bytes(&[("a.csv", "RecordId\nr1\n"), ("b.csv", "RecordId\nr2\n")]);
        blob.put_object("b", REPORT, "xyz", archive).await;
        let kv = Arc::new(MemoryKvStore::new());

        let error = coordinator(&blob, kv.clone(), &scratch)
            .import(march(), "b")
            .await
            .unwrap_err();
        assert!(matches!(error, IngestError::UnexpectedArchiveShape(_)));
        assert_eq!(committed(&kv).await, None);
    }

    #[tokio::test]
    async fn cancelled_import() {
        let scratch = tempfile::tempdir().unwrap();
        let blob = Arc::new(MemoryBlobStore::new("111"));
        publish(&blob, "xyz", &report_csv(0..3)).await;
        let kv = Arc::new(MemoryKvStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = coordinator(&blob, kv.clone(), &scratch)
            .with_cancellation(cancel)
            .import(march(), "b")
            .await
            .unwrap_err();
        assert!(matches!(error, IngestError::Cancelled));
        assert_eq!(committed(&kv).await, None);
    }

    #[test]
    fn stage_names() {
        let stages = [
            Stage::Checking,
            Stage::Fetching,
            Stage::Unzipping,
            Stage::Loading,
            Stage::Committing,
        ];
        let names: Vec<_> = stages.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["checking", "fetching", "unzipping", "loading", "committing"]);
    }
}
