use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use billing_import::{
    AccountId, AwsConfig, BillingDate, BlobReader, BucketStoreFactory, ImportOutcome, IngestConfig,
    IngestCoordinator, KvStore, LocalStoreFactory, ObjectStoreBlobReader, ObjectStoreKvStore,
    S3StoreFactory, SledKvStore, DEFAULT_PRIMARY_KEY, DEFAULT_WORKER_COUNT, MAX_BATCH_SIZE,
};

/// Import the detailed billing report of a month into the billing tables.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// The billing month, as YYYY-MM
    #[arg(long, env = "BILLING_DATE")]
    date: BillingDate,
    /// The bucket AWS publishes the reports to
    #[arg(long, env = "BILLING_BUCKET")]
    bucket: String,
    /// The account owning the reports
    #[arg(long, env = "BILLING_ACCOUNT_ID")]
    account_id: String,
    /// Access key of the S3 account
    #[arg(long, env = "BILLING_S3_ACCESS_KEY", required_unless_present = "blob_root")]
    access_key: Option<String>,
    /// Secret key of the S3 account
    #[arg(
        long,
        env = "BILLING_S3_SECRET_KEY",
        hide_env_values = true,
        required_unless_present = "blob_root"
    )]
    secret_key: Option<String>,
    /// Region of the S3 bucket
    #[arg(long, env = "BILLING_S3_REGION", required_unless_present = "blob_root")]
    region: Option<String>,
    /// Read buckets from subdirectories of this directory instead of S3
    #[arg(long, env = "BILLING_BLOB_ROOT", conflicts_with_all = ["access_key", "secret_key", "region"])]
    blob_root: Option<PathBuf>,
    /// Path of the local database holding the billing tables
    #[arg(long, env = "BILLING_KV_PATH", default_value = "billing.sled")]
    kv_path: PathBuf,
    /// Keep the billing tables in this bucket instead of the local database
    #[arg(long, env = "BILLING_KV_BUCKET")]
    kv_bucket: Option<String>,
    /// Access key of the account holding the tables, if not the S3 one
    #[arg(long, env = "BILLING_KV_ACCESS_KEY", requires = "kv_bucket")]
    kv_access_key: Option<String>,
    /// Secret key of the account holding the tables, if not the S3 one
    #[arg(
        long,
        env = "BILLING_KV_SECRET_KEY",
        hide_env_values = true,
        requires = "kv_bucket"
    )]
    kv_secret_key: Option<String>,
    /// Region of the tables bucket, if not the S3 one
    #[arg(long, env = "BILLING_KV_REGION", requires = "kv_bucket")]
    kv_region: Option<String>,
    /// Scratch directory for downloaded archives
    #[arg(long, env = "BILLING_DOWNLOAD_DIR", default_value = "/tmp/billing-reports-download/")]
    download_dir: PathBuf,
    /// Scratch directory for extracted reports
    #[arg(long, env = "BILLING_UNZIP_DIR", default_value = "/tmp/billing-reports-unzip/")]
    unzip_dir: PathBuf,
    /// Number of concurrent writers
    #[arg(long, env = "BILLING_WORKERS", default_value_t = DEFAULT_WORKER_COUNT)]
    workers: usize,
    /// Items per write request
    #[arg(long, env = "BILLING_BATCH_SIZE", default_value_t = MAX_BATCH_SIZE)]
    batch_size: usize,
    /// Report column identifying each line item
    #[arg(long, env = "BILLING_PRIMARY_KEY", default_value = DEFAULT_PRIMARY_KEY)]
    primary_key: String,
}

impl Args {
    fn blob_aws_config(&self) -> AwsConfig {
        AwsConfig {
            access_key: self.access_key.clone().unwrap_or_default(),
            secret_key: self.secret_key.clone().unwrap_or_default(),
            region: self.region.clone().unwrap_or_default(),
        }
    }

    /// Key-value store credentials, each falling back to the blob store's.
    fn kv_aws_config(&self) -> AwsConfig {
        let blob = self.blob_aws_config();
        AwsConfig {
            access_key: self.kv_access_key.clone().unwrap_or(blob.access_key),
            secret_key: self.kv_secret_key.clone().unwrap_or(blob.secret_key),
            region: self.kv_region.clone().unwrap_or(blob.region),
        }
    }

    fn store_factory(&self, aws: AwsConfig) -> Box<dyn BucketStoreFactory> {
        match &self.blob_root {
            Some(root) => Box::new(LocalStoreFactory::new(root)),
            None => Box::new(S3StoreFactory::new(aws)),
        }
    }

    fn blob_reader(&self) -> Arc<dyn BlobReader> {
        let account_id = AccountId(self.account_id.clone());
        match &self.blob_root {
            Some(root) => Arc::new(ObjectStoreBlobReader::new(
                account_id,
                LocalStoreFactory::new(root),
            )),
            None => Arc::new(ObjectStoreBlobReader::new(
                account_id,
                S3StoreFactory::new(self.blob_aws_config()),
            )),
        }
    }

    /// The store holding the billing tables, along with the local database to flush if any.
    fn kv_store(&self) -> anyhow::Result<(Arc<dyn KvStore>, Option<SledKvStore>)> {
        match &self.kv_bucket {
            Some(bucket) => {
                let factory = self.store_factory(self.kv_aws_config());
                let kv = ObjectStoreKvStore::for_bucket(factory.as_ref(), bucket)
                    .with_context(|| format!("opening tables bucket {}", bucket))?;
                Ok((Arc::new(kv), None))
            }
            None => {
                let kv = SledKvStore::open(&self.kv_path)
                    .with_context(|| format!("opening {}", self.kv_path.display()))?;
                Ok((Arc::new(kv.clone()), Some(kv)))
            }
        }
    }

    fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            download_dir: self.download_dir.clone(),
            unzip_dir: self.unzip_dir.clone(),
            worker_count: self.workers,
            batch_size: self.batch_size,
            primary_key: self.primary_key.clone(),
            ..Default::default()
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("RUST_LOG_FORMAT")
        .map(|format| format == "json")
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let (kv, sled) = args.kv_store()?;
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling import");
                cancel.cancel();
            }
        }
    });

    let coordinator =
        IngestCoordinator::new(args.blob_reader(), kv, args.ingest_config())
            .with_cancellation(cancel);
    let outcome = coordinator
        .import(args.date, &args.bucket)
        .await
        .with_context(|| format!("importing {} from {}", args.date, args.bucket))?;
    if let Some(sled) = sled {
        sled.flush().await?;
    }

    match outcome {
        ImportOutcome::UpToDate {
            report_name,
            fingerprint,
        } => println!("{report_name}: up to date ({fingerprint})"),
        ImportOutcome::Imported {
            report_name,
            fingerprint,
            summary,
        } => println!(
            "{report_name}: imported {} line items in {} batches ({fingerprint})",
            summary.items, summary.batches
        ),
    }
    Ok(())
}
