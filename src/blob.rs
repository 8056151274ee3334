//! [BlobReader] backed by the `object_store` crate: S3 in production, a local directory tree in
//! development.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;

use crate::{AccountId, AwsConfig, BlobReader, ByteStream, ObjectEntry, TransportError};

/// Creates the object store client serving one bucket.
pub trait BucketStoreFactory: Send + Sync {
    fn create_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, object_store::Error>;
}

/// Buckets of Amazon S3, accessed with static credentials.
pub struct S3StoreFactory {
    config: AwsConfig,
}

impl S3StoreFactory {
    pub fn new(config: AwsConfig) -> Self {
        Self { config }
    }
}

impl BucketStoreFactory for S3StoreFactory {
    fn create_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, object_store::Error> {
        let store = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&self.config.region)
            .with_access_key_id(&self.config.access_key)
            .with_secret_access_key(&self.config.secret_key)
            .build()?;
        Ok(Arc::new(store))
    }
}

/// Buckets as subdirectories of a local root directory.
pub struct LocalStoreFactory {
    root: PathBuf,
}

impl LocalStoreFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl BucketStoreFactory for LocalStoreFactory {
    fn create_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, object_store::Error> {
        let store = LocalFileSystem::new_with_prefix(self.root.join(bucket))?;
        Ok(Arc::new(store))
    }
}

/// Reads billing reports through `object_store` clients, created once per bucket.
pub struct ObjectStoreBlobReader {
    account_id: AccountId,
    factory: Box<dyn BucketStoreFactory>,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl ObjectStoreBlobReader {
    pub fn new(account_id: AccountId, factory: impl BucketStoreFactory + 'static) -> Self {
        Self {
            account_id,
            factory: Box::new(factory),
            stores: Default::default(),
        }
    }

    fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, TransportError> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| "object store cache poisoned")?;
        if let Some(store) = stores.get(bucket) {
            return Ok(store.clone());
        }
        let store = self.factory.create_store(bucket)?;
        stores.insert(bucket.to_owned(), store.clone());
        Ok(store)
    }
}

#[async_trait]
impl BlobReader for ObjectStoreBlobReader {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectEntry>, TransportError> {
        let store = self.store(bucket)?;
        // Prefixes match whole path segments: list everything below the enclosing directory,
        // then match on the full key.
        let directory = prefix
            .rsplit_once('/')
            .map(|(directory, _)| ObjectPath::from(directory));
        let objects: Vec<_> = store
            .list(directory.as_ref())
            .try_filter(|meta| futures::future::ready(meta.location.as_ref().starts_with(prefix)))
            .map_ok(|meta| ObjectEntry {
                key: meta.location.to_string(),
                etag: meta.e_tag,
                size: meta.size as u64,
            })
            .try_collect()
            .await?;
        Ok(objects)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, TransportError> {
        let store = self.store(bucket)?;
        let result = store.get(&ObjectPath::from(key)).await?;
        Ok(result
            .into_stream()
            .map_err(|error| -> TransportError { Box::new(error) })
            .boxed())
    }

    fn account_id(&self) -> AccountId {
        self.account_id.clone()
    }
}
