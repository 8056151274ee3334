//! [KvStore] keeping each item as a JSON object of a bucket, at `{table}/{key}`.
//!
//! Lets the record and report tables live on S3, with credentials distinct from the ones reading
//! the reports.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tracing::warn;

use crate::{
    BatchWriteOutput, BucketStoreFactory, IngestError, IngestResult, Item, Key, KvStore,
    TransportError,
};

pub struct ObjectStoreKvStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreKvStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Keep the tables in `bucket`, as served by `factory`.
    pub fn for_bucket(factory: &dyn BucketStoreFactory, bucket: &str) -> IngestResult<Self> {
        let store = factory
            .create_store(bucket)
            .map_err(IngestError::transport)?;
        Ok(Self::new(store))
    }

    fn location(table: &str, value: &str) -> ObjectPath {
        ObjectPath::from_iter([table, value])
    }

    async fn put(&self, table: &str, item: &Item) -> Result<(), TransportError> {
        let bytes = serde_json::to_vec(item)?;
        self.store
            .put(&Self::location(table, &item.key().value), bytes.into())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for ObjectStoreKvStore {
    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, TransportError> {
        let bytes = match self.store.get(&Self::location(table, &key.value)).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let item: Item = serde_json::from_slice(&bytes)?;
        Ok((item.key() == key).then_some(item))
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<(), TransportError> {
        self.put(table, &item).await
    }

    /// Items whose write failed are returned as unprocessed, unless every write failed.
    async fn batch_write_item(
        &self,
        table: &str,
        items: Vec<Item>,
    ) -> Result<BatchWriteOutput, TransportError> {
        let submitted = items.len();
        let results =
            futures::future::join_all(items.iter().map(|item| self.put(table, item))).await;
        let mut unprocessed = Vec::new();
        let mut last_error = None;
        for (item, result) in items.into_iter().zip(results) {
            if let Err(error) = result {
                warn!(table, key = %item.key(), %error, "object write failed");
                unprocessed.push(item);
                last_error = Some(error);
            }
        }
        match last_error {
            Some(error) if unprocessed.len() == submitted => Err(error),
            _ => Ok(BatchWriteOutput { unprocessed }),
        }
    }
}
