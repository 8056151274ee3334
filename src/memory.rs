//! In-memory stores, used by tests and local experiments.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::RwLock;

use crate::{
    AccountId, BatchWriteOutput, BlobReader, ByteStream, Item, Key, KvStore, ObjectEntry,
    TransportError,
};

/// Size of the chunks handed out by [MemoryBlobStore::get_object].
const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Clone, Debug)]
struct StoredObject {
    etag: String,
    content: Bytes,
}

/// A blob store keeping every object in memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    account_id: AccountId,
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
    gets: RwLock<Vec<(String, String)>>,
}

impl MemoryBlobStore {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: AccountId(account_id.into()),
            ..Default::default()
        }
    }

    /// Store an object, quoting `fingerprint` the way S3 does for its entity tags.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        fingerprint: &str,
        content: impl Into<Bytes>,
    ) {
        let object = StoredObject {
            etag: format!("\"{}\"", fingerprint),
            content: content.into(),
        };
        self.objects
            .write()
            .await
            .insert((bucket.to_owned(), key.to_owned()), object);
    }

    /// Every `(bucket, key)` fetched so far, in call order.
    pub async fn gets(&self) -> Vec<(String, String)> {
        self.gets.read().await.clone()
    }
}

#[async_trait]
impl BlobReader for MemoryBlobStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectEntry>, TransportError> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
            .map(|((_, key), object)| ObjectEntry {
                key: key.clone(),
                etag: Some(object.etag.clone()),
                size: object.content.len() as u64,
            })
            .collect())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, TransportError> {
        self.gets
            .write()
            .await
            .push((bucket.to_owned(), key.to_owned()));
        let object = self
            .objects
            .read()
            .await
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
            .ok_or_else(|| format!("no such key: {}/{}", bucket, key))?;
        let chunks: Vec<Result<Bytes, TransportError>> = object
            .content
            .chunks(CHUNK_SIZE)
            .map(|chunk| Ok(object.content.slice_ref(chunk)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    fn account_id(&self) -> AccountId {
        self.account_id.clone()
    }
}

/// A key-value store keeping every table in memory, recording the write requests it serves.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    tables: RwLock<HashMap<String, BTreeMap<Key, Item>>>,
    puts: RwLock<Vec<String>>,
    batch_writes: RwLock<Vec<(String, usize)>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// All items of `table`, ordered by key.
    pub async fn items(&self, table: &str) -> Vec<Item> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Table of every single-item write so far, in call order.
    pub async fn puts(&self) -> Vec<String> {
        self.puts.read().await.clone()
    }

    /// Table and size of every multi-write request so far, in call order.
    pub async fn batch_writes(&self) -> Vec<(String, usize)> {
        self.batch_writes.read().await.clone()
    }

    async fn insert(&self, table: &str, items: Vec<Item>) {
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_owned()).or_default();
        for item in items {
            rows.insert(item.key().clone(), item);
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, TransportError> {
        Ok(self
            .tables
            .read()
            .await
            .get(table)
            .and_then(|items| items.get(key))
            .cloned())
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<(), TransportError> {
        self.puts.write().await.push(table.to_owned());
        self.insert(table, vec![item]).await;
        Ok(())
    }

    async fn batch_write_item(
        &self,
        table: &str,
        items: Vec<Item>,
    ) -> Result<BatchWriteOutput, TransportError> {
        self.batch_writes
            .write()
            .await
            .push((table.to_owned(), items.len()));
        self.insert(table, items).await;
        Ok(BatchWriteOutput::default())
    }
}
