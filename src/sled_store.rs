//! Persistent [KvStore] on top of the Sled embedded database.
//!
//! Each table is a Sled tree, keyed by the value of the item's primary key and holding the item
//! as JSON.

use std::path::Path;

use async_trait::async_trait;

use crate::{BatchWriteOutput, IngestError, IngestResult, Item, Key, KvStore, TransportError};

#[derive(Debug, Clone)]
pub struct SledKvStore {
    db: sled::Db,
}

impl SledKvStore {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> IngestResult<Self> {
        let db = sled::open(path).map_err(IngestError::transport)?;
        Ok(Self { db })
    }

    /// A database removed once dropped.
    pub fn temporary() -> IngestResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(IngestError::transport)?;
        Ok(Self { db })
    }

    /// Flush pending writes to disk.
    pub async fn flush(&self) -> IngestResult<()> {
        self.db
            .flush_async()
            .await
            .map_err(IngestError::transport)?;
        Ok(())
    }

    /// Run `f` against the tree of `table` on the blocking thread pool.
    async fn with_tree<T, F>(&self, table: &str, f: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(sled::Tree) -> Result<T, TransportError> + Send + 'static,
    {
        let db = self.db.clone();
        let table = table.to_owned();
        tokio::task::spawn_blocking(move || f(db.open_tree(table)?)).await?
    }
}

#[async_trait]
impl KvStore for SledKvStore {
    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, TransportError> {
        let key = key.clone();
        self.with_tree(table, move |tree| {
            let Some(bytes) = tree.get(key.value.as_bytes())? else {
                return Ok(None);
            };
            let item: Item = serde_json::from_slice(&bytes)?;
            Ok((item.key() == &key).then_some(item))
        })
        .await
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<(), TransportError> {
        self.with_tree(table, move |tree| {
            let bytes = serde_json::to_vec(&item)?;
            tree.insert(item.key().value.as_bytes(), bytes)?;
            Ok(())
        })
        .await
    }

    async fn batch_write_item(
        &self,
        table: &str,
        items: Vec<Item>,
    ) -> Result<BatchWriteOutput, TransportError> {
        self.with_tree(table, move |tree| {
            let mut batch = sled::Batch::default();
            for item in &items {
                batch.insert(item.key().value.as_bytes(), serde_json::to_vec(item)?);
            }
            tree.apply_batch(batch)?;
            Ok(BatchWriteOutput::default())
        })
        .await
    }
}
