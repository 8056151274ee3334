//! Interfaces to the external blob store and key-value store.
//!
//! The ingestion pipeline only ever talks to these traits, so tests can swap in the in-memory
//! fakes of [crate::memory].

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::{AccountId, Item, Key, TransportError};

/// The content of an object, read chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// One object returned by a listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    /// The entity tag as returned by the store, possibly quoted.
    pub etag: Option<String>,
    pub size: u64,
}

/// Read-only access to the blob store holding the billing reports.
#[async_trait]
pub trait BlobReader: Send + Sync {
    /// List every object of `bucket` whose key starts with `prefix`.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectEntry>, TransportError>;

    /// Open a streaming read of the object at `key`.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, TransportError>;

    /// The account owning the reports.
    fn account_id(&self) -> AccountId;
}

/// Result of a multi-write request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchWriteOutput {
    /// Items the store did not write, to be resubmitted by the caller.
    pub unprocessed: Vec<Item>,
}

/// Access to the tables of the key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, TransportError>;

    /// Insert or overwrite a single item.
    async fn put_item(&self, table: &str, item: Item) -> Result<(), TransportError>;

    /// Insert or overwrite up to [crate::MAX_BATCH_SIZE] items at once. The store may leave a
    /// subset of them unprocessed.
    async fn batch_write_item(
        &self,
        table: &str,
        items: Vec<Item>,
    ) -> Result<BatchWriteOutput, TransportError>;
}
