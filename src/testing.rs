//! Helpers shared by the unit tests.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{BatchWriteOutput, Item, Key, KvStore, MemoryKvStore, TransportError};

macro_rules! inline_csv {
    ($line:literal) => {
        concat!($line, "\n")
    };
    ($line:literal, $($lines:literal),+ $(,)?) => {
        concat!($line, "\n", inline_csv!($($lines),+))
    };
}

/// Build an in-memory ZIP archive out of `(name, content)` entries.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// One line per item: its key, then its attributes.
pub fn dump_items<'a>(items: impl IntoIterator<Item = &'a Item>) -> String {
    items
        .into_iter()
        .map(|item| format!("{}: {:?}\n", item.key(), item.attributes()))
        .collect()
}

/// Line items keyed `r000`, `r001`, ... so that key order matches numeric order.
pub fn line_items(ids: std::ops::Range<usize>) -> Vec<Item> {
    ids.map(|id| {
        let attributes = [
            ("RecordId".to_owned(), format!("r{:03}", id)),
            ("Cost".to_owned(), format!("{}.0", id)),
        ];
        Item::new("RecordId", attributes.into()).unwrap()
    })
    .collect()
}

/// How [ScriptedKvStore] answers one multi-write request.
#[derive(Clone, Debug)]
pub enum Scripted {
    /// Write every item.
    Write,
    /// Write all but the last `n` items, returning those as unprocessed.
    Unprocessed(usize),
    /// Write nothing and fail the request.
    Fail,
}

/// A [MemoryKvStore] whose multi-write requests follow a script, then succeed once it runs out.
pub struct ScriptedKvStore {
    pub inner: MemoryKvStore,
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<usize>>,
}

impl ScriptedKvStore {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            inner: MemoryKvStore::new(),
            script: Mutex::new(script.into_iter().collect()),
            calls: Default::default(),
        }
    }

    /// Size of every multi-write request received, in call order.
    pub fn call_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl KvStore for ScriptedKvStore {
    async fn get_item(&self, table: &str, key: &Key) -> Result<Option<Item>, TransportError> {
        self.inner.get_item(table, key).await
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<(), TransportError> {
        self.inner.put_item(table, item).await
    }

    async fn batch_write_item(
        &self,
        table: &str,
        mut items: Vec<Item>,
    ) -> Result<BatchWriteOutput, TransportError> {
        self.calls.lock().unwrap().push(items.len());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            None | Some(Scripted::Write) => self.inner.batch_write_item(table, items).await,
            Some(Scripted::Fail) => Err("request throttled".into()),
            Some(Scripted::Unprocessed(n)) => {
                let unprocessed = items.split_off(items.len().saturating_sub(n));
                self.inner.batch_write_item(table, items).await?;
                Ok(BatchWriteOutput { unprocessed })
            }
        }
    }
}

/// A report CSV whose rows match [line_items] over the same range.
pub fn report_csv(ids: std::ops::Range<usize>) -> String {
    let mut csv = String::from("RecordId,Cost\n");
    for id in ids {
        csv.push_str(&format!("r{:03},{}.0\n", id, id));
    }
    csv
}
