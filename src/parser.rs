//! Parse the CSV of a detailed billing report into line items.

use std::collections::BTreeMap;
use std::path::Path;

use crate::{IngestError, IngestResult, LineItem};

/// Lazily reads [LineItem] values out of a billing report, one per CSV row.
///
/// The header row names the attributes; values are kept verbatim as strings and empty cells are
/// left out. Every row must carry a non-empty value for the primary key column. Rows are
/// numbered from 1, the header being row 0. Iteration stops after the first error.
pub struct RecordParser<R> {
    records: csv::StringRecordsIntoIter<R>,
    headers: Vec<String>,
    primary_key: String,
    row: u64,
    done: bool,
}

impl RecordParser<std::fs::File> {
    pub fn from_path(path: &Path, primary_key: &str) -> IngestResult<Self> {
        Self::from_reader(std::fs::File::open(path)?, primary_key)
    }
}

impl<R: std::io::Read> RecordParser<R> {
    /// The [csv::ReaderBuilder] configured for billing reports.
    pub fn configured_csv_reader_builder() -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder.has_headers(true).flexible(false);
        builder
    }

    pub fn from_reader(reader: R, primary_key: &str) -> IngestResult<Self> {
        let mut reader = Self::configured_csv_reader_builder().from_reader(reader);
        let headers: Vec<String> = reader
            .headers()
            .map_err(|error| malformed(0, error))?
            .iter()
            .map(str::to_owned)
            .collect();
        if !headers.is_empty() && !headers.iter().any(|h| h == primary_key) {
            return Err(IngestError::MalformedRow {
                row: 0,
                reason: format!("header lacks primary key column '{}'", primary_key),
            });
        }
        let mut seen = std::collections::BTreeSet::new();
        if let Some(duplicate) = headers.iter().find(|h| !seen.insert(h.as_str())) {
            return Err(IngestError::MalformedRow {
                row: 0,
                reason: format!("duplicate column '{}'", duplicate),
            });
        }
        Ok(Self {
            records: reader.into_records(),
            headers,
            primary_key: primary_key.to_owned(),
            row: 0,
            done: false,
        })
    }

    /// The attribute names, in column order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn parse_record(&self, record: csv::StringRecord) -> IngestResult<LineItem> {
        let attributes: BTreeMap<String, String> = self
            .headers
            .iter()
            .zip(record.iter())
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (name.clone(), value.to_owned()))
            .collect();
        LineItem::new(&self.primary_key, attributes).ok_or_else(|| IngestError::MalformedRow {
            row: self.row,
            reason: format!("missing primary key '{}'", self.primary_key),
        })
    }
}

impl<R: std::io::Read> Iterator for RecordParser<R> {
    type Item = IngestResult<LineItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(record) = self.records.next() else {
            self.done = true;
            return None;
        };
        self.row += 1;
        let item = record
            .map_err(|error| malformed(self.row, error))
            .and_then(|record| self.parse_record(record));
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}

fn malformed(row: u64, error: csv::Error) -> IngestError {
    let reason = error.to_string();
    match error.into_kind() {
        csv::ErrorKind::Io(error) => IngestError::Io(error),
        _ => IngestError::MalformedRow { row, reason },
    }
}
