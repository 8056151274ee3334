//! Core types used in the ingestion of billing reports.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::{IngestError, IngestResult, ParseError};

/// Table holding one [ReportEntry] per ingested report.
pub const BILLING_REPORT_TABLE: &str = "billing-reports";
/// Partition key of [BILLING_REPORT_TABLE].
pub const BILLING_REPORT_NAME_FIELD: &str = "name";
/// Attribute of [BILLING_REPORT_TABLE] holding the last ingested fingerprint.
pub const BILLING_REPORT_MD5_FIELD: &str = "md5";
/// Table holding the billing line items.
pub const BILLING_RECORD_TABLE: &str = "billing-records";

/// Maximum number of items the key-value store accepts in one multi-write request.
pub const MAX_BATCH_SIZE: usize = 25;

const REPORT_NAME_PATTERN: &str = "-aws-billing-detailed-line-items-with-resources-and-tags-";
const REPORT_EXTENSION: &str = ".csv.zip";

/// The AWS account owning the billing reports.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A billing month, written `YYYY-MM`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BillingDate {
    year: u16,
    month: u8,
}

impl BillingDate {
    pub fn new(year: u16, month: u8) -> Result<Self, ParseError> {
        if !(1..=12).contains(&month) || year > 9999 {
            return Err(ParseError::InvalidDate(format!("{:04}-{:02}", year, month)));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }
}

impl std::fmt::Display for BillingDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl std::str::FromStr for BillingDate {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidDate(s.to_owned());
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        if !year.chars().chain(month.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

/// The object name of a report, which is also its identity in [BILLING_REPORT_TABLE].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ReportName(pub String);

impl ReportName {
    /// The name under which AWS publishes the detailed line items of `account` for `date`.
    pub fn for_account(account: &AccountId, date: BillingDate) -> Self {
        Self(format!(
            "{}{}{}{}",
            account, REPORT_NAME_PATTERN, date, REPORT_EXTENSION
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReportName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// An opaque content hash, only ever compared for equality.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Blob stores hand out entity tags wrapped in double quotes: strip them.
    pub fn from_etag(etag: &str) -> Self {
        let unquoted = etag
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(etag);
        Self(unquoted.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Everything needed to locate one report.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReportDescriptor {
    pub report_name: ReportName,
    #[serde_as(as = "DisplayFromStr")]
    pub date: BillingDate,
    pub bucket: String,
    pub account_id: AccountId,
}

impl ReportDescriptor {
    pub fn new(account_id: AccountId, date: BillingDate, bucket: impl Into<String>) -> Self {
        Self {
            report_name: ReportName::for_account(&account_id, date),
            date,
            bucket: bucket.into(),
            account_id,
        }
    }
}

/// The primary key of an [Item]: a single string attribute.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct Key {
    pub attribute: String,
    pub value: String,
}

impl Key {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.attribute, self.value)
    }
}

/// A row of the key-value store. All attributes are strings, the key attribute included.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct Item {
    key: Key,
    attributes: BTreeMap<String, String>,
}

/// One parsed row of a detailed billing report.
pub type LineItem = Item;

/// Line items submitted together in one multi-write request.
pub type Batch = Vec<LineItem>;

impl Item {
    /// Build an item from its attributes, `key_attribute` naming the primary key among them.
    /// Returns `None` if the key attribute is absent or empty.
    pub fn new(key_attribute: &str, attributes: BTreeMap<String, String>) -> Option<Self> {
        let value = attributes.get(key_attribute).filter(|v| !v.is_empty())?;
        Some(Self {
            key: Key::new(key_attribute, value.clone()),
            attributes,
        })
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

/// The metadata row recording the last successfully ingested version of a report.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReportEntry {
    pub name: ReportName,
    pub fingerprint: Fingerprint,
}

impl ReportEntry {
    pub fn key_for(name: &ReportName) -> Key {
        Key::new(BILLING_REPORT_NAME_FIELD, name.as_str())
    }

    pub fn to_item(&self) -> Item {
        let attributes = BTreeMap::from([
            (BILLING_REPORT_NAME_FIELD.to_owned(), self.name.0.clone()),
            (BILLING_REPORT_MD5_FIELD.to_owned(), self.fingerprint.0.clone()),
        ]);
        Item {
            key: Self::key_for(&self.name),
            attributes,
        }
    }

    /// Read back a row of [BILLING_REPORT_TABLE], which must carry the fingerprint attribute.
    pub fn from_item(item: &Item) -> IngestResult<Self> {
        let md5 = item
            .get(BILLING_REPORT_MD5_FIELD)
            .ok_or_else(|| IngestError::CorruptMetadata {
                name: item.key().value.clone(),
                field: BILLING_REPORT_MD5_FIELD,
            })?;
        Ok(Self {
            name: ReportName(item.key().value.clone()),
            fingerprint: Fingerprint(md5.to_owned()),
        })
    }
}
