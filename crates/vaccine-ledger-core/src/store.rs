//! Record store seam.
//!
//! The store exposes two logical partitions, the shared world state and named
//! private collections, over one trait. Reads go straight to the store; every
//! write an invocation performs is staged into a [`WriteBatch`] and applied by
//! [`LedgerStore::commit`] as a single unit of work.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    World,
    Private(String),
}

impl Partition {
    #[must_use]
    pub fn private(collection: &str) -> Self {
        Self::Private(collection.to_string())
    }

    /// Stable label used by storage backends to tag rows.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::World => "world".to_string(),
            Self::Private(collection) => format!("private:{collection}"),
        }
    }

    #[must_use]
    pub fn is_world(&self) -> bool {
        matches!(self, Self::World)
    }
}

impl Display for Partition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// Timestamp of the enclosing unit of work as delivered by the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TxTimestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl TxTimestamp {
    /// # Errors
    /// Returns [`LedgerError::Timestamp`] when `nanos` is outside `0..1_000_000_000`.
    pub fn new(seconds: i64, nanos: i32) -> Result<Self> {
        if !(0..1_000_000_000).contains(&nanos) {
            return Err(LedgerError::Timestamp(format!("nanos out of range: {nanos}")));
        }
        Ok(Self { seconds, nanos })
    }

    #[must_use]
    pub fn from_datetime(value: OffsetDateTime) -> Self {
        Self {
            seconds: value.unix_timestamp(),
            nanos: i32::try_from(value.nanosecond()).unwrap_or_default(),
        }
    }

    /// RFC 3339 rendering including sub-second precision.
    ///
    /// # Errors
    /// Returns [`LedgerError::Timestamp`] when the instant cannot be represented.
    pub fn render(self) -> Result<String> {
        let nanos = i128::from(self.seconds) * 1_000_000_000 + i128::from(self.nanos);
        let instant = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map_err(|err| LedgerError::Timestamp(err.to_string()))?;
        format_rfc3339(instant)
    }

    /// RFC 3339 rendering truncated to whole seconds.
    ///
    /// # Errors
    /// Returns [`LedgerError::Timestamp`] when the instant cannot be represented.
    pub fn render_seconds(self) -> Result<String> {
        let instant = OffsetDateTime::from_unix_timestamp(self.seconds)
            .map_err(|err| LedgerError::Timestamp(err.to_string()))?;
        format_rfc3339(instant)
    }
}

fn format_rfc3339(instant: OffsetDateTime) -> Result<String> {
    instant.format(&Rfc3339).map_err(|err| LedgerError::Timestamp(err.to_string()))
}

/// Identity of one unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TxMeta {
    pub tx_id: String,
    pub timestamp: TxTimestamp,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Mutation {
    Put { partition: Partition, key: String, value: Vec<u8> },
    Delete { partition: Partition, key: String },
}

impl Mutation {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}

/// Mutations that must be applied together or not at all.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct WriteBatch {
    mutations: Vec<Mutation>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, partition: Partition, key: impl Into<String>, value: Vec<u8>) {
        self.mutations.push(Mutation::Put { partition, key: key.into(), value });
    }

    pub fn delete(&mut self, partition: Partition, key: impl Into<String>) {
        self.mutations.push(Mutation::Delete { partition, key: key.into() });
    }

    #[must_use]
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// One retained mutation of a world-state key.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HistoryEntry {
    pub tx_id: String,
    /// `None` marks a delete.
    pub value: Option<Vec<u8>>,
    pub timestamp: TxTimestamp,
    pub is_delete: bool,
}

pub trait LedgerStore {
    /// # Errors
    /// Returns [`LedgerError::Store`] when the lookup fails.
    fn get(&self, partition: &Partition, key: &str) -> Result<Option<Vec<u8>>>;

    /// Keys in `[start, end)` in ascending byte order; `None` leaves the end open.
    ///
    /// # Errors
    /// Returns [`LedgerError::Store`] when the scan fails.
    fn scan_range(
        &self,
        partition: &Partition,
        start: &str,
        end: Option<&str>,
    ) -> Result<Vec<(String, Vec<u8>)>>;

    /// Evaluate a native selector string against `partition`.
    ///
    /// # Errors
    /// Returns [`LedgerError::Store`] for unsupported selectors or partitions.
    fn query(&self, partition: &Partition, selector: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Every retained world-state mutation of `key`, in store order.
    ///
    /// # Errors
    /// Returns [`LedgerError::Store`] when the log cannot be read.
    fn history(&self, key: &str) -> Result<Vec<HistoryEntry>>;

    /// Apply every mutation of `batch` atomically under `tx`.
    ///
    /// # Errors
    /// Returns [`LedgerError::Store`]; on error nothing from the batch is applied.
    fn commit(&mut self, tx: &TxMeta, batch: WriteBatch) -> Result<()>;

    /// # Errors
    /// See [`LedgerStore::commit`].
    fn put(&mut self, tx: &TxMeta, partition: Partition, key: &str, value: Vec<u8>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(partition, key, value);
        self.commit(tx, batch)
    }

    /// # Errors
    /// See [`LedgerStore::commit`].
    fn delete(&mut self, tx: &TxMeta, partition: Partition, key: &str) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(partition, key);
        self.commit(tx, batch)
    }

    /// # Errors
    /// See [`LedgerStore::get`].
    fn exists(&self, partition: &Partition, key: &str) -> Result<bool> {
        Ok(self.get(partition, key)?.is_some())
    }
}
