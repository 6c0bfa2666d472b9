//! Secondary index maintenance.
//!
//! Index entries are composite keys `name, component values..., primary key`
//! holding a one-byte sentinel. They are staged into the same [`WriteBatch`]
//! as the primary record so both land, or neither does.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::keys::composite_key;
use crate::record::{Field, Record};
use crate::store::{Partition, WriteBatch};

pub const INDEX_SENTINEL: [u8; 1] = [0x00];

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub components: Vec<Field>,
}

impl IndexSpec {
    #[must_use]
    pub fn new(name: &str, components: Vec<Field>) -> Self {
        Self { name: name.to_string(), components }
    }

    /// Index key for `record` stored under `primary_key`.
    ///
    /// # Errors
    /// Returns [`LedgerError::Validation`] when a component value is empty and
    /// [`LedgerError::InvalidKey`] when it cannot be encoded.
    pub fn entry_key(&self, record: &Record, primary_key: &str) -> Result<String> {
        let mut components = Vec::with_capacity(self.components.len() + 1);
        for field in &self.components {
            let value = record.get(*field);
            if value.is_empty() {
                return Err(LedgerError::empty_field(field.as_str()));
            }
            components.push(value);
        }
        components.push(primary_key);
        composite_key(&self.name, &components)
    }
}

/// Stage a primary put plus every index entry it needs.
///
/// `previous` is the version being overwritten, if any; its index entries that
/// no longer match are retracted in the same batch.
///
/// # Errors
/// Returns an error before anything is staged if any index key is invalid.
pub fn stage_record(
    batch: &mut WriteBatch,
    indexes: &[IndexSpec],
    primary_key: &str,
    bytes: Vec<u8>,
    record: &Record,
    previous: Option<&Record>,
) -> Result<()> {
    let current = entry_keys(indexes, record, primary_key)?;
    let stale = match previous {
        Some(previous) => stale_keys(indexes, previous, primary_key, &current),
        None => Vec::new(),
    };

    batch.put(Partition::World, primary_key, bytes);
    for key in current {
        batch.put(Partition::World, key, INDEX_SENTINEL.to_vec());
    }
    for key in stale {
        batch.delete(Partition::World, key);
    }
    Ok(())
}

/// Stage the delete of a primary record and the retraction of its entries.
pub fn stage_delete(
    batch: &mut WriteBatch,
    indexes: &[IndexSpec],
    primary_key: &str,
    previous: Option<&Record>,
) {
    batch.delete(Partition::World, primary_key);
    if let Some(previous) = previous {
        for key in stale_keys(indexes, previous, primary_key, &[]) {
            batch.delete(Partition::World, key);
        }
    }
}

fn entry_keys(indexes: &[IndexSpec], record: &Record, primary_key: &str) -> Result<Vec<String>> {
    indexes.iter().map(|spec| spec.entry_key(record, primary_key)).collect()
}

// A previous version that could not be indexed never had entries to retract.
fn stale_keys(
    indexes: &[IndexSpec],
    previous: &Record,
    primary_key: &str,
    keep: &[String],
) -> Vec<String> {
    indexes
        .iter()
        .filter_map(|spec| spec.entry_key(previous, primary_key).ok())
        .filter(|key| !keep.contains(key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Mutation;

    fn status_index() -> Vec<IndexSpec> {
        vec![IndexSpec::new("owner~key", vec![Field::Status])]
    }

    fn vaccine(status: &str) -> Record {
        Record {
            asset_id: "VAC001".to_string(),
            status: status.to_string(),
            ..Record::default()
        }
    }

    #[test]
    fn entry_key_appends_primary_key() -> Result<()> {
        let key = status_index()[0].entry_key(&vaccine("Normal"), "VAC001")?;
        assert_eq!(key, "\u{0}owner~key\u{0}Normal\u{0}VAC001\u{0}");
        Ok(())
    }

    #[test]
    fn stage_record_writes_primary_and_index_together() -> Result<()> {
        let mut batch = WriteBatch::new();
        let record = vaccine("Normal");
        stage_record(&mut batch, &status_index(), "VAC001", b"{}".to_vec(), &record, None)?;
        assert_eq!(batch.len(), 2);
        assert!(matches!(
            &batch.mutations()[1],
            Mutation::Put { value, .. } if value == &INDEX_SENTINEL
        ));
        Ok(())
    }

    #[test]
    fn stage_record_retracts_changed_entries_only() -> Result<()> {
        let mut batch = WriteBatch::new();
        let old = vaccine("Normal");
        let new = vaccine("Alert");
        stage_record(&mut batch, &status_index(), "VAC001", b"{}".to_vec(), &new, Some(&old))?;
        let deletes: Vec<&str> = batch
            .mutations()
            .iter()
            .filter(|m| matches!(m, Mutation::Delete { .. }))
            .map(Mutation::key)
            .collect();
        assert_eq!(deletes, vec!["\u{0}owner~key\u{0}Normal\u{0}VAC001\u{0}"]);

        let mut unchanged = WriteBatch::new();
        stage_record(&mut unchanged, &status_index(), "VAC001", b"{}".to_vec(), &old, Some(&old))?;
        assert!(unchanged.mutations().iter().all(|m| matches!(m, Mutation::Put { .. })));
        Ok(())
    }

    #[test]
    fn stage_record_stages_nothing_when_a_component_is_empty() {
        let mut batch = WriteBatch::new();
        let record = vaccine("");
        let result =
            stage_record(&mut batch, &status_index(), "VAC001", b"{}".to_vec(), &record, None);
        assert!(matches!(result, Err(LedgerError::Validation { field, .. }) if field == "status"));
        assert!(batch.is_empty());
    }

    #[test]
    fn stage_delete_retracts_index_entries() {
        let mut batch = WriteBatch::new();
        stage_delete(&mut batch, &status_index(), "VAC001", Some(&vaccine("Normal")));
        assert_eq!(batch.len(), 2);
        assert!(batch.mutations().iter().all(|m| matches!(m, Mutation::Delete { .. })));
    }
}
