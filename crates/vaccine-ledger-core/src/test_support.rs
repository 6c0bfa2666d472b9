use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::{LedgerError, Result};
use crate::query::parse_native_selector;
use crate::store::{HistoryEntry, LedgerStore, Mutation, Partition, TxMeta, WriteBatch};

/// In-memory store with the same observable behavior as the SQLite backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: BTreeMap<(Partition, String), Vec<u8>>,
    history: Vec<(String, HistoryEntry)>,
    tx_ids: BTreeSet<String>,
}

impl LedgerStore for MemoryStore {
    fn get(&self, partition: &Partition, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.get(&(partition.clone(), key.to_string())).cloned())
    }

    fn scan_range(
        &self,
        partition: &Partition,
        start: &str,
        end: Option<&str>,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .state
            .iter()
            .filter(|((row_partition, key), _)| {
                row_partition == partition
                    && key.as_str() >= start
                    && end.map_or(true, |end| key.as_str() < end)
            })
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }

    fn query(&self, partition: &Partition, selector: &str) -> Result<Vec<(String, Vec<u8>)>> {
        if !partition.is_world() {
            return Err(LedgerError::Store(format!(
                "rich queries are not supported on {partition}"
            )));
        }
        let selector = parse_native_selector(selector)?;
        let mut rows = Vec::new();
        for ((row_partition, key), value) in &self.state {
            if row_partition != partition {
                continue;
            }
            let Ok(Value::Object(object)) = serde_json::from_slice::<Value>(value) else {
                continue;
            };
            let matches = selector.clauses().iter().all(|(property, expected)| {
                object.get(property).and_then(Value::as_str) == Some(expected.as_str())
            });
            if matches {
                rows.push((key.clone(), value.clone()));
            }
        }
        Ok(rows)
    }

    fn history(&self, key: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .history
            .iter()
            .filter(|(entry_key, _)| entry_key == key)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    fn commit(&mut self, tx: &TxMeta, batch: WriteBatch) -> Result<()> {
        if !self.tx_ids.insert(tx.tx_id.clone()) {
            return Err(LedgerError::Store(format!("transaction {} already committed", tx.tx_id)));
        }
        for mutation in batch.mutations() {
            let (partition, key, value) = match mutation {
                Mutation::Put { partition, key, value } => (partition, key, Some(value.clone())),
                Mutation::Delete { partition, key } => (partition, key, None),
            };
            match &value {
                Some(bytes) => {
                    self.state.insert((partition.clone(), key.clone()), bytes.clone());
                }
                None => {
                    self.state.remove(&(partition.clone(), key.clone()));
                }
            }
            if partition.is_world() {
                self.history.push((
                    key.clone(),
                    HistoryEntry {
                        tx_id: tx.tx_id.clone(),
                        is_delete: value.is_none(),
                        value,
                        timestamp: tx.timestamp,
                    },
                ));
            }
        }
        Ok(())
    }
}
