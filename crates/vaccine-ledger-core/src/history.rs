use serde::Serialize;
use serde_json::value::RawValue;
use tracing::debug;

use crate::error::Result;
use crate::query::{encode_response, raw_json};
use crate::store::LedgerStore;

#[derive(Debug, Serialize)]
struct HistoryMember {
    #[serde(rename = "TxId")]
    tx_id: String,
    #[serde(rename = "Value")]
    value: Option<Box<RawValue>>,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "IsDelete")]
    is_delete: String,
}

/// Replay every retained mutation of `key` as a JSON array.
///
/// Deletes render `"Value": null`; `IsDelete` keeps its string form
/// (`"true"`/`"false"`).
///
/// # Errors
/// Propagates store failures, unrenderable timestamps and stored values that
/// are not JSON.
pub fn history_for_key<S: LedgerStore + ?Sized>(store: &S, key: &str) -> Result<Vec<u8>> {
    let entries = store.history(key)?;
    let mut members = Vec::with_capacity(entries.len());
    for entry in entries {
        let value = match (&entry.value, entry.is_delete) {
            (Some(bytes), false) => Some(raw_json(key, bytes)?),
            _ => None,
        };
        members.push(HistoryMember {
            tx_id: entry.tx_id,
            value,
            timestamp: entry.timestamp.render()?,
            is_delete: entry.is_delete.to_string(),
        });
    }
    debug!(key, entries = members.len(), "history replay");
    encode_response(&members)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::error::LedgerError;
    use crate::store::{Partition, TxMeta, TxTimestamp};
    use crate::test_support::MemoryStore;

    fn tx(id: &str, seconds: i64) -> TxMeta {
        TxMeta { tx_id: id.to_string(), timestamp: TxTimestamp { seconds, nanos: 0 } }
    }

    #[test]
    fn history_lists_writes_then_tombstone() -> Result<()> {
        let mut store = MemoryStore::default();
        let first = br#"{"value":"2.5"}"#.to_vec();
        let second = br#"{"value":"9.9"}"#.to_vec();
        store.put(&tx("t1", 1_719_828_000), Partition::World, "VAC001", first)?;
        store.put(&tx("t2", 1_719_828_060), Partition::World, "VAC001", second)?;
        store.delete(&tx("t3", 1_719_828_120), Partition::World, "VAC001")?;

        let history: Value = serde_json::from_slice(&history_for_key(&store, "VAC001")?)
            .map_err(|err| LedgerError::Store(err.to_string()))?;
        let entries = history.as_array().map_or(&[][..], Vec::as_slice);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["TxId"], "t1");
        assert_eq!(entries[0]["Value"]["value"], "2.5");
        assert_eq!(entries[1]["Value"]["value"], "9.9");
        assert_eq!(entries[1]["IsDelete"], "false");
        assert_eq!(entries[2]["Value"], Value::Null);
        assert_eq!(entries[2]["IsDelete"], "true");
        assert_eq!(entries[2]["Timestamp"], "2024-07-01T10:02:00Z");
        Ok(())
    }

    #[test]
    fn history_of_unknown_key_is_empty() -> Result<()> {
        let store = MemoryStore::default();
        assert_eq!(history_for_key(&store, "VAC404")?, b"[]".to_vec());
        Ok(())
    }
}
