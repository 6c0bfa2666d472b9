//! Read paths: point lookup, range scan, index lookup and predicate query.
//!
//! Results are JSON arrays whose members keep store order. Stored payloads are
//! inlined verbatim; a payload that is not JSON fails the read with
//! [`LedgerError::MalformedStoredData`] rather than corrupting the array.

use serde::Serialize;
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{LedgerError, Result};
use crate::index::IndexSpec;
use crate::keys::{is_composite_key, partial_composite_bounds, split_composite_key};
use crate::record::FieldSet;
use crate::store::{LedgerStore, Partition};

/// Conjunction of equality clauses over record properties.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Selector {
    clauses: Vec<(String, String)>,
}

impl Selector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, property: &str, value: &str) -> Self {
        self.clauses.push((property.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn clauses(&self) -> &[(String, String)] {
        &self.clauses
    }

    /// Render in the store's native selector syntax.
    ///
    /// Distinct properties share one object; a repeated property falls back
    /// to an explicit `$and` so no clause is lost.
    #[must_use]
    pub fn to_native(&self) -> String {
        let clause = |property: &str, value: &str| {
            let mut object = Map::new();
            object.insert(property.to_string(), Value::String(value.to_string()));
            object
        };

        let mut merged = Map::new();
        let repeated = self.clauses.iter().any(|(property, value)| {
            merged.insert(property.clone(), Value::String(value.clone())).is_some()
        });
        let body = if repeated {
            let parts = self
                .clauses
                .iter()
                .map(|(property, value)| Value::Object(clause(property, value)))
                .collect();
            let mut object = Map::new();
            object.insert("$and".to_string(), Value::Array(parts));
            object
        } else {
            merged
        };

        let mut root = Map::new();
        root.insert("selector".to_string(), Value::Object(body));
        Value::Object(root).to_string()
    }
}

/// Parse the native selector syntax accepted by predicate-capable stores.
///
/// Only string equality (`"p": "v"` or `"p": {"$eq": "v"}`) and `$and` are
/// understood. Anything else is refused rather than partially evaluated.
///
/// # Errors
/// Returns [`LedgerError::Store`] naming the unsupported construct.
pub fn parse_native_selector(native: &str) -> Result<Selector> {
    let unsupported = |what: String| LedgerError::Store(format!("unsupported selector: {what}"));

    let root: Value = serde_json::from_str(native).map_err(|err| unsupported(err.to_string()))?;
    let Value::Object(root) = root else {
        return Err(unsupported("query must be a JSON object".to_string()));
    };
    if let Some(extra) = root.keys().find(|key| key.as_str() != "selector") {
        return Err(unsupported(format!("top-level `{extra}`")));
    }
    let Some(Value::Object(body)) = root.get("selector") else {
        return Err(unsupported("`selector` must be an object".to_string()));
    };

    let mut selector = Selector::new();
    collect_clauses(body, &mut selector).map_err(unsupported)?;
    Ok(selector)
}

fn collect_clauses(
    body: &Map<String, Value>,
    selector: &mut Selector,
) -> std::result::Result<(), String> {
    for (property, condition) in body {
        if property == "$and" {
            let Value::Array(parts) = condition else {
                return Err("`$and` must be an array".to_string());
            };
            for part in parts {
                let Value::Object(part) = part else {
                    return Err("`$and` members must be objects".to_string());
                };
                collect_clauses(part, selector)?;
            }
            continue;
        }
        if property.starts_with('$') {
            return Err(format!("operator `{property}`"));
        }
        if property.contains(['"', '\\']) {
            return Err(format!("property name {property:?}"));
        }
        let value = match condition {
            Value::String(value) => value,
            Value::Object(operator) => match (operator.len(), operator.get("$eq")) {
                (1, Some(Value::String(value))) => value,
                _ => return Err(format!("condition on `{property}`: {condition}")),
            },
            other => return Err(format!("non-string operand on `{property}`: {other}")),
        };
        selector.clauses.push((property.clone(), value.clone()));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct KeyedRecord {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Record")]
    record: Box<RawValue>,
}

pub(crate) fn raw_json(key: &str, bytes: &[u8]) -> Result<Box<RawValue>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| LedgerError::malformed(key, format!("payload is not UTF-8: {err}")))?;
    RawValue::from_string(text.to_string())
        .map_err(|err| LedgerError::malformed(key, format!("payload is not JSON: {err}")))
}

fn raw_record(key: &str, bytes: &[u8]) -> Result<Box<RawValue>> {
    let raw = raw_json(key, bytes)?;
    if raw.get().trim_start().starts_with('{') {
        Ok(raw)
    } else {
        Err(LedgerError::malformed(key, "expected a JSON object"))
    }
}

pub(crate) fn encode_response<T: Serialize>(members: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(members)
        .map_err(|err| LedgerError::Store(format!("failed to encode response: {err}")))
}

/// Raw record stored under `key`.
///
/// # Errors
/// Returns [`LedgerError::NotFound`] when absent and
/// [`LedgerError::MalformedStoredData`] when the payload is not a JSON object.
pub fn point_lookup<S: LedgerStore + ?Sized>(
    store: &S,
    partition: &Partition,
    key: &str,
) -> Result<Vec<u8>> {
    let bytes = store.get(partition, key)?.ok_or_else(|| LedgerError::NotFound(key.to_string()))?;
    raw_record(key, &bytes)?;
    Ok(bytes)
}

/// `[{"Key", "Record"}]` for every record key in `[start, end)`.
///
/// # Errors
/// Propagates store failures and malformed payloads.
pub fn range_scan<S: LedgerStore + ?Sized>(
    store: &S,
    start: &str,
    end: Option<&str>,
) -> Result<Vec<u8>> {
    let rows = store.scan_range(&Partition::World, start, end)?;
    let mut members = Vec::with_capacity(rows.len());
    for (key, bytes) in rows {
        if is_composite_key(&key) {
            continue;
        }
        let record = raw_record(&key, &bytes)?;
        members.push(KeyedRecord { key, record });
    }
    debug!(start, ?end, results = members.len(), "range scan");
    encode_response(&members)
}

/// `[{"Key", "Record"}]` for every record indexed under `leading` values.
///
/// Entries whose primary record is gone, or no longer carries the indexed
/// values, are skipped.
///
/// # Errors
/// Propagates store failures and malformed payloads.
pub fn index_lookup<S: LedgerStore + ?Sized>(
    store: &S,
    fields: &FieldSet,
    spec: &IndexSpec,
    leading: &[&str],
) -> Result<Vec<u8>> {
    let (start, end) = partial_composite_bounds(&spec.name, leading)?;
    let entries = store.scan_range(&Partition::World, &start, Some(&end))?;

    let mut members = Vec::with_capacity(entries.len());
    for (entry_key, _) in entries {
        let (_, components) = split_composite_key(&entry_key)?;
        let Some(primary_key) = components.last() else {
            continue;
        };
        let Some(bytes) = store.get(&Partition::World, primary_key)? else {
            warn!(index = %spec.name, key = %primary_key, "index entry without primary record");
            continue;
        };
        let record = fields.decode(primary_key, &bytes)?;
        if spec.entry_key(&record, primary_key).ok().as_deref() != Some(entry_key.as_str()) {
            warn!(index = %spec.name, key = %primary_key, "stale index entry");
            continue;
        }
        let record = raw_record(primary_key, &bytes)?;
        members.push(KeyedRecord { key: primary_key.clone(), record });
    }
    debug!(index = %spec.name, results = members.len(), "index lookup");
    encode_response(&members)
}

/// `[<record>, ...]` matching `selector`; keys are not included.
///
/// # Errors
/// Propagates store failures, including unsupported selectors.
pub fn predicate_query<S: LedgerStore + ?Sized>(
    store: &S,
    partition: &Partition,
    selector: &Selector,
) -> Result<Vec<u8>> {
    let native = selector.to_native();
    let rows = store.query(partition, &native)?;
    let members = rows
        .iter()
        .map(|(key, bytes)| raw_record(key, bytes))
        .collect::<Result<Vec<_>>>()?;
    debug!(selector = %native, results = members.len(), "predicate query");
    encode_response(&members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::stage_record;
    use crate::record::{Field, FieldSpec, Record};
    use crate::store::{TxMeta, TxTimestamp, WriteBatch};
    use crate::test_support::MemoryStore;

    fn fields() -> FieldSet {
        FieldSet(vec![
            FieldSpec::new(Field::AssetId, "vaccineId"),
            FieldSpec::new(Field::Status, "status"),
        ])
    }

    fn tx(id: &str) -> TxMeta {
        TxMeta { tx_id: id.to_string(), timestamp: TxTimestamp { seconds: 1, nanos: 0 } }
    }

    fn status_index() -> IndexSpec {
        IndexSpec::new("owner~key", vec![Field::Status])
    }

    fn write(
        store: &mut MemoryStore,
        asset: &str,
        status: &str,
        previous: Option<&Record>,
    ) -> Result<()> {
        let record = Record {
            asset_id: asset.to_string(),
            status: status.to_string(),
            ..Record::default()
        };
        let mut batch = WriteBatch::new();
        let bytes = fields().encode(&record)?;
        stage_record(&mut batch, &[status_index()], asset, bytes, &record, previous)?;
        store.commit(&tx(&format!("tx-{asset}-{status}")), batch)
    }

    fn parse(bytes: &[u8]) -> Value {
        match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(err) => panic!("response is not JSON: {err}"),
        }
    }

    #[test]
    fn selector_renders_native_syntax() {
        assert_eq!(
            Selector::new().eq("idvacxin", "VAC1").to_native(),
            r#"{"selector":{"idvacxin":"VAC1"}}"#
        );
        assert_eq!(
            Selector::new().eq("a", "1").eq("a", "2").to_native(),
            r#"{"selector":{"$and":[{"a":"1"},{"a":"2"}]}}"#
        );
    }

    #[test]
    fn native_selector_round_trips_and_fails_closed() -> Result<()> {
        let selector = Selector::new().eq("deviceId", "DEV001").eq("status", "Normal");
        assert_eq!(parse_native_selector(&selector.to_native())?, selector);

        let explicit =
            parse_native_selector(r#"{"selector":{"$and":[{"a":{"$eq":"1"}},{"b":"2"}]}}"#)?;
        assert_eq!(explicit, Selector::new().eq("a", "1").eq("b", "2"));

        for native in [
            r#"{"selector":{"value":{"$gt":"2"}}}"#,
            r#"{"selector":{"$or":[{"a":"1"}]}}"#,
            r#"{"selector":{"value":2.5}}"#,
            r#"{"selector":{"a":"1"},"sort":["a"]}"#,
            r#"["selector"]"#,
        ] {
            assert!(
                matches!(parse_native_selector(native), Err(LedgerError::Store(_))),
                "selector should be rejected: {native}"
            );
        }
        Ok(())
    }

    #[test]
    fn point_lookup_reports_absent_keys() {
        let store = MemoryStore::default();
        assert_eq!(
            point_lookup(&store, &Partition::World, "VAC404"),
            Err(LedgerError::NotFound("VAC404".to_string()))
        );
    }

    #[test]
    fn range_scan_wraps_records_and_skips_index_entries() -> Result<()> {
        let mut store = MemoryStore::default();
        write(&mut store, "VAC001", "Normal", None)?;
        write(&mut store, "VAC002", "Alert", None)?;

        let all = parse(&range_scan(&store, "", None)?);
        assert_eq!(all.as_array().map(Vec::len), Some(2));
        assert_eq!(all[0]["Key"], "VAC001");
        assert_eq!(all[1]["Record"]["status"], "Alert");

        let empty = parse(&range_scan(&store, "X", Some("X~"))?);
        assert_eq!(empty, Value::Array(vec![]));
        Ok(())
    }

    #[test]
    fn range_scan_flags_malformed_payloads() -> Result<()> {
        let mut store = MemoryStore::default();
        store.put(&tx("bad"), Partition::World, "VAC009", b"{not json".to_vec())?;
        assert!(matches!(
            range_scan(&store, "", None),
            Err(LedgerError::MalformedStoredData { key, .. }) if key == "VAC009"
        ));
        Ok(())
    }

    #[test]
    fn index_lookup_follows_status_changes() -> Result<()> {
        let mut store = MemoryStore::default();
        write(&mut store, "VAC001", "Normal", None)?;
        write(&mut store, "VAC002", "Normal", None)?;
        let previous = Record {
            asset_id: "VAC002".to_string(),
            status: "Normal".to_string(),
            ..Record::default()
        };
        write(&mut store, "VAC002", "Alert", Some(&previous))?;

        let normal = parse(&index_lookup(&store, &fields(), &status_index(), &["Normal"])?);
        assert_eq!(normal.as_array().map(Vec::len), Some(1));
        assert_eq!(normal[0]["Key"], "VAC001");

        let alert = parse(&index_lookup(&store, &fields(), &status_index(), &["Alert"])?);
        assert_eq!(alert[0]["Key"], "VAC002");
        Ok(())
    }

    #[test]
    fn index_lookup_skips_entries_without_primary() -> Result<()> {
        let mut store = MemoryStore::default();
        let orphan = status_index().entry_key(
            &Record { status: "Normal".to_string(), ..Record::default() },
            "VAC777",
        )?;
        store.put(&tx("orphan"), Partition::World, &orphan, vec![0x00])?;
        let result = parse(&index_lookup(&store, &fields(), &status_index(), &["Normal"])?);
        assert_eq!(result, Value::Array(vec![]));
        Ok(())
    }

    #[test]
    fn predicate_query_returns_values_without_keys() -> Result<()> {
        let mut store = MemoryStore::default();
        write(&mut store, "VAC001", "Normal", None)?;
        write(&mut store, "VAC002", "Alert", None)?;

        let selector = Selector::new().eq("status", "Alert");
        let hits = parse(&predicate_query(&store, &Partition::World, &selector)?);
        assert_eq!(hits, serde_json::json!([{"vaccineId": "VAC002", "status": "Alert"}]));

        let none = Selector::new().eq("status", "Unknown");
        let misses = predicate_query(&store, &Partition::World, &none)?;
        assert_eq!(parse(&misses), Value::Array(vec![]));
        Ok(())
    }
}
