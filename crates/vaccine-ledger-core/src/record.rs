use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LedgerError, Result};

/// Canonical record attributes shared by every contract variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    DeviceId,
    AssetId,
    Type,
    Value,
    Unit,
    Timestamp,
    Status,
}

impl Field {
    pub const ALL: [Self; 7] = [
        Self::DeviceId,
        Self::AssetId,
        Self::Type,
        Self::Value,
        Self::Unit,
        Self::Timestamp,
        Self::Status,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeviceId => "deviceId",
            Self::AssetId => "assetId",
            Self::Type => "type",
            Self::Value => "value",
            Self::Unit => "unit",
            Self::Timestamp => "timestamp",
            Self::Status => "status",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.as_str() == value)
    }
}

/// One telemetry or vaccine event. Absent attributes are empty strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Record {
    pub device_id: String,
    pub asset_id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub value: String,
    pub unit: String,
    pub timestamp: String,
    pub status: String,
}

impl Record {
    #[must_use]
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::DeviceId => &self.device_id,
            Field::AssetId => &self.asset_id,
            Field::Type => &self.record_type,
            Field::Value => &self.value,
            Field::Unit => &self.unit,
            Field::Timestamp => &self.timestamp,
            Field::Status => &self.status,
        }
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let slot = match field {
            Field::DeviceId => &mut self.device_id,
            Field::AssetId => &mut self.asset_id,
            Field::Type => &mut self.record_type,
            Field::Value => &mut self.value,
            Field::Unit => &mut self.unit,
            Field::Timestamp => &mut self.timestamp,
            Field::Status => &mut self.status,
        };
        *slot = value.into();
    }
}

/// Binds a canonical field to the JSON property name one variant writes.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FieldSpec {
    pub field: Field,
    pub name: String,
}

impl FieldSpec {
    #[must_use]
    pub fn new(field: Field, name: &str) -> Self {
        Self { field, name: name.to_string() }
    }
}

/// Ordered wire layout of a record for one contract variant.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct FieldSet(pub Vec<FieldSpec>);

impl FieldSet {
    #[must_use]
    pub fn specs(&self) -> &[FieldSpec] {
        &self.0
    }

    #[must_use]
    pub fn contains(&self, field: Field) -> bool {
        self.0.iter().any(|spec| spec.field == field)
    }

    /// Wire name used for `field`, when the variant carries it.
    #[must_use]
    pub fn name_of(&self, field: Field) -> Option<&str> {
        self.0.iter().find(|spec| spec.field == field).map(|spec| spec.name.as_str())
    }

    /// Encode a record as a JSON object with this set's names, in order.
    ///
    /// # Errors
    /// Returns [`LedgerError::Store`] if JSON serialization fails.
    pub fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_object(record))
            .map_err(|err| LedgerError::Store(format!("failed to encode record: {err}")))
    }

    #[must_use]
    pub fn to_object(&self, record: &Record) -> Map<String, Value> {
        self.0
            .iter()
            .map(|spec| (spec.name.clone(), Value::String(record.get(spec.field).to_string())))
            .collect()
    }

    /// Decode bytes read back from the store under `key`.
    ///
    /// Missing properties decode as empty strings; anything that is not a JSON
    /// object of strings is reported as malformed.
    ///
    /// # Errors
    /// Returns [`LedgerError::MalformedStoredData`] for undecodable payloads.
    pub fn decode(&self, key: &str, bytes: &[u8]) -> Result<Record> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|err| LedgerError::malformed(key, format!("invalid JSON: {err}")))?;
        let Value::Object(object) = value else {
            return Err(LedgerError::malformed(key, "expected a JSON object"));
        };
        self.from_object(&object).map_err(|reason| LedgerError::malformed(key, reason))
    }

    /// Build a record from a decoded JSON object, property by property.
    ///
    /// # Errors
    /// Returns a description of the first property that is not a string.
    pub fn from_object(&self, object: &Map<String, Value>) -> std::result::Result<Record, String> {
        let mut record = Record::default();
        for spec in &self.0 {
            match object.get(&spec.name) {
                None | Some(Value::Null) => {}
                Some(Value::String(text)) => record.set(spec.field, text.clone()),
                Some(other) => {
                    return Err(format!("property `{}` must be a string, found {other}", spec.name))
                }
            }
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fabvaccine_fields() -> FieldSet {
        FieldSet(vec![
            FieldSpec::new(Field::DeviceId, "deviceId"),
            FieldSpec::new(Field::AssetId, "vaccineId"),
            FieldSpec::new(Field::Type, "type"),
            FieldSpec::new(Field::Value, "value"),
        ])
    }

    #[test]
    fn encode_uses_variant_names_in_declared_order() -> Result<()> {
        let record = Record {
            device_id: "DEV001".to_string(),
            asset_id: "VAC001".to_string(),
            value: "2.5".to_string(),
            ..Record::default()
        };
        let bytes = fabvaccine_fields().encode(&record)?;
        assert_eq!(
            String::from_utf8_lossy(&bytes),
            r#"{"deviceId":"DEV001","vaccineId":"VAC001","type":"","value":"2.5"}"#
        );
        Ok(())
    }

    #[test]
    fn decode_treats_missing_properties_as_empty() -> Result<()> {
        let record = fabvaccine_fields().decode("VAC001", br#"{"vaccineId":"VAC001"}"#)?;
        assert_eq!(record.asset_id, "VAC001");
        assert_eq!(record.device_id, "");
        assert_eq!(record.record_type, "");
        Ok(())
    }

    #[test]
    fn decode_rejects_non_string_properties() {
        let err = match fabvaccine_fields().decode("VAC001", br#"{"value":2.5}"#) {
            Ok(record) => panic!("expected malformed error, decoded {record:?}"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), "malformed_stored_data");
        assert!(err.to_string().contains("`value` must be a string"));
    }

    #[test]
    fn decode_rejects_non_object_payloads() {
        for payload in [&b"[1,2]"[..], &b"\x00"[..], &b"not json"[..]] {
            assert!(matches!(
                fabvaccine_fields().decode("k", payload),
                Err(LedgerError::MalformedStoredData { .. })
            ));
        }
    }

    #[test]
    fn field_names_parse_back() {
        for field in Field::ALL {
            assert_eq!(Field::parse(field.as_str()), Some(field));
        }
        assert_eq!(Field::parse("owner"), None);
    }
}
