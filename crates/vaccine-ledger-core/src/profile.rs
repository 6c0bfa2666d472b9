//! Contract profiles.
//!
//! One parameterized contract serves every deployment; a profile fixes the
//! key strategy, record layout, index policy, routing table, access gate and
//! private collection for one of them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::access::GateSpec;
use crate::error::{LedgerError, Result};
use crate::index::IndexSpec;
use crate::keys::{KeyCodec, KeyStrategy};
use crate::record::{Field, FieldSet, FieldSpec, Record};
use crate::validate::{ArgLayout, ArgSlot, TRANSIENT_KEY_FIELD};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    InitLedger,
    Create,
    Update,
    CreatePrivate,
    QueryPrivate,
    QueryById,
    QueryAll,
    QueryByIndex { index: String },
    QueryByKeyPrefix,
    QueryByField { field: Field },
    History,
    Delete,
}

impl Operation {
    #[must_use]
    pub fn uses_private_collection(&self) -> bool {
        matches!(self, Self::CreatePrivate | Self::QueryPrivate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Route {
    pub function: String,
    pub operation: Operation,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PrivateSpec {
    pub collection: String,
    pub transient_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SeedRecord {
    #[serde(default)]
    pub key: Option<String>,
    pub record: Record,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ContractProfile {
    pub name: String,
    pub key_strategy: KeyStrategy,
    pub fields: FieldSet,
    pub create_args: ArgLayout,
    /// Fill `timestamp` from the transaction timestamp instead of an argument.
    #[serde(default)]
    pub derive_timestamp: bool,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    pub routes: Vec<Route>,
    #[serde(default)]
    pub gate: Option<GateSpec>,
    #[serde(default)]
    pub private: Option<PrivateSpec>,
    #[serde(default)]
    pub seed: Vec<SeedRecord>,
}

pub const BUILTIN_PROFILES: [&str; 4] =
    ["fabvaccine", "vaccine-api", "vaccine-log", "vaccine-telemetry"];

impl ContractProfile {
    #[must_use]
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "fabvaccine" => Some(fabvaccine()),
            "vaccine-api" => Some(vaccine_api()),
            "vaccine-log" => Some(vaccine_log()),
            "vaccine-telemetry" => Some(vaccine_telemetry()),
            _ => None,
        }
    }

    #[must_use]
    pub fn codec(&self) -> KeyCodec {
        KeyCodec::new(self.key_strategy)
    }

    #[must_use]
    pub fn route(&self, function: &str) -> Option<&Operation> {
        self.routes.iter().find(|route| route.function == function).map(|route| &route.operation)
    }

    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|spec| spec.name == name)
    }

    /// Check internal consistency before the profile serves invocations.
    ///
    /// # Errors
    /// Returns [`LedgerError::Profile`] describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(LedgerError::Profile(format!("{}: {message}", self.name)));

        if self.name.trim().is_empty() {
            return Err(LedgerError::Profile("profile name must be non-empty".to_string()));
        }
        if self.fields.specs().is_empty() {
            return fail("field set must be non-empty".to_string());
        }
        let mut names = BTreeSet::new();
        let mut seen_fields = BTreeSet::new();
        for spec in self.fields.specs() {
            if spec.name.is_empty() || spec.name == TRANSIENT_KEY_FIELD {
                return fail(format!("invalid wire name {:?}", spec.name));
            }
            if !names.insert(spec.name.as_str()) || !seen_fields.insert(spec.field) {
                return fail(format!("field {} is declared twice", spec.name));
            }
        }

        for field in self.create_args.fields() {
            if !self.fields.contains(field) {
                return fail(format!("argument field {} is not in the field set", field.as_str()));
            }
        }
        match self.key_strategy.source_field() {
            None if !self.create_args.has_key_slot() => {
                return fail("explicit keys need a `key` argument slot".to_string());
            }
            Some(_) if self.create_args.has_key_slot() => {
                return fail("a `key` argument slot requires the explicit key strategy".to_string());
            }
            Some(source) if !self.create_args.fields().any(|field| field == source) => {
                return fail(format!("key source {} is not a create argument", source.as_str()));
            }
            _ => {}
        }
        if self.derive_timestamp
            && (!self.fields.contains(Field::Timestamp)
                || self.create_args.fields().any(|field| field == Field::Timestamp))
        {
            return fail(
                "derived timestamps need a timestamp field that is not an argument".to_string(),
            );
        }

        let mut index_names = BTreeSet::new();
        for spec in &self.indexes {
            if spec.name.is_empty() || !index_names.insert(spec.name.as_str()) {
                return fail(format!("index name {:?} is empty or duplicated", spec.name));
            }
            if let Some(field) =
                spec.components.iter().find(|field| !self.fields.contains(**field))
            {
                return fail(format!("index {} uses unknown field {}", spec.name, field.as_str()));
            }
        }

        let mut functions = BTreeSet::new();
        for route in &self.routes {
            if !functions.insert(route.function.as_str()) {
                return fail(format!("function {} is routed twice", route.function));
            }
            match &route.operation {
                Operation::QueryByIndex { index } if self.index(index).is_none() => {
                    return fail(format!("{} references unknown index {index}", route.function));
                }
                Operation::QueryByField { field } if !self.fields.contains(*field) => {
                    return fail(format!(
                        "{} queries unknown field {}",
                        route.function,
                        field.as_str()
                    ));
                }
                operation if operation.uses_private_collection() && self.private.is_none() => {
                    return fail(format!("{} needs a private collection", route.function));
                }
                _ => {}
            }
        }

        if let Some(gate) = &self.gate {
            if self.route(&gate.function).is_none() {
                return fail(format!("gate protects unknown function {}", gate.function));
            }
        }
        if self.key_strategy == KeyStrategy::Explicit
            && self.seed.iter().any(|seed| seed.key.is_none())
        {
            return fail("seed records need explicit keys".to_string());
        }
        Ok(())
    }
}

fn route(function: &str, operation: Operation) -> Route {
    Route { function: function.to_string(), operation }
}

fn fields(specs: &[(Field, &str)]) -> FieldSet {
    FieldSet(specs.iter().map(|(field, name)| FieldSpec::new(*field, name)).collect())
}

fn fabvaccine() -> ContractProfile {
    let layout = [
        (Field::DeviceId, "deviceId"),
        (Field::AssetId, "vaccineId"),
        (Field::Type, "type"),
        (Field::Value, "value"),
        (Field::Unit, "unit"),
        (Field::Timestamp, "timestamp"),
        (Field::Status, "status"),
    ];
    let samples = [
        ("DEV001", "VAC001", "2.5", "2024-07-01T10:00:00"),
        ("DEV002", "VAC002", "3.0", "2024-07-02T11:00:00"),
        ("DEV003", "VAC003", "4.0", "2024-07-03T12:00:00"),
        ("DEV004", "VAC004", "2.0", "2024-07-04T13:00:00"),
        ("DEV005", "VAC005", "5.0", "2024-07-05T14:00:00"),
        ("DEV006", "VAC006", "1.5", "2024-07-06T15:00:00"),
        ("DEV007", "VAC007", "3.5", "2024-07-07T16:00:00"),
        ("DEV008", "VAC008", "2.8", "2024-07-08T17:00:00"),
        ("DEV009", "VAC009", "3.2", "2024-07-09T18:00:00"),
        ("DEV010", "VAC010", "4.5", "2024-07-10T19:00:00"),
    ];

    ContractProfile {
        name: "fabvaccine".to_string(),
        key_strategy: KeyStrategy::AssetId,
        fields: fields(&layout),
        create_args: ArgLayout(layout.iter().map(|(field, _)| ArgSlot::Field(*field)).collect()),
        derive_timestamp: false,
        indexes: vec![IndexSpec::new("owner~key", vec![Field::Status])],
        routes: vec![
            route("initLedger", Operation::InitLedger),
            route("createVaccine", Operation::Create),
            route("updateVaccine", Operation::Update),
            route("deleteVaccine", Operation::Delete),
            route("createPrivateVaccine", Operation::CreatePrivate),
            route("queryPrivateVaccine", Operation::QueryPrivate),
            route("queryVaccine", Operation::QueryById),
            route("queryAllVaccines", Operation::QueryAll),
            route(
                "queryVaccinesByStatus",
                Operation::QueryByIndex { index: "owner~key".to_string() },
            ),
            route("getHistoryForAsset", Operation::History),
            route("restrictedMethod", Operation::QueryById),
        ],
        gate: Some(GateSpec {
            function: "restrictedMethod".to_string(),
            attribute: "role".to_string(),
            required_value: "approver".to_string(),
        }),
        private: Some(PrivateSpec {
            collection: "collectionVaccines".to_string(),
            transient_key: "vaccine".to_string(),
        }),
        seed: samples
            .iter()
            .map(|(device, vaccine, value, timestamp)| SeedRecord {
                key: None,
                record: Record {
                    device_id: (*device).to_string(),
                    asset_id: (*vaccine).to_string(),
                    record_type: "Temperature".to_string(),
                    value: (*value).to_string(),
                    unit: "°C".to_string(),
                    timestamp: (*timestamp).to_string(),
                    status: "Normal".to_string(),
                },
            })
            .collect(),
    }
}

fn vaccine_api() -> ContractProfile {
    let seed = [("VAC1", "DEV1", "75.5"), ("VAC2", "DEV2", "80.2"), ("VAC3", "DEV3", "65.7")];
    ContractProfile {
        name: "vaccine-api".to_string(),
        key_strategy: KeyStrategy::AssetId,
        fields: fields(&[
            (Field::AssetId, "vaccine_id"),
            (Field::DeviceId, "device_id"),
            (Field::Value, "value"),
        ]),
        create_args: ArgLayout(vec![
            ArgSlot::Field(Field::AssetId),
            ArgSlot::Field(Field::DeviceId),
            ArgSlot::Field(Field::Value),
        ]),
        derive_timestamp: false,
        indexes: Vec::new(),
        routes: vec![
            route("InitLedger", Operation::InitLedger),
            route("AddVaccineData", Operation::Create),
            route("QueryVaccineData", Operation::QueryById),
            route("QueryAllVaccineData", Operation::QueryAll),
            route("getHistoryForAsset", Operation::History),
        ],
        gate: None,
        private: None,
        seed: seed
            .iter()
            .map(|(vaccine, device, value)| SeedRecord {
                key: None,
                record: Record {
                    asset_id: (*vaccine).to_string(),
                    device_id: (*device).to_string(),
                    value: (*value).to_string(),
                    ..Record::default()
                },
            })
            .collect(),
    }
}

fn vaccine_log() -> ContractProfile {
    let seed = [("LOG0", "Sample Log 1", "VAC123456"), ("LOG1", "Sample Log 2", "VAC123457")];
    ContractProfile {
        name: "vaccine-log".to_string(),
        key_strategy: KeyStrategy::Explicit,
        fields: fields(&[
            (Field::Value, "value"),
            (Field::Timestamp, "timestamp"),
            (Field::AssetId, "idvacxin"),
        ]),
        create_args: ArgLayout(vec![
            ArgSlot::Key,
            ArgSlot::Field(Field::Value),
            ArgSlot::Field(Field::AssetId),
        ]),
        derive_timestamp: true,
        indexes: Vec::new(),
        routes: vec![
            route("InitLedger", Operation::InitLedger),
            route("CreateLog", Operation::Create),
            route("ReadLog", Operation::QueryById),
            route("QueryLogsByVacxinID", Operation::QueryByField { field: Field::AssetId }),
            route("UpdateLog", Operation::Update),
            route("DeleteLog", Operation::Delete),
            route("getHistoryForAsset", Operation::History),
        ],
        gate: None,
        private: None,
        seed: seed
            .iter()
            .map(|(key, value, vaccine)| SeedRecord {
                key: Some((*key).to_string()),
                record: Record {
                    value: (*value).to_string(),
                    asset_id: (*vaccine).to_string(),
                    ..Record::default()
                },
            })
            .collect(),
    }
}

fn vaccine_telemetry() -> ContractProfile {
    let seed = [("VAC001", "DEV001", "2.5"), ("VAC002", "DEV002", "3.0")];
    ContractProfile {
        name: "vaccine-telemetry".to_string(),
        key_strategy: KeyStrategy::AssetTimestamp,
        fields: fields(&[
            (Field::DeviceId, "deviceId"),
            (Field::AssetId, "vaccineId"),
            (Field::Value, "value"),
            (Field::Unit, "unit"),
            (Field::Timestamp, "timestamp"),
        ]),
        create_args: ArgLayout(vec![
            ArgSlot::Field(Field::AssetId),
            ArgSlot::Field(Field::DeviceId),
            ArgSlot::Field(Field::Value),
            ArgSlot::Field(Field::Unit),
        ]),
        derive_timestamp: true,
        indexes: Vec::new(),
        routes: vec![
            route("initLedger", Operation::InitLedger),
            route("recordReading", Operation::Create),
            route("queryReading", Operation::QueryById),
            route("queryReadingsByVaccine", Operation::QueryByKeyPrefix),
            route("queryReadingsByDevice", Operation::QueryByField { field: Field::DeviceId }),
            route("queryAllReadings", Operation::QueryAll),
            route("deleteReading", Operation::Delete),
            route("getHistoryForAsset", Operation::History),
        ],
        gate: None,
        private: None,
        seed: seed
            .iter()
            .map(|(vaccine, device, value)| SeedRecord {
                key: None,
                record: Record {
                    asset_id: (*vaccine).to_string(),
                    device_id: (*device).to_string(),
                    value: (*value).to_string(),
                    unit: "°C".to_string(),
                    ..Record::default()
                },
            })
            .collect(),
    }
}
