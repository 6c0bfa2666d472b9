//! Key codec: primary keys, composite index keys and range-scan bounds.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::record::{Field, Record};

/// Separator of composite key segments; also the leading namespace byte.
pub const COMPOSITE_SEPARATOR: char = '\u{0}';
/// Upper sentinel for partial composite key scans.
pub const MAX_UNICODE_RUNE: char = '\u{10FFFF}';
/// Closes a plain-identifier prefix range.
pub const RANGE_SENTINEL: char = '~';
/// Joins an asset id with its creation seconds.
pub const VERSION_SEPARATOR: char = '_';

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// One version per asset, keyed by `assetId`.
    AssetId,
    /// One version per device, keyed by `deviceId`.
    DeviceId,
    /// One key per write: `assetId + "_" + creation seconds`.
    AssetTimestamp,
    /// Key supplied by the caller and not stored in the record.
    Explicit,
}

impl KeyStrategy {
    /// Record field the key is derived from, if any.
    #[must_use]
    pub fn source_field(self) -> Option<Field> {
        match self {
            Self::AssetId | Self::AssetTimestamp => Some(Field::AssetId),
            Self::DeviceId => Some(Field::DeviceId),
            Self::Explicit => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct KeyCodec {
    strategy: KeyStrategy,
}

impl KeyCodec {
    #[must_use]
    pub fn new(strategy: KeyStrategy) -> Self {
        Self { strategy }
    }

    #[must_use]
    pub fn strategy(self) -> KeyStrategy {
        self.strategy
    }

    /// Derive the primary key of `record`.
    ///
    /// `explicit_key` is consulted only by [`KeyStrategy::Explicit`];
    /// `created_at_seconds` only by [`KeyStrategy::AssetTimestamp`].
    ///
    /// # Errors
    /// Returns [`LedgerError::InvalidKey`] or [`LedgerError::Validation`] when
    /// the key source is missing or not a valid identifier.
    pub fn primary_key(
        self,
        record: &Record,
        explicit_key: Option<&str>,
        created_at_seconds: i64,
    ) -> Result<String> {
        match self.strategy {
            KeyStrategy::Explicit => {
                let key = explicit_key.ok_or_else(|| LedgerError::empty_field("key"))?;
                validate_identifier("key", key)?;
                Ok(key.to_string())
            }
            KeyStrategy::AssetId => identifier_key(record, Field::AssetId),
            KeyStrategy::DeviceId => identifier_key(record, Field::DeviceId),
            KeyStrategy::AssetTimestamp => {
                let id = record.get(Field::AssetId);
                validate_identifier(Field::AssetId.as_str(), id)?;
                Ok(format!("{id}{VERSION_SEPARATOR}{created_at_seconds}"))
            }
        }
    }

    /// Prefix shared by every key written for `asset`.
    ///
    /// # Errors
    /// Returns [`LedgerError::InvalidKey`] when `asset` is not a valid identifier.
    pub fn asset_prefix(self, asset: &str) -> Result<String> {
        validate_identifier("prefix", asset)?;
        Ok(match self.strategy {
            KeyStrategy::AssetTimestamp => format!("{asset}{VERSION_SEPARATOR}"),
            _ => asset.to_string(),
        })
    }
}

fn identifier_key(record: &Record, field: Field) -> Result<String> {
    let id = record.get(field);
    validate_identifier(field.as_str(), id)?;
    Ok(id.to_string())
}

/// Check that `value` can appear in a primary key and in a prefix range.
///
/// Identifiers are non-empty printable ASCII without `~`, so that
/// `value + "~"` sorts after every key sharing the prefix.
///
/// # Errors
/// Returns [`LedgerError::Validation`] when empty, [`LedgerError::InvalidKey`]
/// when it contains a disallowed character.
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(LedgerError::empty_field(field));
    }
    if let Some(bad) = value.chars().find(|c| !c.is_ascii_graphic() || *c == RANGE_SENTINEL) {
        return Err(LedgerError::InvalidKey {
            key: value.to_string(),
            reason: format!("identifiers must be printable ASCII without `~`, found {bad:?}"),
        });
    }
    Ok(())
}

/// `[prefix, prefix + "~")` covering every identifier key that starts with `prefix`.
///
/// # Errors
/// Returns [`LedgerError::InvalidKey`] when `prefix` contains `~` or other
/// characters outside the identifier alphabet.
pub fn range_prefix_bounds(prefix: &str) -> Result<(String, String)> {
    if let Some(bad) = prefix.chars().find(|c| !c.is_ascii_graphic() || *c == RANGE_SENTINEL) {
        return Err(LedgerError::InvalidKey {
            key: prefix.to_string(),
            reason: format!("range prefixes must not contain {bad:?}"),
        });
    }
    Ok((prefix.to_string(), format!("{prefix}{RANGE_SENTINEL}")))
}

/// Composite keys live in their own namespace, ahead of every identifier.
#[must_use]
pub fn is_composite_key(key: &str) -> bool {
    key.starts_with(COMPOSITE_SEPARATOR)
}

/// Join an index name and its ordered component values.
///
/// # Errors
/// Returns [`LedgerError::InvalidKey`] when the name is empty or any segment
/// contains the separator or the upper sentinel.
pub fn composite_key<S: AsRef<str>>(index_name: &str, components: &[S]) -> Result<String> {
    if index_name.is_empty() {
        return Err(LedgerError::InvalidKey {
            key: String::new(),
            reason: "index name must be non-empty".to_string(),
        });
    }
    let mut key = String::with_capacity(index_name.len() + 2);
    key.push(COMPOSITE_SEPARATOR);
    push_segment(&mut key, index_name)?;
    for component in components {
        push_segment(&mut key, component.as_ref())?;
    }
    Ok(key)
}

fn push_segment(key: &mut String, segment: &str) -> Result<()> {
    if segment.contains(COMPOSITE_SEPARATOR) || segment.contains(MAX_UNICODE_RUNE) {
        return Err(LedgerError::InvalidKey {
            key: segment.to_string(),
            reason: "composite key segments must not contain U+0000 or U+10FFFF".to_string(),
        });
    }
    key.push_str(segment);
    key.push(COMPOSITE_SEPARATOR);
    Ok(())
}

/// Range covering every composite key of `index_name` whose leading
/// components equal `components`.
///
/// # Errors
/// See [`composite_key`].
pub fn partial_composite_bounds<S: AsRef<str>>(
    index_name: &str,
    components: &[S],
) -> Result<(String, String)> {
    let start = composite_key(index_name, components)?;
    let end = format!("{start}{MAX_UNICODE_RUNE}");
    Ok((start, end))
}

/// Inverse of [`composite_key`].
///
/// # Errors
/// Returns [`LedgerError::InvalidKey`] when `key` is not a composite key.
pub fn split_composite_key(key: &str) -> Result<(String, Vec<String>)> {
    let invalid = || LedgerError::InvalidKey {
        key: key.replace(COMPOSITE_SEPARATOR, "\\0"),
        reason: "not a composite key".to_string(),
    };
    let body = key
        .strip_prefix(COMPOSITE_SEPARATOR)
        .and_then(|rest| rest.strip_suffix(COMPOSITE_SEPARATOR))
        .ok_or_else(invalid)?;
    let mut segments = body.split(COMPOSITE_SEPARATOR).map(str::to_string);
    let name = segments.next().filter(|name| !name.is_empty()).ok_or_else(invalid)?;
    Ok((name, segments.collect()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    fn vaccine(asset: &str, device: &str) -> Record {
        Record {
            asset_id: asset.to_string(),
            device_id: device.to_string(),
            ..Record::default()
        }
    }

    #[test]
    fn primary_key_follows_strategy() -> Result<()> {
        let record = vaccine("VAC001", "DEV001");
        assert_eq!(KeyCodec::new(KeyStrategy::AssetId).primary_key(&record, None, 0)?, "VAC001");
        assert_eq!(KeyCodec::new(KeyStrategy::DeviceId).primary_key(&record, None, 0)?, "DEV001");
        assert_eq!(
            KeyCodec::new(KeyStrategy::AssetTimestamp).primary_key(&record, None, 1_719_828_000)?,
            "VAC001_1719828000"
        );
        assert_eq!(
            KeyCodec::new(KeyStrategy::Explicit).primary_key(&record, Some("LOG0"), 0)?,
            "LOG0"
        );

        let no_device = vaccine("VAC001", "");
        assert_eq!(
            KeyCodec::new(KeyStrategy::DeviceId).primary_key(&no_device, None, 0),
            Err(LedgerError::empty_field("deviceId"))
        );
        Ok(())
    }

    #[test]
    fn primary_key_rejects_missing_or_tilde_identifiers() {
        let codec = KeyCodec::new(KeyStrategy::AssetId);
        assert!(matches!(
            codec.primary_key(&vaccine("", "DEV001"), None, 0),
            Err(LedgerError::Validation { field, .. }) if field == "assetId"
        ));
        assert!(matches!(
            codec.primary_key(&vaccine("VAC~1", "DEV001"), None, 0),
            Err(LedgerError::InvalidKey { .. })
        ));
        assert!(matches!(
            KeyCodec::new(KeyStrategy::Explicit).primary_key(&vaccine("VAC1", "D"), None, 0),
            Err(LedgerError::Validation { field, .. }) if field == "key"
        ));
    }

    #[test]
    fn asset_prefix_includes_separator_for_versioned_keys() -> Result<()> {
        assert_eq!(KeyCodec::new(KeyStrategy::AssetTimestamp).asset_prefix("VAC001")?, "VAC001_");
        assert_eq!(KeyCodec::new(KeyStrategy::AssetId).asset_prefix("VAC")?, "VAC");
        Ok(())
    }

    #[test]
    fn composite_key_matches_platform_layout() -> Result<()> {
        let key = composite_key("owner~key", &["Normal", "VAC001"])?;
        assert_eq!(key, "\u{0}owner~key\u{0}Normal\u{0}VAC001\u{0}");
        assert!(is_composite_key(&key));
        let (name, components) = split_composite_key(&key)?;
        assert_eq!(name, "owner~key");
        assert_eq!(components, vec!["Normal".to_string(), "VAC001".to_string()]);
        Ok(())
    }

    #[test]
    fn composite_key_rejects_separator_in_components() {
        assert!(composite_key("owner~key", &["a\u{0}b"]).is_err());
        assert!(composite_key("owner~key", &["\u{10FFFF}"]).is_err());
        assert!(composite_key::<&str>("", &[]).is_err());
        assert!(split_composite_key("VAC001").is_err());
    }

    #[test]
    fn partial_bounds_cover_only_matching_components() -> Result<()> {
        let (start, end) = partial_composite_bounds("owner~key", &["Normal"])?;
        let normal = composite_key("owner~key", &["Normal", "VAC001"])?;
        let normalized = composite_key("owner~key", &["Normalized", "VAC002"])?;
        let alert = composite_key("owner~key", &["Alert", "VAC003"])?;
        assert!(start <= normal && normal < end);
        assert!(!(start <= normalized && normalized < end));
        assert!(!(start <= alert && alert < end));
        Ok(())
    }

    #[test]
    fn range_prefix_bounds_rejects_tilde() {
        assert!(matches!(range_prefix_bounds("VAC~"), Err(LedgerError::InvalidKey { .. })));
    }

    fn identifier() -> impl Strategy<Value = String> {
        "[!-}]{0,6}"
    }

    proptest! {
        #[test]
        fn property_prefix_range_contains_exactly_prefixed_keys(
            prefix in identifier(),
            keys in proptest::collection::btree_set("[!-}]{0,8}", 0..40),
        ) {
            let (start, end) = match range_prefix_bounds(&prefix) {
                Ok(bounds) => bounds,
                Err(err) => panic!("identifier alphabet must be accepted: {err}"),
            };
            let keys: BTreeSet<String> = keys;
            let scanned: BTreeSet<&String> = keys.range(start..end).collect();
            for key in &keys {
                prop_assert_eq!(scanned.contains(key), key.starts_with(&prefix));
            }
        }

        #[test]
        fn property_composite_key_round_trips_components(
            name in "[a-z~]{1,10}",
            components in proptest::collection::vec("[ -~]{0,8}", 0..4),
        ) {
            let key = match composite_key(&name, &components) {
                Ok(key) => key,
                Err(err) => panic!("printable components must be accepted: {err}"),
            };
            let (decoded_name, decoded) = match split_composite_key(&key) {
                Ok(parts) => parts,
                Err(err) => panic!("composite key must split: {err}"),
            };
            prop_assert_eq!(decoded_name, name);
            prop_assert_eq!(decoded, components);
        }
    }
}
