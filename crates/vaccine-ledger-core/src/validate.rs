//! Input validation for positional arguments and the transient channel.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LedgerError, Result, TransientInputError};
use crate::record::{Field, FieldSet, Record};

/// Side-channel payloads keyed by entry name.
pub type TransientMap = BTreeMap<String, Vec<u8>>;

/// Property naming the private storage location inside a transient payload.
pub const TRANSIENT_KEY_FIELD: &str = "key";

/// Input carried by one invocation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Invocation {
    Public(Vec<String>),
    Transient(TransientMap),
}

impl Invocation {
    #[must_use]
    pub fn public<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Public(args.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn none() -> Self {
        Self::Public(Vec::new())
    }

    /// Positional arguments of a public invocation.
    ///
    /// A transient invocation has no positional arguments, so it is rejected
    /// for any function expecting at least one.
    ///
    /// # Errors
    /// Returns [`LedgerError::Arity`] when the invocation is transient and
    /// `expected > 0`.
    pub fn args(&self, function: &str, expected: usize) -> Result<&[String]> {
        match self {
            Self::Public(args) => Ok(args),
            Self::Transient(_) if expected == 0 => Ok(&[]),
            Self::Transient(_) => Err(LedgerError::Arity {
                function: function.to_string(),
                expected,
                actual: 0,
            }),
        }
    }
}

/// What one positional argument supplies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ArgSlot {
    Key,
    Field(Field),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct ArgLayout(pub Vec<ArgSlot>);

impl ArgLayout {
    #[must_use]
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn has_key_slot(&self) -> bool {
        self.0.contains(&ArgSlot::Key)
    }

    #[must_use]
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.0.iter().filter_map(|slot| match slot {
            ArgSlot::Field(field) => Some(*field),
            ArgSlot::Key => None,
        })
    }
}

/// A record parsed from positional arguments.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PositionalInput {
    pub explicit_key: Option<String>,
    pub record: Record,
}

/// A record parsed from the transient channel, with its storage key.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PrivateInput {
    pub key: String,
    pub record: Record,
}

/// # Errors
/// Returns [`LedgerError::Arity`] when `args.len() != expected`.
pub fn check_arity(function: &str, args: &[String], expected: usize) -> Result<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(LedgerError::Arity { function: function.to_string(), expected, actual: args.len() })
    }
}

/// Map positional arguments onto a record according to `layout`.
///
/// # Errors
/// Returns [`LedgerError::Arity`] on an argument count mismatch.
pub fn parse_positional(
    function: &str,
    layout: &ArgLayout,
    args: &[String],
) -> Result<PositionalInput> {
    check_arity(function, args, layout.arity())?;

    let mut input = PositionalInput { explicit_key: None, record: Record::default() };
    for (slot, arg) in layout.0.iter().zip(args) {
        match slot {
            ArgSlot::Key => input.explicit_key = Some(arg.clone()),
            ArgSlot::Field(field) => input.record.set(*field, arg.clone()),
        }
    }
    Ok(input)
}

/// Decode and validate the private record carried under `entry`.
///
/// `key` is checked first, then every field of `fields` in order; the first
/// empty one fails the whole input.
///
/// # Errors
/// Returns [`LedgerError::TransientInput`] when the entry is missing, empty or
/// not a JSON object of strings, and [`LedgerError::Validation`] naming the
/// first empty field.
pub fn parse_transient(
    entry: &str,
    transient: &TransientMap,
    fields: &FieldSet,
) -> Result<PrivateInput> {
    let payload =
        transient.get(entry).ok_or_else(|| TransientInputError::MissingEntry(entry.to_string()))?;
    if payload.is_empty() {
        return Err(TransientInputError::EmptyEntry(entry.to_string()).into());
    }

    let decode_error =
        |reason: String| TransientInputError::Decode { entry: entry.to_string(), reason };
    let value: Value =
        serde_json::from_slice(payload).map_err(|err| decode_error(err.to_string()))?;
    let Value::Object(object) = value else {
        return Err(decode_error("expected a JSON object".to_string()).into());
    };

    let key = match object.get(TRANSIENT_KEY_FIELD) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(key)) => key.clone(),
        Some(other) => {
            let reason = format!("property `key` must be a string, found {other}");
            return Err(decode_error(reason).into());
        }
    };
    let record = fields.from_object(&object).map_err(decode_error)?;

    if key.is_empty() {
        return Err(LedgerError::empty_field(TRANSIENT_KEY_FIELD));
    }
    for spec in fields.specs() {
        if record.get(spec.field).is_empty() {
            return Err(LedgerError::empty_field(&spec.name));
        }
    }

    Ok(PrivateInput { key, record })
}
