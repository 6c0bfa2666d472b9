use thiserror::Error;

/// Failures decoding the transient (private) input channel.
///
/// These are shape errors about the side channel itself and are kept apart
/// from field-level [`LedgerError::Validation`] failures.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum TransientInputError {
    #[error("{0} must be a key in the transient map")]
    MissingEntry(String),
    #[error("{0} value in the transient map must be a non-empty JSON string")]
    EmptyEntry(String),
    #[error("failed to decode transient {entry} as a JSON object: {reason}")]
    Decode { entry: String, reason: String },
    #[error("incorrect number of arguments: private data must be passed in the transient map")]
    UnexpectedArguments,
}

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum LedgerError {
    #[error("incorrect number of arguments for {function}: expecting {expected}, got {actual}")]
    Arity { function: String, expected: usize, actual: usize },
    #[error("{field} field {reason}")]
    Validation { field: String, reason: String },
    #[error("invalid key `{key}`: {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("record does not exist: {0}")]
    NotFound(String),
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("access denied: {0}")]
    Authorization(String),
    #[error("malformed stored data under `{key}`: {reason}")]
    MalformedStoredData { key: String, reason: String },
    #[error(transparent)]
    TransientInput(#[from] TransientInputError),
    #[error("invalid function name: {0}")]
    InvalidFunction(String),
    #[error("invalid contract profile: {0}")]
    Profile(String),
    #[error("invalid transaction timestamp: {0}")]
    Timestamp(String),
}

impl LedgerError {
    /// Stable machine-readable classification of the error.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Arity { .. } => "arity",
            Self::Validation { .. } => "validation",
            Self::InvalidKey { .. } => "invalid_key",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Store(_) => "store",
            Self::Authorization(_) => "authorization",
            Self::MalformedStoredData { .. } => "malformed_stored_data",
            Self::TransientInput(_) => "transient_input",
            Self::InvalidFunction(_) => "invalid_function",
            Self::Profile(_) => "profile",
            Self::Timestamp(_) => "timestamp",
        }
    }

    pub(crate) fn empty_field(field: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: "must be a non-empty string".to_string(),
        }
    }

    pub(crate) fn malformed(key: &str, reason: impl Into<String>) -> Self {
        Self::MalformedStoredData { key: key.to_string(), reason: reason.into() }
    }
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;
