pub mod access;
pub mod error;
pub mod history;
pub mod index;
pub mod keys;
pub mod profile;
pub mod query;
pub mod record;
pub mod store;
pub mod validate;

#[cfg(test)]
mod test_support;

pub use access::{check_attribute, AccessDecision, AttributeIdentity, GateSpec, IdentityContext};
pub use error::{LedgerError, Result, TransientInputError};
pub use history::history_for_key;
pub use index::{stage_delete, stage_record, IndexSpec, INDEX_SENTINEL};
pub use keys::{
    composite_key, is_composite_key, partial_composite_bounds, range_prefix_bounds,
    split_composite_key, validate_identifier, KeyCodec, KeyStrategy,
};
pub use profile::{ContractProfile, Operation, PrivateSpec, Route, SeedRecord, BUILTIN_PROFILES};
pub use query::{
    index_lookup, parse_native_selector, point_lookup, predicate_query, range_scan, Selector,
};
pub use record::{Field, FieldSet, FieldSpec, Record};
pub use store::{
    HistoryEntry, LedgerStore, Mutation, Partition, TxMeta, TxTimestamp, WriteBatch,
};
pub use validate::{
    check_arity, parse_positional, parse_transient, ArgLayout, ArgSlot, Invocation,
    PositionalInput, PrivateInput, TransientMap, TRANSIENT_KEY_FIELD,
};

/// Everything the host supplies alongside one invocation.
#[derive(Clone, Copy)]
pub struct InvocationContext<'a> {
    pub tx: &'a TxMeta,
    pub identity: &'a dyn IdentityContext,
}

impl<'a> InvocationContext<'a> {
    #[must_use]
    pub fn new(tx: &'a TxMeta, identity: &'a dyn IdentityContext) -> Self {
        Self { tx, identity }
    }
}
