//! The parameterized vaccine ledger contract.
//!
//! [`LedgerContract::invoke`] routes a function name through the active
//! [`ContractProfile`] to one operation. Every operation reads through the
//! store, stages its writes into a single [`WriteBatch`] and ends in at most
//! one commit.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vaccine_ledger_core::{
    history_for_key, index_lookup, parse_positional, parse_transient, point_lookup,
    predicate_query, range_prefix_bounds, range_scan, stage_delete, stage_record,
    validate_identifier, ContractProfile, Field, Invocation, InvocationContext, LedgerError,
    LedgerStore, Operation, Partition, PrivateSpec, Record, Result, Selector, TransientInputError,
    TransientMap, WriteBatch,
};
use vaccine_ledger_store_sqlite::{SchemaStatus, SqliteLedgerStore};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

/// Inspect schema status without mutating data.
///
/// # Errors
/// Returns an error when the `SQLite` database cannot be opened or queried.
pub fn schema_status(db_path: &Path) -> anyhow::Result<SchemaStatus> {
    SqliteLedgerStore::open(db_path)?.schema_status()
}

/// Apply pending migrations, or return planned versions for dry-run mode.
///
/// # Errors
/// Returns an error when migration planning or execution fails.
pub fn migrate(db_path: &Path, dry_run: bool) -> anyhow::Result<MigrateResult> {
    let mut store = SqliteLedgerStore::open(db_path)?;
    let before = store.schema_status()?;
    if dry_run {
        return Ok(MigrateResult {
            dry_run: true,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: before.pending_versions,
            after_version: None,
            up_to_date: None,
        });
    }

    store.migrate()?;
    let after = store.schema_status()?;
    Ok(MigrateResult {
        dry_run: false,
        current_version: before.current_version,
        target_version: before.target_version,
        would_apply_versions: before.pending_versions,
        after_version: Some(after.current_version),
        up_to_date: Some(after.pending_versions.is_empty()),
    })
}

pub struct LedgerContract<S> {
    profile: ContractProfile,
    store: S,
}

impl LedgerContract<SqliteLedgerStore> {
    /// Open (and migrate) a SQLite world state and bind `profile` to it.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or migrated, or the
    /// profile is inconsistent.
    pub fn open_sqlite(db_path: &Path, profile: ContractProfile) -> anyhow::Result<Self> {
        let mut store = SqliteLedgerStore::open(db_path)?;
        store.migrate()?;
        Ok(Self::new(profile, store)?)
    }
}

impl<S: LedgerStore> LedgerContract<S> {
    /// # Errors
    /// Returns [`LedgerError::Profile`] when `profile` fails validation.
    pub fn new(profile: ContractProfile, store: S) -> Result<Self> {
        profile.validate()?;
        Ok(Self { profile, store })
    }

    #[must_use]
    pub fn profile(&self) -> &ContractProfile {
        &self.profile
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Dispatch one invocation.
    ///
    /// Writes return the encoded record (or an empty payload for `init_ledger`
    /// and `delete`); reads return the JSON response.
    ///
    /// # Errors
    /// Returns [`LedgerError::InvalidFunction`] for unrouted names,
    /// [`LedgerError::Authorization`] when the gate refuses the caller, and the
    /// operation's own error otherwise. Nothing is committed on error.
    pub fn invoke(
        &mut self,
        function: &str,
        input: Invocation,
        ctx: &InvocationContext<'_>,
    ) -> Result<Vec<u8>> {
        let operation = self
            .profile
            .route(function)
            .cloned()
            .ok_or_else(|| LedgerError::InvalidFunction(function.to_string()))?;

        if let Some(gate) = self.profile.gate.as_ref().filter(|gate| gate.function == function) {
            gate.enforce(ctx.identity)?;
        }

        let result = self.dispatch(function, &operation, input, ctx);
        match &result {
            Ok(payload) => info!(
                profile = %self.profile.name,
                function,
                ?operation,
                tx_id = %ctx.tx.tx_id,
                bytes = payload.len(),
                "invocation succeeded"
            ),
            Err(err) => info!(
                profile = %self.profile.name,
                function,
                tx_id = %ctx.tx.tx_id,
                kind = err.kind(),
                error = %err,
                "invocation failed"
            ),
        }
        result
    }

    fn dispatch(
        &mut self,
        function: &str,
        operation: &Operation,
        input: Invocation,
        ctx: &InvocationContext<'_>,
    ) -> Result<Vec<u8>> {
        match operation {
            Operation::InitLedger => {
                input.args(function, 0).and_then(|args| expect_args(function, args, 0))?;
                self.init_ledger(ctx)
            }
            Operation::Create | Operation::Update => {
                let arity = self.profile.create_args.arity();
                let args = input.args(function, arity)?;
                self.write_public(function, args, ctx)
            }
            Operation::CreatePrivate => {
                let transient = transient_input(input)?;
                self.create_private(&transient, ctx)
            }
            Operation::QueryPrivate => {
                let key = single_arg(function, &input)?;
                let partition = Partition::private(&self.private_spec()?.collection);
                point_lookup(&self.store, &partition, &key)
            }
            Operation::QueryById => {
                let key = single_arg(function, &input)?;
                point_lookup(&self.store, &Partition::World, &key)
            }
            Operation::QueryAll => {
                input.args(function, 0).and_then(|args| expect_args(function, args, 0))?;
                range_scan(&self.store, "", None)
            }
            Operation::QueryByIndex { index } => self.query_by_index(function, index, &input),
            Operation::QueryByKeyPrefix => {
                let asset = single_arg(function, &input)?;
                let prefix = self.profile.codec().asset_prefix(&asset)?;
                let (start, end) = range_prefix_bounds(&prefix)?;
                range_scan(&self.store, &start, Some(&end))
            }
            Operation::QueryByField { field } => {
                let value = single_arg(function, &input)?;
                self.query_by_field(*field, &value)
            }
            Operation::History => {
                let key = single_arg(function, &input)?;
                history_for_key(&self.store, &key)
            }
            Operation::Delete => {
                let key = single_arg(function, &input)?;
                validate_identifier("key", &key)?;
                self.delete(&key, ctx)
            }
        }
    }

    fn init_ledger(&mut self, ctx: &InvocationContext<'_>) -> Result<Vec<u8>> {
        let mut batch = WriteBatch::new();
        let mut staged = BTreeMap::new();
        for seed in &self.profile.seed {
            let mut record = seed.record.clone();
            self.fill_derived(&mut record, ctx)?;
            self.stage_public(&mut batch, &mut staged, record, seed.key.as_deref(), ctx)?;
        }
        let seeded = batch.len();
        self.store.commit(ctx.tx, batch)?;
        info!(
            profile = %self.profile.name,
            records = self.profile.seed.len(),
            mutations = seeded,
            "ledger seeded"
        );
        Ok(Vec::new())
    }

    fn write_public(
        &mut self,
        function: &str,
        args: &[String],
        ctx: &InvocationContext<'_>,
    ) -> Result<Vec<u8>> {
        let input = parse_positional(function, &self.profile.create_args, args)?;
        let mut record = input.record;
        self.fill_derived(&mut record, ctx)?;

        let mut batch = WriteBatch::new();
        let explicit_key = input.explicit_key.as_deref();
        let bytes = self.stage_public(&mut batch, &mut BTreeMap::new(), record, explicit_key, ctx)?;
        self.store.commit(ctx.tx, batch)?;
        Ok(bytes)
    }

    // Stages the primary record and its index entries; returns the payload.
    // `staged` holds records already written earlier in the same batch, which
    // shadow the stored version of their key.
    fn stage_public(
        &self,
        batch: &mut WriteBatch,
        staged: &mut BTreeMap<String, Record>,
        record: Record,
        explicit_key: Option<&str>,
        ctx: &InvocationContext<'_>,
    ) -> Result<Vec<u8>> {
        let key =
            self.profile.codec().primary_key(&record, explicit_key, ctx.tx.timestamp.seconds)?;
        let bytes = self.profile.fields.encode(&record)?;
        let previous = match staged.remove(&key) {
            Some(previous) => Some(previous),
            None => self.previous_record(&key)?,
        };
        let indexes = &self.profile.indexes;
        stage_record(batch, indexes, &key, bytes.clone(), &record, previous.as_ref())?;
        staged.insert(key, record);
        Ok(bytes)
    }

    fn fill_derived(&self, record: &mut Record, ctx: &InvocationContext<'_>) -> Result<()> {
        if self.profile.derive_timestamp && record.timestamp.is_empty() {
            record.set(Field::Timestamp, ctx.tx.timestamp.render_seconds()?);
        }
        Ok(())
    }

    fn create_private(
        &mut self,
        transient: &TransientMap,
        ctx: &InvocationContext<'_>,
    ) -> Result<Vec<u8>> {
        let spec = self.private_spec()?.clone();
        let input = parse_transient(&spec.transient_key, transient, &self.profile.fields)?;
        let partition = Partition::private(&spec.collection);
        if self.store.exists(&partition, &input.key)? {
            return Err(LedgerError::Conflict(format!(
                "{} already exists in {}",
                input.key, spec.collection
            )));
        }

        let bytes = self.profile.fields.encode(&input.record)?;
        let mut batch = WriteBatch::new();
        batch.put(partition, input.key, bytes.clone());
        self.store.commit(ctx.tx, batch)?;
        Ok(bytes)
    }

    fn query_by_index(&self, function: &str, index: &str, input: &Invocation) -> Result<Vec<u8>> {
        let spec = self
            .profile
            .index(index)
            .ok_or_else(|| LedgerError::Profile(format!("unknown index {index}")))?;
        let args = input.args(function, spec.components.len())?;
        expect_args(function, args, spec.components.len())?;
        for (field, value) in spec.components.iter().zip(args) {
            if value.is_empty() {
                return Err(LedgerError::Validation {
                    field: field.as_str().to_string(),
                    reason: "must be a non-empty string".to_string(),
                });
            }
        }
        let leading: Vec<&str> = args.iter().map(String::as_str).collect();
        index_lookup(&self.store, &self.profile.fields, spec, &leading)
    }

    fn query_by_field(&self, field: Field, value: &str) -> Result<Vec<u8>> {
        let name = self.profile.fields.name_of(field).ok_or_else(|| {
            LedgerError::Profile(format!("field {} is not part of the record", field.as_str()))
        })?;
        if value.is_empty() {
            return Err(LedgerError::Validation {
                field: name.to_string(),
                reason: "must be a non-empty string".to_string(),
            });
        }
        predicate_query(&self.store, &Partition::World, &Selector::new().eq(name, value))
    }

    fn delete(&mut self, key: &str, ctx: &InvocationContext<'_>) -> Result<Vec<u8>> {
        let previous = self.previous_record(key)?;
        let mut batch = WriteBatch::new();
        stage_delete(&mut batch, &self.profile.indexes, key, previous.as_ref());
        self.store.commit(ctx.tx, batch)?;
        Ok(Vec::new())
    }

    fn previous_record(&self, key: &str) -> Result<Option<Record>> {
        let Some(bytes) = self.store.get(&Partition::World, key)? else {
            return Ok(None);
        };
        match self.profile.fields.decode(key, &bytes) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(key, error = %err, "previous version unreadable; stale entries kept");
                Ok(None)
            }
        }
    }

    fn private_spec(&self) -> Result<&PrivateSpec> {
        self.profile.private.as_ref().ok_or_else(|| {
            LedgerError::Profile(format!("{} has no private collection", self.profile.name))
        })
    }
}

fn expect_args(function: &str, args: &[String], expected: usize) -> Result<()> {
    vaccine_ledger_core::check_arity(function, args, expected)
}

fn single_arg(function: &str, input: &Invocation) -> Result<String> {
    let args = input.args(function, 1)?;
    expect_args(function, args, 1)?;
    Ok(args[0].clone())
}

// An argument-free public call carries no transient entries.
fn transient_input(input: Invocation) -> Result<TransientMap> {
    match input {
        Invocation::Transient(map) => Ok(map),
        Invocation::Public(args) if args.is_empty() => Ok(TransientMap::new()),
        Invocation::Public(_) => Err(TransientInputError::UnexpectedArguments.into()),
    }
}
