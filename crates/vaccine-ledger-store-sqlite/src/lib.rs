use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;
use vaccine_ledger_core::{
    parse_native_selector, HistoryEntry, LedgerError, LedgerStore, Mutation, Partition, TxMeta,
    TxTimestamp, WriteBatch,
};

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS transactions (
  tx_id TEXT PRIMARY KEY,
  ts_seconds INTEGER NOT NULL,
  ts_nanos INTEGER NOT NULL CHECK (ts_nanos >= 0 AND ts_nanos < 1000000000),
  mutation_count INTEGER NOT NULL CHECK (mutation_count >= 0),
  committed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS world_state (
  partition TEXT NOT NULL,
  state_key BLOB NOT NULL,
  value BLOB NOT NULL,
  tx_id TEXT NOT NULL,
  PRIMARY KEY (partition, state_key),
  FOREIGN KEY (tx_id) REFERENCES transactions(tx_id)
);

CREATE TABLE IF NOT EXISTS state_history (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  partition TEXT NOT NULL,
  state_key BLOB NOT NULL,
  tx_id TEXT NOT NULL,
  value BLOB,
  is_delete INTEGER NOT NULL CHECK (is_delete IN (0, 1)),
  ts_seconds INTEGER NOT NULL,
  ts_nanos INTEGER NOT NULL,
  CHECK ((is_delete = 1 AND value IS NULL) OR (is_delete = 0 AND value IS NOT NULL)),
  FOREIGN KEY (tx_id) REFERENCES transactions(tx_id)
);

CREATE INDEX IF NOT EXISTS idx_state_history_key ON state_history(partition, state_key, seq);
";

/// Local world state: versioned key-value partitions plus an append-only
/// mutation log.
pub struct SqliteLedgerStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

impl SqliteLedgerStore {
    /// Open a SQLite-backed ledger store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 {
            let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
            version = 1;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }
        Ok(())
    }

    fn read_value(&self, partition: &Partition, key: &str) -> Result<Option<Vec<u8>>> {
        self.conn
            .query_row(
                "SELECT value FROM world_state WHERE partition = ?1 AND state_key = ?2",
                params![partition.label(), key.as_bytes()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .with_context(|| format!("failed to read {key:?} from {partition}"))
    }

    fn read_range(
        &self,
        partition: &Partition,
        start: &str,
        end: Option<&str>,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT state_key, value FROM world_state
                 WHERE partition = ?1 AND state_key >= ?2 AND (?3 IS NULL OR state_key < ?3)
                 ORDER BY state_key ASC",
            )
            .context("failed to prepare range scan")?;
        let mut rows = stmt
            .query(params![partition.label(), start.as_bytes(), end.map(str::as_bytes)])
            .context("failed to run range scan")?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            hits.push((decode_key(row.get(0)?)?, row.get(1)?));
        }
        Ok(hits)
    }

    fn read_selector(&self, partition: &Partition, native: &str) -> Result<Vec<(String, Vec<u8>)>> {
        if !partition.is_world() {
            return Err(anyhow!("rich queries are not supported on {partition}"));
        }
        let selector = parse_native_selector(native).map_err(|err| anyhow!("{err}"))?;

        // Rows that are not JSON (index sentinels, corrupt payloads) never match,
        // and only string-typed properties are compared.
        let mut sql = String::from("SELECT state_key, value FROM world_state WHERE partition = ?1");
        let mut values: Vec<String> = vec![partition.label()];
        for (property, expected) in selector.clauses() {
            let path = values.len() + 1;
            sql.push_str(&format!(
                " AND CASE WHEN json_valid(CAST(value AS TEXT)) \
                 THEN CASE WHEN json_type(CAST(value AS TEXT), ?{path}) = 'text' \
                 THEN json_extract(CAST(value AS TEXT), ?{path}) END END = ?{}",
                path + 1
            ));
            values.push(format!("$.\"{property}\""));
            values.push(expected.clone());
        }
        sql.push_str(" ORDER BY state_key ASC");

        let mut stmt = self.conn.prepare(&sql).context("failed to prepare selector query")?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(values.iter()))
            .context("failed to run selector query")?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            hits.push((decode_key(row.get(0)?)?, row.get(1)?));
        }
        Ok(hits)
    }

    fn read_history(&self, key: &str) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT tx_id, value, is_delete, ts_seconds, ts_nanos FROM state_history
                 WHERE partition = ?1 AND state_key = ?2
                 ORDER BY seq ASC",
            )
            .context("failed to prepare history query")?;
        let mut rows = stmt
            .query(params![Partition::World.label(), key.as_bytes()])
            .with_context(|| format!("failed to read history of {key:?}"))?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let is_delete: i64 = row.get(2)?;
            let seconds: i64 = row.get(3)?;
            let nanos: i32 = row.get(4)?;
            entries.push(HistoryEntry {
                tx_id: row.get(0)?,
                value: row.get(1)?,
                timestamp: TxTimestamp::new(seconds, nanos).map_err(|err| anyhow!("{err}"))?,
                is_delete: is_delete == 1,
            });
        }
        Ok(entries)
    }

    fn apply(&mut self, meta: &TxMeta, batch: &WriteBatch) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start transaction")?;

        tx.execute(
            "INSERT INTO transactions(tx_id, ts_seconds, ts_nanos, mutation_count, committed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                meta.tx_id,
                meta.timestamp.seconds,
                meta.timestamp.nanos,
                i64::try_from(batch.len()).context("batch too large")?,
                now_rfc3339()?,
            ],
        )
        .with_context(|| format!("failed to record transaction {}", meta.tx_id))?;

        for mutation in batch.mutations() {
            let (partition, key, value) = match mutation {
                Mutation::Put { partition, key, value } => {
                    tx.execute(
                        "INSERT INTO world_state(partition, state_key, value, tx_id)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(partition, state_key)
                         DO UPDATE SET value = excluded.value, tx_id = excluded.tx_id",
                        params![partition.label(), key.as_bytes(), value, meta.tx_id],
                    )
                    .with_context(|| format!("failed to put {key:?} into {partition}"))?;
                    (partition, key, Some(value))
                }
                Mutation::Delete { partition, key } => {
                    tx.execute(
                        "DELETE FROM world_state WHERE partition = ?1 AND state_key = ?2",
                        params![partition.label(), key.as_bytes()],
                    )
                    .with_context(|| format!("failed to delete {key:?} from {partition}"))?;
                    (partition, key, None)
                }
            };

            tx.execute(
                "INSERT INTO state_history(
                    partition, state_key, tx_id, value, is_delete, ts_seconds, ts_nanos
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    partition.label(),
                    key.as_bytes(),
                    meta.tx_id,
                    value,
                    i64::from(value.is_none()),
                    meta.timestamp.seconds,
                    meta.timestamp.nanos,
                ],
            )
            .with_context(|| format!("failed to append history for {key:?}"))?;
        }

        tx.commit().context("failed to commit write transaction")?;
        debug!(tx_id = %meta.tx_id, mutations = batch.len(), "committed write batch");
        Ok(())
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn get(
        &self,
        partition: &Partition,
        key: &str,
    ) -> vaccine_ledger_core::Result<Option<Vec<u8>>> {
        self.read_value(partition, key).map_err(store_error)
    }

    fn scan_range(
        &self,
        partition: &Partition,
        start: &str,
        end: Option<&str>,
    ) -> vaccine_ledger_core::Result<Vec<(String, Vec<u8>)>> {
        let rows = self.read_range(partition, start, end).map_err(store_error)?;
        debug!(%partition, start, ?end, rows = rows.len(), "range scan");
        Ok(rows)
    }

    fn query(
        &self,
        partition: &Partition,
        selector: &str,
    ) -> vaccine_ledger_core::Result<Vec<(String, Vec<u8>)>> {
        let rows = self.read_selector(partition, selector).map_err(store_error)?;
        debug!(%partition, selector, rows = rows.len(), "selector query");
        Ok(rows)
    }

    fn history(&self, key: &str) -> vaccine_ledger_core::Result<Vec<HistoryEntry>> {
        let entries = self.read_history(key).map_err(store_error)?;
        debug!(key, entries = entries.len(), "history read");
        Ok(entries)
    }

    fn commit(&mut self, tx: &TxMeta, batch: WriteBatch) -> vaccine_ledger_core::Result<()> {
        self.apply(tx, &batch).map_err(store_error)
    }
}

#[allow(clippy::needless_pass_by_value)]
fn store_error(err: anyhow::Error) -> LedgerError {
    LedgerError::Store(format!("{err:#}"))
}

fn decode_key(raw: Vec<u8>) -> Result<String> {
    String::from_utf8(raw).context("stored key is not UTF-8")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
