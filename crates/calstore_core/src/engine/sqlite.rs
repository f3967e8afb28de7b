//! SQLite-backed key-value engine.
//!
//! # Responsibility
//! - Map the `KvEngine` contract onto the `kv_entries` table.
//! - Keep version stamping and multi-key atomicity inside SQL transactions.
//!
//! # Invariants
//! - Every write path runs in an `IMMEDIATE` transaction, so the clock bump
//!   and the row change commit together.
//! - Multi-key reads share one read transaction and see one snapshot.
//! - Prefix scans are key ranges over the primary key.
//! - Each engine call holds one pooled connection only for its own duration.

use super::{EngineResult, KvEngine, Version, WriteOp};
use crate::config::StoreConfig;
use crate::db::{ConnectionPool, DbSource};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

/// Key-value engine storing entries in SQLite through a connection pool.
pub struct SqliteKvEngine {
    pool: ConnectionPool,
}

impl SqliteKvEngine {
    /// Wraps an already built pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Builds the pool described by `config` and wraps it.
    pub fn open(config: &StoreConfig) -> EngineResult<Self> {
        let source = match &config.db_path {
            Some(path) => DbSource::File(path.clone()),
            None => DbSource::Memory,
        };
        let pool = ConnectionPool::new(
            source,
            config.pool_size,
            config.acquire_timeout(),
            config.busy_timeout(),
        )?;
        Ok(Self::new(pool))
    }

    /// Single-connection in-memory engine.
    pub fn in_memory() -> EngineResult<Self> {
        Ok(Self::new(ConnectionPool::in_memory()?))
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

impl KvEngine for SqliteKvEngine {
    fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>> {
        let conn = self.pool.get()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1;",
                [key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> EngineResult<()> {
        self.apply_batch(&[WriteOp::put(key, value)])
    }

    fn delete(&self, key: &str) -> EngineResult<()> {
        self.apply_batch(&[WriteOp::delete(key)])
    }

    fn exists(&self, key: &str) -> EngineResult<bool> {
        let conn = self.pool.get()?;
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM kv_entries WHERE key = ?1);",
            [key],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn get_many(&self, keys: &[&str]) -> EngineResult<Vec<Option<Vec<u8>>>> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let mut values = Vec::with_capacity(keys.len());
        {
            let mut stmt = tx.prepare("SELECT value FROM kv_entries WHERE key = ?1;")?;
            for key in keys {
                let value = stmt
                    .query_row([*key], |row| row.get::<_, Vec<u8>>(0))
                    .optional()?;
                values.push(value);
            }
        }
        tx.commit()?;
        Ok(values)
    }

    fn get_versioned(&self, key: &str) -> EngineResult<Option<(Vec<u8>, Version)>> {
        let conn = self.pool.get()?;
        let entry = conn
            .query_row(
                "SELECT value, version FROM kv_entries WHERE key = ?1;",
                [key],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Version>(1)?)),
            )
            .optional()?;
        Ok(entry)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Version>,
        value: &[u8],
    ) -> EngineResult<bool> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<Version> = tx
            .query_row(
                "SELECT version FROM kv_entries WHERE key = ?1;",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        if current != expected {
            return Ok(false);
        }

        let stamp = next_version(&tx)?;
        upsert(&tx, key, value, stamp)?;
        tx.commit()?;
        Ok(true)
    }

    fn apply_batch(&self, ops: &[WriteOp]) -> EngineResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stamp = next_version(&tx)?;
        for op in ops {
            match op {
                WriteOp::Put { key, value } => upsert(&tx, key, value, stamp)?,
                WriteOp::Delete { key } => {
                    tx.execute("DELETE FROM kv_entries WHERE key = ?1;", [key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> EngineResult<Vec<String>> {
        let conn = self.pool.get()?;
        let mut keys = Vec::new();
        match prefix_upper_bound(prefix) {
            Some(upper) => {
                let mut stmt = conn.prepare(
                    "SELECT key
                     FROM kv_entries
                     WHERE key >= ?1 AND key < ?2
                     ORDER BY key ASC;",
                )?;
                let mut rows = stmt.query(params![prefix, upper])?;
                while let Some(row) = rows.next()? {
                    keys.push(row.get(0)?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT key
                     FROM kv_entries
                     WHERE key >= ?1
                     ORDER BY key ASC;",
                )?;
                let mut rows = stmt.query([prefix])?;
                while let Some(row) = rows.next()? {
                    keys.push(row.get(0)?);
                }
            }
        }
        Ok(keys)
    }
}

/// Smallest string greater than every string starting with `prefix`.
///
/// UTF-8 byte order matches code point order, so bumping the last code point
/// gives an exclusive upper bound for SQLite's binary collation. `None` means
/// the range is unbounded above.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = match last as u32 + 1 {
            0xD800 => Some('\u{E000}'),
            code => char::from_u32(code),
        };
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

fn next_version(conn: &Connection) -> EngineResult<Version> {
    let stamp = conn.query_row(
        "UPDATE kv_clock SET value = value + 1 WHERE id = 1 RETURNING value;",
        [],
        |row| row.get(0),
    )?;
    Ok(stamp)
}

fn upsert(conn: &Connection, key: &str, value: &[u8], stamp: Version) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO kv_entries (key, value, version) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            version = excluded.version;",
        params![key, value, stamp],
    )?;
    Ok(())
}
