//! Bounded SQLite connection pool.
//!
//! # Responsibility
//! - Own every SQLite connection used by one key-value engine.
//! - Lend a connection for the duration of a single engine call.
//!
//! # Invariants
//! - At most `max_size` connections are open at any time.
//! - An in-memory source is always a pool of exactly one connection, because
//!   separate in-memory connections do not share data.
//! - A checkout waits at most `acquire_timeout`, then fails with
//!   `DbError::PoolTimeout`.

use super::open::{open_db_in_memory, open_db_with_busy_timeout};
use super::{DbError, DbResult};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Where pooled connections come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbSource {
    File(PathBuf),
    Memory,
}

struct PoolState {
    idle: Vec<Connection>,
    open: u32,
}

/// Fixed-capacity pool of migrated SQLite connections.
pub struct ConnectionPool {
    source: DbSource,
    max_size: u32,
    acquire_timeout: Duration,
    busy_timeout: Duration,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl ConnectionPool {
    /// Builds a pool and eagerly opens its first connection.
    ///
    /// Opening one connection up front surfaces path and schema errors at
    /// construction instead of on the first engine call.
    pub fn new(
        source: DbSource,
        max_size: u32,
        acquire_timeout: Duration,
        busy_timeout: Duration,
    ) -> DbResult<Self> {
        let max_size = match source {
            DbSource::Memory => 1,
            DbSource::File(_) => max_size.max(1),
        };
        let pool = Self {
            source,
            max_size,
            acquire_timeout,
            busy_timeout,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            available: Condvar::new(),
        };

        let first = pool.open_connection()?;
        {
            let mut state = pool.state.lock();
            state.idle.push(first);
            state.open = 1;
        }
        Ok(pool)
    }

    /// Convenience constructor for a single in-memory connection.
    pub fn in_memory() -> DbResult<Self> {
        Self::new(
            DbSource::Memory,
            1,
            Duration::from_secs(5),
            super::DEFAULT_BUSY_TIMEOUT,
        )
    }

    pub fn source(&self) -> &DbSource {
        &self.source
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Number of connections currently open, idle or lent out.
    pub fn open_connections(&self) -> u32 {
        self.state.lock().open
    }

    /// Checks out one connection, opening a new one if capacity allows.
    pub fn get(&self) -> DbResult<PooledConnection<'_>> {
        let started_at = Instant::now();
        let deadline = started_at + self.acquire_timeout;
        let mut state = self.state.lock();

        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }

            if state.open < self.max_size {
                state.open += 1;
                drop(state);
                return match self.open_connection() {
                    Ok(conn) => {
                        debug!(
                            "event=pool_grow module=db status=ok max_size={}",
                            self.max_size
                        );
                        Ok(PooledConnection {
                            pool: self,
                            conn: Some(conn),
                        })
                    }
                    Err(err) => {
                        self.state.lock().open -= 1;
                        self.available.notify_one();
                        Err(err)
                    }
                };
            }

            if self.available.wait_until(&mut state, deadline).timed_out() {
                if let Some(conn) = state.idle.pop() {
                    return Ok(PooledConnection {
                        pool: self,
                        conn: Some(conn),
                    });
                }
                let waited_ms = started_at.elapsed().as_millis();
                warn!(
                    "event=pool_acquire module=db status=error error_code=pool_timeout waited_ms={waited_ms}"
                );
                return Err(DbError::PoolTimeout { waited_ms });
            }
        }
    }

    fn open_connection(&self) -> DbResult<Connection> {
        match &self.source {
            DbSource::File(path) => open_db_with_busy_timeout(path, self.busy_timeout),
            DbSource::Memory => open_db_in_memory(),
        }
    }

    fn put_back(&self, conn: Connection) {
        self.state.lock().idle.push(conn);
        self.available.notify_one();
    }
}

/// A connection lent by [`ConnectionPool`]; returned on drop.
pub struct PooledConnection<'pool> {
    pool: &'pool ConnectionPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("pooled connection is present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .expect("pooled connection is present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionPool, DbSource};
    use crate::db::DbError;
    use std::time::Duration;

    #[test]
    fn memory_pool_is_capped_at_one_connection() {
        let pool = ConnectionPool::new(
            DbSource::Memory,
            8,
            Duration::from_millis(50),
            Duration::from_millis(50),
        )
        .unwrap();
        assert_eq!(pool.max_size(), 1);
        assert_eq!(pool.open_connections(), 1);
    }

    #[test]
    fn checkout_times_out_when_every_connection_is_lent() {
        let pool = ConnectionPool::new(
            DbSource::Memory,
            1,
            Duration::from_millis(30),
            Duration::from_millis(30),
        )
        .unwrap();

        let held = pool.get().unwrap();
        let err = pool.get().err().expect("second checkout must time out");
        assert!(matches!(err, DbError::PoolTimeout { .. }));

        drop(held);
        pool.get().expect("connection is reusable after return");
    }

    #[test]
    fn file_pool_grows_lazily_up_to_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::new(
            DbSource::File(dir.path().join("pool.db")),
            2,
            Duration::from_millis(30),
            Duration::from_millis(500),
        )
        .unwrap();
        assert_eq!(pool.open_connections(), 1);

        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        assert_eq!(pool.open_connections(), 2);
        assert!(pool.get().is_err());

        drop(first);
        drop(second);
        assert_eq!(pool.open_connections(), 2);
    }
}
