//! Small SQLite connection pool.
//!
//! Connections are checked out per operation and come back through the
//! [`PooledConnection`] guard on every exit path, error paths included.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OpenFlags};
use tracing::debug;
use ulid::Ulid;

use qa_core::{QaError, Result};

/// Where connections point.
#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    /// Shared-cache in-memory database, alive while any connection is open.
    Memory(String),
}

pub(crate) struct ConnectionPool {
    location: Location,
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
    cache_size: i32,
    busy_timeout_ms: u32,

    /// Holds an in-memory database open between checkouts.
    _keepalive: Option<Mutex<Connection>>,
}

impl ConnectionPool {
    pub(crate) fn file(
        path: PathBuf,
        max_idle: usize,
        cache_size: i32,
        busy_timeout_ms: u32,
    ) -> Result<Arc<Self>> {
        let mut pool = Self {
            location: Location::File(path),
            idle: Mutex::new(Vec::new()),
            max_idle: max_idle.max(1),
            cache_size,
            busy_timeout_ms,
            _keepalive: None,
        };

        // Fail early on an unopenable path and seed the idle list.
        let conn = pool.open_connection()?;
        pool.idle = Mutex::new(vec![conn]);
        Ok(Arc::new(pool))
    }

    pub(crate) fn memory(max_idle: usize) -> Result<Arc<Self>> {
        let uri = format!("file:qa_mem_{}?mode=memory&cache=shared", Ulid::new());
        let mut pool = Self {
            location: Location::Memory(uri),
            idle: Mutex::new(Vec::new()),
            max_idle: max_idle.max(1),
            cache_size: -2000,
            busy_timeout_ms: 5000,
            _keepalive: None,
        };

        pool._keepalive = Some(Mutex::new(pool.open_connection()?));
        Ok(Arc::new(pool))
    }

    fn open_connection(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = match &self.location {
            Location::File(path) => Connection::open_with_flags(path, flags),
            Location::Memory(uri) => {
                Connection::open_with_flags(uri, flags | OpenFlags::SQLITE_OPEN_URI)
            }
        }
        .map_err(|e| QaError::database(format!("Failed to open database: {}", e)))?;

        self.configure_connection(&conn)?;
        debug!("Opened connection to {:?}", self.location);
        Ok(conn)
    }

    /// Configure SQLite connection for a read-mostly workload.
    fn configure_connection(&self, conn: &Connection) -> Result<()> {
        let journal = match self.location {
            Location::File(_) => "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;",
            Location::Memory(_) => "",
        };

        conn.execute_batch(&format!(
            r#"
            {}
            PRAGMA cache_size = {};
            PRAGMA busy_timeout = {};
            PRAGMA temp_store = MEMORY;
            "#,
            journal, self.cache_size, self.busy_timeout_ms
        ))
        .map_err(|e| QaError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Check out a connection, opening a new one if none is idle.
    pub(crate) fn get(self: &Arc<Self>) -> Result<PooledConnection> {
        let reused = self
            .idle
            .lock()
            .map_err(|e| QaError::database(format!("Pool lock poisoned: {}", e)))?
            .pop();

        let conn = match reused {
            Some(conn) => conn,
            None => self.open_connection()?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
        })
    }

    #[cfg(test)]
    fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

/// A checked-out connection. Returns to the pool on drop, or closes when
/// the pool already holds `max_idle` connections.
pub(crate) struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only taken in drop.
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Ok(mut idle) = self.pool.idle.lock() {
                if idle.len() < self.pool.max_idle {
                    idle.push(conn);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connections_return_on_drop() {
        let pool = ConnectionPool::memory(2).unwrap();
        assert_eq!(pool.idle_count(), 0);

        {
            let a = pool.get().unwrap();
            let b = pool.get().unwrap();
            let c = pool.get().unwrap();
            a.execute_batch("SELECT 1").unwrap();
            drop((b, c));
        }

        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_memory_connections_share_database() {
        let pool = ConnectionPool::memory(2).unwrap();
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();

        a.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (7);")
            .unwrap();
        let x: i64 = b.query_row("SELECT x FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(x, 7);
    }

    #[test]
    fn test_separate_memory_pools_are_isolated() {
        let one = ConnectionPool::memory(1).unwrap();
        let two = ConnectionPool::memory(1).unwrap();

        one.get().unwrap().execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        assert!(two.get().unwrap().execute_batch("SELECT * FROM t").is_err());
    }

    #[test]
    fn test_released_after_error() {
        let pool = ConnectionPool::memory(1).unwrap();
        let result: Result<()> = (|| {
            let conn = pool.get()?;
            conn.execute_batch("NOT SQL")
                .map_err(|e| QaError::database(e.to_string()))
        })();

        assert!(result.is_err());
        assert_eq!(pool.idle_count(), 1);
    }
}
