//! Persistent memoization of expensive predicates across runs.
//!
//! Keyed by three opaque 64-bit values plus a function tag, mapping to an
//! `i64` result. Backed by SQLite in WAL mode with a 60-second busy
//! timeout, so concurrent runs sharing one cache file survive each
//! other; a crashed writer leaves the database readable.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tileforge_common::{Error, Result};

/// Memoized functions. The tag is part of the key; never reuse a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CachedFunction {
    /// Polygon validity predicate.
    IsValid = 0,
}

pub struct FunctionCache {
    conn: Mutex<Connection>,
}

impl FunctionCache {
    pub fn open(path: &Path) -> Result<FunctionCache> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| cache_error(e.to_string()))?;

        conn.busy_timeout(Duration::from_secs(60))
            .map_err(|e| cache_error(e.to_string()))?;
        conn.pragma_update(None, "synchronous", "OFF")
            .map_err(|e| cache_error(e.to_string()))?;
        let journal_mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| cache_error(e.to_string()))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            return Err(cache_error(format!(
                "could not set WAL mode (got '{journal_mode}')"
            )));
        }

        conn.execute(
            "CREATE TABLE IF NOT EXISTS cache(
                k1 INTEGER NOT NULL,
                k2 INTEGER NOT NULL,
                k3 INTEGER NOT NULL,
                func INTEGER NOT NULL,
                result INTEGER,
                UNIQUE (k1, k2, k3, func))",
            [],
        )
        .map_err(|e| cache_error(e.to_string()))?;

        Ok(FunctionCache {
            conn: Mutex::new(conn),
        })
    }

    /// The cached result for the key, if any.
    pub fn get_cached_i64(
        &self,
        k1: u64,
        k2: u64,
        k3: u64,
        func: CachedFunction,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT result FROM cache WHERE k1 = ? AND k2 = ? AND k3 = ? AND func = ?",
            params![k1 as i64, k2 as i64, k3 as i64, func as u8],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| cache_error(e.to_string()))
    }

    /// Stores a result. A concurrent writer that got there first wins;
    /// both computed the same value.
    pub fn add_cached_i64(
        &self,
        k1: u64,
        k2: u64,
        k3: u64,
        func: CachedFunction,
        value: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO cache(k1, k2, k3, func, result) VALUES(?, ?, ?, ?, ?)",
            params![k1 as i64, k2 as i64, k3 as i64, func as u8, value],
        )
        .map_err(|e| cache_error(e.to_string()))?;
        Ok(())
    }
}

fn cache_error(message: String) -> Error {
    Error::io("function cache", std::io::Error::other(message))
}
