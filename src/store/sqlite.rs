use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use super::{now_millis, Store, StoreError, StoreResult};

/// SQLite-backed store. Several processes may share one database file; each
/// primitive runs in its own `BEGIN IMMEDIATE` transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| StoreError::Unavailable(format!("{}: {}", dir.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        init_schema(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))
    }

    fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> rusqlite::Result<T>) -> StoreResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv_lists (
            key    TEXT NOT NULL,
            pos    INTEGER NOT NULL,
            value  TEXT NOT NULL,
            PRIMARY KEY (key, pos)
        );

        CREATE TABLE IF NOT EXISTS kv_zsets (
            key    TEXT NOT NULL,
            member TEXT NOT NULL,
            score  INTEGER NOT NULL,
            PRIMARY KEY (key, member)
        );
        CREATE INDEX IF NOT EXISTS idx_zsets_score ON kv_zsets(key, score);

        CREATE TABLE IF NOT EXISTS kv_sets (
            key    TEXT NOT NULL,
            member TEXT NOT NULL,
            PRIMARY KEY (key, member)
        );

        CREATE TABLE IF NOT EXISTS kv_expiry (
            key        TEXT PRIMARY KEY,
            expires_at INTEGER NOT NULL
        );
        ",
    )
}

// ── Lists ──

fn push_head(tx: &Transaction, key: &str, value: &str) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO kv_lists (key, pos, value)
         VALUES (?1, (SELECT COALESCE(MIN(pos), 0) - 1 FROM kv_lists WHERE key = ?1), ?2)",
        params![key, value],
    )?;
    Ok(())
}

fn push_tail(tx: &Transaction, key: &str, value: &str) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO kv_lists (key, pos, value)
         VALUES (?1, (SELECT COALESCE(MAX(pos), 0) + 1 FROM kv_lists WHERE key = ?1), ?2)",
        params![key, value],
    )?;
    Ok(())
}

fn pop_tail(tx: &Transaction, key: &str) -> rusqlite::Result<Option<String>> {
    let row: Option<(i64, String)> = tx
        .query_row(
            "SELECT pos, value FROM kv_lists WHERE key = ?1 ORDER BY pos DESC LIMIT 1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((pos, value)) => {
            tx.execute(
                "DELETE FROM kv_lists WHERE key = ?1 AND pos = ?2",
                params![key, pos],
            )?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

// ── Sets ──

fn expired(tx: &Transaction, key: &str, now: i64) -> rusqlite::Result<bool> {
    let expires_at: Option<i64> = tx
        .query_row(
            "SELECT expires_at FROM kv_expiry WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(expires_at.is_some_and(|at| at <= now))
}

fn delete_key(tx: &Transaction, key: &str) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM kv_lists WHERE key = ?1", params![key])?;
    tx.execute("DELETE FROM kv_zsets WHERE key = ?1", params![key])?;
    tx.execute("DELETE FROM kv_sets WHERE key = ?1", params![key])?;
    tx.execute("DELETE FROM kv_expiry WHERE key = ?1", params![key])?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn lpush(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_tx(|tx| push_head(tx, key, value))
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_tx(|tx| push_tail(tx, key, value))
    }

    async fn rpop(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_tx(|tx| pop_tail(tx, key))
    }

    async fn rpoplpush(&self, src: &str, dst: &str) -> StoreResult<Option<String>> {
        self.with_tx(|tx| {
            let value = pop_tail(tx, src)?;
            if let Some(v) = &value {
                push_head(tx, dst, v)?;
            }
            Ok(value)
        })
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM kv_lists WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    async fn lrange_tail(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT value FROM kv_lists WHERE key = ?1 ORDER BY pos DESC LIMIT ?2")?;
        let rows = stmt
            .query_map(params![key, limit as i64], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO kv_zsets (key, member, score) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
                params![key, member, score],
            )?;
            Ok(())
        })
    }

    async fn zcard(&self, key: &str) -> StoreResult<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM kv_zsets WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    async fn zrange(&self, key: &str, limit: usize) -> StoreResult<Vec<(String, i64)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT member, score FROM kv_zsets WHERE key = ?1 ORDER BY score, member LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![key, limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(String, i64)>, _>>()?;
        Ok(rows)
    }

    async fn promote_due(&self, zkey: &str, list: &str, now: i64) -> StoreResult<usize> {
        self.with_tx(|tx| {
            let due: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT member FROM kv_zsets WHERE key = ?1 AND score <= ?2 ORDER BY score, member",
                )?;
                let rows = stmt
                    .query_map(params![zkey, now], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                rows
            };
            for member in due.iter().rev() {
                push_tail(tx, list, member)?;
            }
            tx.execute(
                "DELETE FROM kv_zsets WHERE key = ?1 AND score <= ?2",
                params![zkey, now],
            )?;
            Ok(due.len())
        })
    }

    async fn sadd_with_ttl(&self, key: &str, member: &str, ttl: Duration) -> StoreResult<()> {
        let now = now_millis();
        self.with_tx(|tx| {
            if expired(tx, key, now)? {
                delete_key(tx, key)?;
            }
            tx.execute(
                "INSERT OR IGNORE INTO kv_sets (key, member) VALUES (?1, ?2)",
                params![key, member],
            )?;
            tx.execute(
                "INSERT INTO kv_expiry (key, expires_at) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at",
                params![key, now + ttl.as_millis() as i64],
            )?;
            Ok(())
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let now = now_millis();
        self.with_tx(|tx| {
            if expired(tx, key, now)? {
                delete_key(tx, key)?;
                return Ok(false);
            }
            let found: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM kv_sets WHERE key = ?1 AND member = ?2",
                    params![key, member],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.with_tx(|tx| delete_key(tx, key))
    }
}
