//! SQLite-backed capacity catalog.
//!
//! Holds the ceiling and cleanup settings of every capacity-limited store.
//! Reads go through one shared connection; each ceiling update runs on its
//! own connection so it can be interrupted from another thread while it
//! waits on a lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, InterruptHandle, OptionalExtension, Row};
use tracing::{debug, info};

use crate::schema::{HISTORY_TRIGGER_SQL, SCHEMA_SQL};
use crate::types::*;
use stagger_core::{codes, Error, Resource, ResourceDiscovery, Result};

/// Capacity catalog stored in `stagger.db`.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    /// Interrupt handles of in-flight ceiling updates, by store name.
    inflight: Mutex<HashMap<String, InterruptHandle>>,
}

impl SqliteCatalog {
    /// Open or create the catalog.
    ///
    /// `db_dir` is the directory (e.g., `data/catalog/`). The file will be `db_dir/stagger.db`.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir)?;
        let db_path = db_dir.join("stagger.db");

        let conn = Self::create_connection(&db_path)?;
        let full_schema = format!("{}\n{}", SCHEMA_SQL, HISTORY_TRIGGER_SQL);
        conn.execute_batch(&full_schema)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;

        let catalog = Self {
            conn: Mutex::new(conn),
            db_path,
            inflight: Mutex::new(HashMap::new()),
        };

        info!(
            "SqliteCatalog initialized: {} stores, path={}",
            catalog.count_stores()?,
            catalog.db_path.display()
        );

        Ok(catalog)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(conn)
    }

    // ---------------------------------------------------------------
    // Store CRUD
    // ---------------------------------------------------------------

    /// Insert a store or replace its settings.
    pub fn upsert_store(&self, record: &StoreRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO capacity_stores
                (name, max_capacity_mb, used_mb, size_based_cleanup, time_based_cleanup, read_only, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(name) DO UPDATE SET
                max_capacity_mb = excluded.max_capacity_mb,
                used_mb = excluded.used_mb,
                size_based_cleanup = excluded.size_based_cleanup,
                time_based_cleanup = excluded.time_based_cleanup,
                read_only = excluded.read_only,
                updated_at = excluded.updated_at",
        )
        .map_err(|e| Error::Database(e.to_string()))?
        .execute(params![
            record.name,
            to_sql_int(record.max_capacity_mb)?,
            to_sql_int(record.used_mb)?,
            record.size_based_cleanup,
            record.time_based_cleanup,
            record.read_only,
            record.updated_at.unwrap_or_else(now_millis),
        ])
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    pub fn get_store(&self, name: &str) -> Result<Option<StoreRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT * FROM capacity_stores WHERE name = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![name], Self::row_to_store)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(row)
    }

    /// All stores, eligible or not, by name.
    pub fn list_stores(&self) -> Result<Vec<StoreRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM capacity_stores ORDER BY name")
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], Self::row_to_store)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Eligible stores, largest ceiling first, ties by name.
    pub fn list_eligible_stores(&self) -> Result<Vec<StoreRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM capacity_stores
                 WHERE size_based_cleanup = 1 AND time_based_cleanup = 0 AND read_only = 0
                 ORDER BY max_capacity_mb DESC, name ASC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], Self::row_to_store)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub fn count_stores(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM capacity_stores", [], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count.max(0) as usize)
    }

    // ---------------------------------------------------------------
    // Ceilings
    // ---------------------------------------------------------------

    /// Authoritative current ceiling of a store.
    pub fn current_capacity(&self, name: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let value: Option<i64> = conn
            .prepare_cached("SELECT max_capacity_mb FROM capacity_stores WHERE name = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![name], |row| row.get(0))
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        match value {
            Some(v) => from_sql_int(v),
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    /// Change a store's ceiling on a dedicated connection.
    ///
    /// `lock_wait` bounds how long the update waits for a competing writer
    /// before failing with a contention error. While the update runs,
    /// [`interrupt`](Self::interrupt) can abort it.
    pub fn set_max_capacity(&self, name: &str, value: u64, lock_wait: Duration) -> Result<()> {
        let conn = Self::create_connection(&self.db_path)?;
        conn.busy_timeout(lock_wait)
            .map_err(|e| Error::Database(e.to_string()))?;
        self.inflight
            .lock()
            .insert(name.to_string(), conn.get_interrupt_handle());

        let result = conn.execute(
            "UPDATE capacity_stores SET max_capacity_mb = ?2, updated_at = ?3 WHERE name = ?1",
            params![name, to_sql_int(value)?, now_millis()],
        );
        self.inflight.lock().remove(name);

        match result {
            Ok(0) => Err(Error::NotFound(name.to_string())),
            Ok(_) => {
                debug!("Set {} max capacity to {}", name, value);
                Ok(())
            }
            Err(e) => Err(map_update_error(e)),
        }
    }

    /// Interrupt an in-flight ceiling update. Returns false when none is running.
    pub fn interrupt(&self, name: &str) -> bool {
        match self.inflight.lock().get(name) {
            Some(handle) => {
                handle.interrupt();
                true
            }
            None => false,
        }
    }

    /// Ceiling changes recorded for a store, oldest first.
    pub fn capacity_history(&self, name: &str) -> Result<Vec<CapacityChange>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT name, old_capacity_mb, new_capacity_mb, changed_at
                 FROM capacity_changes WHERE name = ?1 ORDER BY id",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut changes = Vec::new();
        for row in rows {
            let (name, old, new, changed_at) = row.map_err(|e| Error::Database(e.to_string()))?;
            changes.push(CapacityChange {
                name,
                old_capacity_mb: from_sql_int(old)?,
                new_capacity_mb: from_sql_int(new)?,
                changed_at,
            });
        }
        Ok(changes)
    }

    fn row_to_store(row: &Row<'_>) -> rusqlite::Result<StoreRecord> {
        let max: i64 = row.get("max_capacity_mb")?;
        let used: i64 = row.get("used_mb")?;
        Ok(StoreRecord {
            name: row.get("name")?,
            max_capacity_mb: max.max(0) as u64,
            used_mb: used.max(0) as u64,
            size_based_cleanup: row.get("size_based_cleanup")?,
            time_based_cleanup: row.get("time_based_cleanup")?,
            read_only: row.get("read_only")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl ResourceDiscovery for SqliteCatalog {
    fn list_eligible(&self) -> Result<Vec<Resource>> {
        let stores = self
            .list_eligible_stores()
            .map_err(|e| Error::Discovery(e.to_string()))?;
        Ok(stores.iter().map(StoreRecord::to_resource).collect())
    }
}

fn map_update_error(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => Error::Mutation {
                code: codes::CONTENTION,
                message: e.to_string(),
            },
            ErrorCode::OperationInterrupted => Error::Mutation {
                code: codes::CANCELLED,
                message: e.to_string(),
            },
            _ => Error::Mutation {
                code: i64::from(err.extended_code),
                message: e.to_string(),
            },
        },
        _ => Error::Database(e.to_string()),
    }
}

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::Database(format!("{} does not fit in INTEGER", value)))
}

fn from_sql_int(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::Database(format!("negative capacity {}", value)))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
