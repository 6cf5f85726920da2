//! SQLite backend.
//!
//! Each will is stored as a JSON document alongside the columns the
//! scheduler filters on, so due-will queries never deserialize the
//! whole table.

use crate::{DeliveryRecord, StoreError, WillStore};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use willkeep_core::Will;

/// How long a session waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable store backed by a SQLite file.
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = open_db(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".into()))
    }
}

fn open_db(path: &Path) -> SqlResult<Connection> {
    let conn = Connection::open(path)?;

    // WAL mode so scheduler sessions can read while a check-in writes
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS wills (
            id          TEXT PRIMARY KEY,
            owner_name  TEXT NOT NULL,
            ttd_ms      INTEGER NOT NULL,
            disabled    INTEGER NOT NULL DEFAULT 0,
            exhausted   INTEGER NOT NULL DEFAULT 0,
            body        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_wills_ttd ON wills (ttd_ms);
        CREATE INDEX IF NOT EXISTS idx_wills_owner ON wills (owner_name);

        CREATE TABLE IF NOT EXISTS delivery_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            will_id     TEXT NOT NULL,
            timestamp   INTEGER NOT NULL,
            success     INTEGER NOT NULL DEFAULT 1,
            error_msg   TEXT
        );
        ",
    )?;

    Ok(conn)
}

fn parse_body(body: &str) -> Result<Will, StoreError> {
    Ok(serde_json::from_str(body)?)
}

fn upsert_will(conn: &Connection, will: &Will) -> Result<(), StoreError> {
    let body = serde_json::to_string(will)?;
    conn.execute(
        "INSERT INTO wills (id, owner_name, ttd_ms, disabled, exhausted, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            owner_name = excluded.owner_name,
            ttd_ms = excluded.ttd_ms,
            disabled = excluded.disabled,
            exhausted = excluded.exhausted,
            body = excluded.body",
        params![
            will.id,
            will.owner.name,
            will.time_to_delivery.timestamp_millis(),
            will.disabled,
            will.exhausted,
            body
        ],
    )?;
    Ok(())
}

fn query_wills(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Will>, StoreError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let bodies = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<SqlResult<Vec<String>>>()?;
    bodies.iter().map(|b| parse_body(b)).collect()
}

impl WillStore for SqliteStore {
    fn get_will(&self, id: &str) -> Result<Will, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT body FROM wills WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => parse_body(&row.get::<_, String>(0)?),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn set_will(&self, will: &Will) -> Result<(), StoreError> {
        upsert_will(&*self.conn()?, will)
    }

    fn update_will(
        &self,
        id: &str,
        update: &mut dyn FnMut(&mut Will) -> bool,
    ) -> Result<Option<Will>, StoreError> {
        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock before the read, so no other
        // connection can slip a write in between.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let body: Option<String> = tx
            .query_row("SELECT body FROM wills WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        let mut will = match body {
            Some(body) => parse_body(&body)?,
            None => return Err(StoreError::NotFound(id.to_string())),
        };

        if !update(&mut will) {
            return Ok(None);
        }
        upsert_will(&tx, &will)?;
        tx.commit()?;
        Ok(Some(will))
    }

    fn remove_will(&self, id: &str) -> Result<(), StoreError> {
        let affected = self
            .conn()?
            .execute("DELETE FROM wills WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn get_wills_by_owner(&self, owner_name: &str) -> Result<Vec<Will>, StoreError> {
        let conn = self.conn()?;
        let mut wills = query_wills(
            &conn,
            "SELECT body FROM wills WHERE owner_name = ?1",
            params![owner_name],
        )?;
        wills.sort_by_key(|w| w.creation);
        Ok(wills)
    }

    fn get_due(&self, now: DateTime<Utc>) -> Result<Vec<Will>, StoreError> {
        let conn = self.conn()?;
        let candidates = query_wills(
            &conn,
            "SELECT body FROM wills
             WHERE ttd_ms < ?1 AND disabled = 0 AND exhausted = 0
             ORDER BY ttd_ms",
            params![now.timestamp_millis() + 1],
        )?;
        // The column has millisecond resolution; the document is exact.
        Ok(candidates.into_iter().filter(|w| w.is_due(now)).collect())
    }

    fn remove_exhausted(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM delivery_log
             WHERE will_id IN (SELECT id FROM wills WHERE exhausted = 1)",
            [],
        )?;
        let purged = tx.execute("DELETE FROM wills WHERE exhausted = 1", [])?;
        tx.commit()?;
        if purged > 0 {
            log::info!("Purged {} exhausted will(s)", purged);
        }
        Ok(purged)
    }

    fn record_delivery(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO delivery_log (will_id, timestamp, success, error_msg)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.will_id,
                record.timestamp.timestamp_millis(),
                record.success,
                record.error
            ],
        )?;
        Ok(())
    }

    fn delivery_log(&self, will_id: &str) -> Result<Vec<DeliveryRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT will_id, timestamp, success, error_msg FROM delivery_log
             WHERE will_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![will_id], |row| {
            let millis: i64 = row.get(1)?;
            Ok(DeliveryRecord {
                will_id: row.get(0)?,
                timestamp: Utc
                    .timestamp_millis_opt(millis)
                    .single()
                    .unwrap_or_default(),
                success: row.get(2)?,
                error: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<SqlResult<Vec<_>>>()?)
    }

    fn checkout(&self) -> Result<Box<dyn WillStore>, StoreError> {
        Ok(Box::new(SqliteStore::open(&self.path)?))
    }
}
