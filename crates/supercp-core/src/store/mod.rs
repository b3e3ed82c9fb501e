//! Authoritative record store
//!
//! SQLite behind a shared async mutex. The mutex is the only mutual
//! exclusion in the control plane: every query holds it for the duration of
//! one statement or one transaction and never across an agent call.

mod backup;
mod cron;
mod database;
mod dns;
mod firewall;
mod ftp;
mod mail;
mod schema;
mod ssl;
mod web;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::error::{Error, Result};
use crate::model::{ResourceKind, ResourceStatus};

pub use backup::ScheduleData;
pub use firewall::RuleData;

/// Shared SQLite connection handle
///
/// Cloning shares the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Acquire the connection
    pub async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

/// Typed access to the authoritative tables
#[derive(Clone, Debug)]
pub struct RecordStore {
    db: Database,
}

impl RecordStore {
    /// Wrap a database, creating the authoritative schema if missing
    pub async fn new(db: Database) -> Result<Self> {
        {
            let conn = db.lock().await;
            conn.execute_batch(schema::AUTHORITATIVE_TABLES)?;
        }
        Ok(Self { db })
    }

    pub(crate) async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().await
    }

    /// Move a record to a new lifecycle status
    ///
    /// Every transition is logged with `kind`, `id`, `from` and `to`.
    pub async fn set_status(&self, kind: ResourceKind, id: i64, to: ResourceStatus) -> Result<()> {
        if matches!(kind, ResourceKind::DnsRecord | ResourceKind::Crontab | ResourceKind::BackupSchedule) {
            return Err(Error::invalid_input(format!("{kind} carries no lifecycle status")));
        }
        let table = kind.table();

        let conn = self.conn().await;
        let from: Option<String> = conn
            .query_row(
                &format!("SELECT status FROM {table} WHERE id = ?1"),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(from) = from else {
            return Err(Error::not_found(format!("{kind} #{id}")));
        };

        conn.execute(
            &format!("UPDATE {table} SET status = ?1, updated_at = ?2 WHERE id = ?3"),
            params![to.as_str(), Utc::now(), id],
        )?;
        drop(conn);

        info!(
            kind = %kind,
            id = id,
            from = %from,
            to = %to,
            "Resource status changed"
        );
        Ok(())
    }

    /// Current status of a record, if it exists
    pub async fn status_of(&self, kind: ResourceKind, id: i64) -> Result<Option<ResourceStatus>> {
        let table = kind.table();
        let conn = self.conn().await;
        let raw: Option<String> = conn
            .query_row(
                &format!("SELECT status FROM {table} WHERE id = ?1"),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| s.parse::<ResourceStatus>().map_err(Error::Other))
            .transpose()
    }
}

/// Read a TEXT column through `FromStr`
pub(crate) fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}
