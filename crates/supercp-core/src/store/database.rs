use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::{RecordStore, parse_column};
use crate::error::{Error, Result};
use crate::model::{DatabaseRecord, ResourceStatus};
use crate::password::PasswordHash;

const COLUMNS: &str = "id, user_id, name, db_user, password_hash, db_type, collation, \
     max_connections, size_bytes, status, created_at, updated_at";

/// Collation assigned to new databases
const DEFAULT_COLLATION: &str = "utf8mb4_unicode_ci";

fn from_row(row: &Row<'_>) -> rusqlite::Result<DatabaseRecord> {
    Ok(DatabaseRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        db_user: row.get(3)?,
        password_hash: PasswordHash::from_stored(row.get::<_, String>(4)?),
        db_type: row.get(5)?,
        collation: row.get(6)?,
        max_connections: row.get(7)?,
        size_bytes: row.get(8)?,
        status: parse_column(row, 9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl RecordStore {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_database(
        &self,
        user_id: i64,
        name: &str,
        db_user: &str,
        password_hash: &PasswordHash,
        db_type: &str,
        max_connections: u32,
        status: ResourceStatus,
    ) -> Result<DatabaseRecord> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO databases (user_id, name, db_user, password_hash, db_type, collation, max_connections, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                user_id,
                name,
                db_user,
                password_hash.as_str(),
                db_type,
                DEFAULT_COLLATION,
                max_connections,
                status.as_str(),
                Utc::now()
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            &format!("SELECT {COLUMNS} FROM databases WHERE id = ?1"),
            params![id],
            from_row,
        )?)
    }

    pub async fn database(&self, id: i64) -> Result<Option<DatabaseRecord>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM databases WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()?)
    }

    pub async fn database_by_name(&self, name: &str) -> Result<Option<DatabaseRecord>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM databases WHERE name = ?1"),
                params![name],
                from_row,
            )
            .optional()?)
    }

    pub async fn set_database_max_connections(&self, id: i64, max_connections: u32) -> Result<()> {
        let conn = self.conn().await;
        let changed = conn.execute(
            "UPDATE databases SET max_connections = ?1, updated_at = ?2 WHERE id = ?3",
            params![max_connections, Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("database #{id}")));
        }
        Ok(())
    }

    pub async fn set_database_size(&self, id: i64, size_bytes: i64) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE databases SET size_bytes = ?1 WHERE id = ?2",
            params![size_bytes, id],
        )?;
        Ok(())
    }

    pub async fn list_databases(&self, user_id: Option<i64>) -> Result<Vec<DatabaseRecord>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM databases
             WHERE (?1 IS NULL OR user_id = ?1) ORDER BY name"
        ))?;
        let databases = stmt
            .query_map(params![user_id], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(databases)
    }

    pub async fn delete_database(&self, id: i64) -> Result<()> {
        let conn = self.conn().await;
        conn.execute("DELETE FROM databases WHERE id = ?1", params![id])?;
        Ok(())
    }
}
