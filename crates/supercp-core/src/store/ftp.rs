use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::{RecordStore, parse_column};
use crate::error::{Error, Result};
use crate::model::{FtpAccount, ResourceStatus};
use crate::password::PasswordHash;

const COLUMNS: &str = "id, user_id, username, password_hash, home_dir, status, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<FtpAccount> {
    Ok(FtpAccount {
        id: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2)?,
        password_hash: PasswordHash::from_stored(row.get::<_, String>(3)?),
        home_dir: row.get(4)?,
        status: parse_column(row, 5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl RecordStore {
    pub async fn insert_ftp_account(
        &self,
        user_id: i64,
        username: &str,
        password_hash: &PasswordHash,
        home_dir: &str,
        status: ResourceStatus,
    ) -> Result<FtpAccount> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO ftp_accounts (user_id, username, password_hash, home_dir, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                user_id,
                username,
                password_hash.as_str(),
                home_dir,
                status.as_str(),
                Utc::now()
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            &format!("SELECT {COLUMNS} FROM ftp_accounts WHERE id = ?1"),
            params![id],
            from_row,
        )?)
    }

    pub async fn ftp_account(&self, id: i64) -> Result<Option<FtpAccount>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM ftp_accounts WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()?)
    }

    pub async fn ftp_account_by_username(&self, username: &str) -> Result<Option<FtpAccount>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM ftp_accounts WHERE username = ?1"),
                params![username],
                from_row,
            )
            .optional()?)
    }

    /// Change password hash and/or home directory; unset fields are kept
    pub async fn update_ftp_account(
        &self,
        id: i64,
        password_hash: Option<&PasswordHash>,
        home_dir: Option<&str>,
    ) -> Result<FtpAccount> {
        let conn = self.conn().await;
        let changed = conn.execute(
            "UPDATE ftp_accounts
             SET password_hash = COALESCE(?1, password_hash),
                 home_dir = COALESCE(?2, home_dir),
                 updated_at = ?3
             WHERE id = ?4",
            params![password_hash.map(PasswordHash::as_str), home_dir, Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("FTP account #{id}")));
        }
        Ok(conn.query_row(
            &format!("SELECT {COLUMNS} FROM ftp_accounts WHERE id = ?1"),
            params![id],
            from_row,
        )?)
    }

    pub async fn list_ftp_accounts(&self, user_id: Option<i64>) -> Result<Vec<FtpAccount>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM ftp_accounts
             WHERE (?1 IS NULL OR user_id = ?1) ORDER BY username"
        ))?;
        let accounts = stmt
            .query_map(params![user_id], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    /// Accounts the protocol tables should know about (active or suspended)
    pub async fn ftp_accounts_to_mirror(&self) -> Result<Vec<FtpAccount>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM ftp_accounts
             WHERE status IN ('active', 'suspended') ORDER BY id"
        ))?;
        let accounts = stmt
            .query_map([], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    pub async fn delete_ftp_account(&self, id: i64) -> Result<()> {
        let conn = self.conn().await;
        conn.execute("DELETE FROM ftp_accounts WHERE id = ?1", params![id])?;
        Ok(())
    }
}
