use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::{RecordStore, parse_column};
use crate::error::{Error, Result};
use crate::model::{EmailAccount, ResourceStatus};
use crate::password::PasswordHash;

const COLUMNS: &str = "id, user_id, email, password_hash, quota_mb, status, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<EmailAccount> {
    Ok(EmailAccount {
        id: row.get(0)?,
        user_id: row.get(1)?,
        email: row.get(2)?,
        password_hash: PasswordHash::from_stored(row.get::<_, String>(3)?),
        quota_mb: row.get(4)?,
        status: parse_column(row, 5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl RecordStore {
    pub async fn insert_email_account(
        &self,
        user_id: i64,
        email: &str,
        password_hash: &PasswordHash,
        quota_mb: u32,
        status: ResourceStatus,
    ) -> Result<EmailAccount> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO email_accounts (user_id, email, password_hash, quota_mb, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                user_id,
                email,
                password_hash.as_str(),
                quota_mb,
                status.as_str(),
                Utc::now()
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            &format!("SELECT {COLUMNS} FROM email_accounts WHERE id = ?1"),
            params![id],
            from_row,
        )?)
    }

    pub async fn email_account(&self, id: i64) -> Result<Option<EmailAccount>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM email_accounts WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()?)
    }

    pub async fn email_account_by_address(&self, email: &str) -> Result<Option<EmailAccount>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM email_accounts WHERE email = ?1"),
                params![email],
                from_row,
            )
            .optional()?)
    }

    /// Change password hash and/or quota; unset fields are kept
    pub async fn update_email_account(
        &self,
        id: i64,
        password_hash: Option<&PasswordHash>,
        quota_mb: Option<u32>,
    ) -> Result<EmailAccount> {
        let conn = self.conn().await;
        let changed = conn.execute(
            "UPDATE email_accounts
             SET password_hash = COALESCE(?1, password_hash),
                 quota_mb = COALESCE(?2, quota_mb),
                 updated_at = ?3
             WHERE id = ?4",
            params![password_hash.map(PasswordHash::as_str), quota_mb, Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("email account #{id}")));
        }
        Ok(conn.query_row(
            &format!("SELECT {COLUMNS} FROM email_accounts WHERE id = ?1"),
            params![id],
            from_row,
        )?)
    }

    pub async fn list_email_accounts(&self, user_id: Option<i64>) -> Result<Vec<EmailAccount>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM email_accounts
             WHERE (?1 IS NULL OR user_id = ?1) ORDER BY email"
        ))?;
        let accounts = stmt
            .query_map(params![user_id], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    pub async fn email_accounts_with_status(
        &self,
        status: ResourceStatus,
    ) -> Result<Vec<EmailAccount>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM email_accounts WHERE status = ?1 ORDER BY id"
        ))?;
        let accounts = stmt
            .query_map(params![status.as_str()], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    pub async fn delete_email_account(&self, id: i64) -> Result<()> {
        let conn = self.conn().await;
        conn.execute("DELETE FROM email_accounts WHERE id = ?1", params![id])?;
        Ok(())
    }
}
