use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{RecordStore, parse_column};
use crate::error::{Error, Result};
use crate::model::{ResourceStatus, WebDomain};

const COLUMNS: &str = "id, user_id, domain, owner_name, root_path, php_version, has_ssl, \
     ssl_certificate_path, ssl_key_path, ssl_expires_at, size_bytes, status, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<WebDomain> {
    Ok(WebDomain {
        id: row.get(0)?,
        user_id: row.get(1)?,
        domain: row.get(2)?,
        owner_name: row.get(3)?,
        root_path: row.get(4)?,
        php_version: row.get(5)?,
        has_ssl: row.get(6)?,
        ssl_certificate_path: row.get(7)?,
        ssl_key_path: row.get(8)?,
        ssl_expires_at: row.get(9)?,
        size_bytes: row.get(10)?,
        status: parse_column(row, 11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl RecordStore {
    pub async fn insert_web_domain(
        &self,
        user_id: i64,
        domain: &str,
        owner_name: &str,
        root_path: &str,
        php_version: &str,
        status: ResourceStatus,
    ) -> Result<WebDomain> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO web_domains (user_id, domain, owner_name, root_path, php_version, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                user_id,
                domain,
                owner_name,
                root_path,
                php_version,
                status.as_str(),
                Utc::now()
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            &format!("SELECT {COLUMNS} FROM web_domains WHERE id = ?1"),
            params![id],
            from_row,
        )?)
    }

    pub async fn web_domain(&self, id: i64) -> Result<Option<WebDomain>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM web_domains WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()?)
    }

    pub async fn web_domain_by_name(&self, domain: &str) -> Result<Option<WebDomain>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM web_domains WHERE domain = ?1"),
                params![domain],
                from_row,
            )
            .optional()?)
    }

    /// Change root and/or PHP version; unset fields are kept
    pub async fn update_web_domain(
        &self,
        id: i64,
        root_path: Option<&str>,
        php_version: Option<&str>,
    ) -> Result<WebDomain> {
        let conn = self.conn().await;
        let changed = conn.execute(
            "UPDATE web_domains
             SET root_path = COALESCE(?1, root_path),
                 php_version = COALESCE(?2, php_version),
                 updated_at = ?3
             WHERE id = ?4",
            params![root_path, php_version, Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("web domain #{id}")));
        }
        Ok(conn.query_row(
            &format!("SELECT {COLUMNS} FROM web_domains WHERE id = ?1"),
            params![id],
            from_row,
        )?)
    }

    /// Record the certificate the vhost now serves
    pub async fn set_web_domain_ssl(
        &self,
        id: i64,
        certificate_path: &str,
        key_path: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE web_domains
             SET has_ssl = 1, ssl_certificate_path = ?1, ssl_key_path = ?2, ssl_expires_at = ?3, updated_at = ?4
             WHERE id = ?5",
            params![certificate_path, key_path, expires_at, Utc::now(), id],
        )?;
        Ok(())
    }

    pub async fn set_web_domain_size(&self, id: i64, size_bytes: i64) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE web_domains SET size_bytes = ?1 WHERE id = ?2",
            params![size_bytes, id],
        )?;
        Ok(())
    }

    pub async fn list_web_domains(&self, user_id: Option<i64>) -> Result<Vec<WebDomain>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM web_domains
             WHERE (?1 IS NULL OR user_id = ?1) ORDER BY domain"
        ))?;
        let domains = stmt
            .query_map(params![user_id], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(domains)
    }

    /// Delete a web domain and the certificates issued for it
    pub async fn delete_web_domain(&self, id: i64) -> Result<()> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM ssl_certificates WHERE web_domain_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM web_domains WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }
}
