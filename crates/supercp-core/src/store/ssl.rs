use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{RecordStore, parse_column};
use crate::error::Result;
use crate::model::{ResourceStatus, SslCertificate, SslProvider};

const COLUMNS: &str = "id, user_id, web_domain_id, domain, provider, certificate_path, key_path, \
     issued_at, expires_at, last_error, renewal_attempts, auto_renewal, status, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<SslCertificate> {
    Ok(SslCertificate {
        id: row.get(0)?,
        user_id: row.get(1)?,
        web_domain_id: row.get(2)?,
        domain: row.get(3)?,
        provider: parse_column(row, 4)?,
        certificate_path: row.get(5)?,
        key_path: row.get(6)?,
        issued_at: row.get(7)?,
        expires_at: row.get(8)?,
        last_error: row.get(9)?,
        renewal_attempts: row.get(10)?,
        auto_renewal: row.get(11)?,
        status: parse_column(row, 12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

impl RecordStore {
    pub async fn insert_certificate(
        &self,
        user_id: i64,
        web_domain_id: i64,
        domain: &str,
        provider: SslProvider,
        status: ResourceStatus,
    ) -> Result<SslCertificate> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO ssl_certificates (user_id, web_domain_id, domain, provider, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                user_id,
                web_domain_id,
                domain,
                provider.as_str(),
                status.as_str(),
                Utc::now()
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            &format!("SELECT {COLUMNS} FROM ssl_certificates WHERE id = ?1"),
            params![id],
            from_row,
        )?)
    }

    pub async fn certificate(&self, id: i64) -> Result<Option<SslCertificate>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM ssl_certificates WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()?)
    }

    /// Most recent certificate for a web domain
    pub async fn certificate_for_web_domain(
        &self,
        web_domain_id: i64,
    ) -> Result<Option<SslCertificate>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM ssl_certificates
                     WHERE web_domain_id = ?1 ORDER BY id DESC LIMIT 1"
                ),
                params![web_domain_id],
                from_row,
            )
            .optional()?)
    }

    /// Record a successful issuance
    pub async fn mark_certificate_issued(
        &self,
        id: i64,
        certificate_path: &str,
        key_path: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE ssl_certificates
             SET certificate_path = ?1, key_path = ?2, issued_at = ?3, expires_at = ?4,
                 last_error = NULL, updated_at = ?5
             WHERE id = ?6",
            params![certificate_path, key_path, issued_at, expires_at, Utc::now(), id],
        )?;
        Ok(())
    }

    pub async fn set_certificate_error(&self, id: i64, message: &str) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE ssl_certificates SET last_error = ?1, updated_at = ?2 WHERE id = ?3",
            params![message, Utc::now(), id],
        )?;
        Ok(())
    }

    pub async fn increment_renewal_attempts(&self, id: i64) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE ssl_certificates
             SET renewal_attempts = renewal_attempts + 1, updated_at = ?1
             WHERE id = ?2",
            params![Utc::now(), id],
        )?;
        Ok(())
    }

    /// Issued auto-renewing certificates expiring before `before`
    ///
    /// `renewing` rows are included so a pass interrupted mid-renewal is
    /// picked up again.
    pub async fn certificates_expiring_before(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<SslCertificate>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM ssl_certificates
             WHERE status IN ('active', 'renewing') AND auto_renewal = 1
               AND expires_at IS NOT NULL AND expires_at < ?1
             ORDER BY expires_at"
        ))?;
        let certificates = stmt
            .query_map(params![before], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(certificates)
    }
}
