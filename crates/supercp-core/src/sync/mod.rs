//! Protocol-table synchronizer
//!
//! Projects authoritative records into the tables read by the protocol
//! daemons:
//!
//! - PowerDNS: `domains`, `records`
//! - Postfix/Dovecot: `virtual_domains`, `virtual_users`
//! - Pure-FTPd: `ftp_users`

mod schema;

use async_trait::async_trait;
use rusqlite::{OptionalExtension, Transaction, params};
use tracing::{debug, info};

use crate::config::FtpConfig;
use crate::error::SyncError;
use crate::model::{DnsRecord, DnsZone, EmailAccount, FtpAccount, ResourceStatus};
use crate::store::Database;
use crate::traits::ProtocolTables;

/// `account` column value for zones this panel owns
pub const ZONE_ACCOUNT: &str = "supercp";

/// TTL of the generated SOA and NS records
pub const ZONE_META_TTL: u32 = 3600;

/// SOA serial for a zone: `YYYYMMDD01` from its last change
///
/// Derived from stored state so re-syncing an unchanged zone writes
/// identical rows.
pub fn soa_serial(zone: &DnsZone) -> String {
    format!("{}01", zone.updated_at.format("%Y%m%d"))
}

/// SOA content for a zone
pub fn soa_content(zone: &DnsZone) -> String {
    let d = &zone.domain;
    format!(
        "ns1.{d} admin.{d} {} 10800 3600 604800 3600",
        soa_serial(zone)
    )
}

/// Fully qualified owner name for a relative record name
pub fn qualify(name: &str, domain: &str) -> String {
    if name == "@" || name.is_empty() {
        domain.to_string()
    } else {
        format!("{name}.{domain}")
    }
}

/// A row of the PowerDNS `records` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredRecord {
    pub name: String,
    pub record_type: String,
    pub content: String,
    pub ttl: u32,
    pub prio: u32,
    pub disabled: bool,
    pub auth: bool,
}

/// A row of the `virtual_users` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredMailbox {
    pub email: String,
    pub domain: String,
    pub password: String,
}

/// A row of the `ftp_users` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredFtpUser {
    pub user: String,
    pub password: String,
    pub uid: u32,
    pub gid: u32,
    pub dir: String,
    pub active: bool,
}

/// SQLite-backed protocol tables
#[derive(Clone, Debug)]
pub struct SqlProtocolTables {
    db: Database,
    ftp_uid: u32,
    ftp_gid: u32,
}

impl SqlProtocolTables {
    /// Wrap a database, creating the protocol tables if missing
    pub async fn new(db: Database, ftp: &FtpConfig) -> Result<Self, SyncError> {
        {
            let conn = db.lock().await;
            conn.execute_batch(schema::PROTOCOL_TABLES)?;
        }
        Ok(Self {
            db,
            ftp_uid: ftp.uid,
            ftp_gid: ftp.gid,
        })
    }

    /// Mirrored records of a zone, ordered by row id
    pub async fn mirrored_records(&self, domain: &str) -> Result<Vec<MirroredRecord>, SyncError> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT r.name, r.type, r.content, r.ttl, r.prio, r.disabled, r.auth
             FROM records r JOIN domains d ON d.id = r.domain_id
             WHERE d.name = ?1 ORDER BY r.id",
        )?;
        let rows = stmt
            .query_map(params![domain], |row| {
                Ok(MirroredRecord {
                    name: row.get(0)?,
                    record_type: row.get(1)?,
                    content: row.get(2)?,
                    ttl: row.get(3)?,
                    prio: row.get(4)?,
                    disabled: row.get(5)?,
                    auth: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Whether a `domains` row exists for the zone
    pub async fn has_zone(&self, domain: &str) -> Result<bool, SyncError> {
        let conn = self.db.lock().await;
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM domains WHERE name = ?1",
                params![domain],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub async fn mirrored_mailbox(&self, email: &str) -> Result<Option<MirroredMailbox>, SyncError> {
        let conn = self.db.lock().await;
        Ok(conn
            .query_row(
                "SELECT u.email, d.name, u.password
                 FROM virtual_users u JOIN virtual_domains d ON d.id = u.domain_id
                 WHERE u.email = ?1",
                params![email],
                |row| {
                    Ok(MirroredMailbox {
                        email: row.get(0)?,
                        domain: row.get(1)?,
                        password: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    pub async fn mirrored_ftp_user(&self, user: &str) -> Result<Option<MirroredFtpUser>, SyncError> {
        let conn = self.db.lock().await;
        Ok(conn
            .query_row(
                "SELECT user, password, uid, gid, dir, active FROM ftp_users WHERE user = ?1",
                params![user],
                |row| {
                    Ok(MirroredFtpUser {
                        user: row.get(0)?,
                        password: row.get(1)?,
                        uid: row.get(2)?,
                        gid: row.get(3)?,
                        dir: row.get(4)?,
                        active: row.get(5)?,
                    })
                },
            )
            .optional()?)
    }
}

fn insert_mirrored(
    tx: &Transaction<'_>,
    domain_id: i64,
    name: &str,
    record_type: &str,
    content: &str,
    ttl: u32,
    prio: u32,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO records (domain_id, name, type, content, ttl, prio, disabled, auth)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 1)",
        params![domain_id, name, record_type, content, ttl, prio],
    )?;
    Ok(())
}

#[async_trait]
impl ProtocolTables for SqlProtocolTables {
    async fn sync_dns_zone(&self, zone: &DnsZone, records: &[DnsRecord]) -> Result<(), SyncError> {
        let domain = zone.domain.as_str();
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO domains (name, type, account) VALUES (?1, 'NATIVE', ?2)
             ON CONFLICT(name) DO UPDATE SET type = 'NATIVE', last_check = NULL, account = ?2",
            params![domain, ZONE_ACCOUNT],
        )?;
        let domain_id: i64 = tx.query_row(
            "SELECT id FROM domains WHERE name = ?1",
            params![domain],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM records WHERE domain_id = ?1", params![domain_id])?;

        insert_mirrored(&tx, domain_id, domain, "SOA", &soa_content(zone), ZONE_META_TTL, 0)?;
        insert_mirrored(&tx, domain_id, domain, "NS", &format!("ns1.{domain}"), ZONE_META_TTL, 0)?;
        insert_mirrored(&tx, domain_id, domain, "NS", &format!("ns2.{domain}"), ZONE_META_TTL, 0)?;

        for record in records {
            insert_mirrored(
                &tx,
                domain_id,
                &qualify(&record.name, domain),
                record.record_type.as_str(),
                &record.value,
                record.ttl,
                record.priority,
            )?;
        }

        tx.commit()?;
        info!(domain = domain, records = records.len(), "Synced DNS zone to PowerDNS tables");
        Ok(())
    }

    async fn delete_dns_zone(&self, domain: &str) -> Result<(), SyncError> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        let domain_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM domains WHERE name = ?1",
                params![domain],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(domain_id) = domain_id {
            tx.execute("DELETE FROM records WHERE domain_id = ?1", params![domain_id])?;
            tx.execute("DELETE FROM domains WHERE id = ?1", params![domain_id])?;
        }
        tx.commit()?;
        info!(domain = domain, "Deleted DNS zone from PowerDNS tables");
        Ok(())
    }

    async fn sync_mailbox(&self, account: &EmailAccount) -> Result<(), SyncError> {
        let Some(domain) = account.domain() else {
            return Err(SyncError::invalid_resource(format!(
                "mailbox address has no domain part: {}",
                account.email
            )));
        };

        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO virtual_domains (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            params![domain],
        )?;
        let domain_id: i64 = tx.query_row(
            "SELECT id FROM virtual_domains WHERE name = ?1",
            params![domain],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO virtual_users (domain_id, password, email) VALUES (?1, ?2, ?3)
             ON CONFLICT(email) DO UPDATE SET domain_id = ?1, password = ?2",
            params![domain_id, account.password_hash.as_str(), account.email],
        )?;
        tx.commit()?;

        info!(email = %account.email, "Synced mailbox to Postfix/Dovecot tables");
        Ok(())
    }

    async fn delete_mailbox(&self, email: &str) -> Result<(), SyncError> {
        let conn = self.db.lock().await;
        let removed = conn.execute("DELETE FROM virtual_users WHERE email = ?1", params![email])?;
        debug!(email = email, removed = removed, "Deleted mailbox from Postfix/Dovecot tables");
        Ok(())
    }

    async fn sync_ftp_account(&self, account: &FtpAccount) -> Result<(), SyncError> {
        let active = account.status == ResourceStatus::Active;
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO ftp_users (user, password, uid, gid, dir, active) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user) DO UPDATE SET password = ?2, uid = ?3, gid = ?4, dir = ?5, active = ?6",
            params![
                account.username,
                account.password_hash.as_str(),
                self.ftp_uid,
                self.ftp_gid,
                account.home_dir,
                active
            ],
        )?;

        info!(
            username = %account.username,
            active = active,
            "Synced FTP account to Pure-FTPd table"
        );
        Ok(())
    }

    async fn delete_ftp_account(&self, username: &str) -> Result<(), SyncError> {
        let conn = self.db.lock().await;
        let removed = conn.execute("DELETE FROM ftp_users WHERE user = ?1", params![username])?;
        debug!(username = username, removed = removed, "Deleted FTP account from Pure-FTPd table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DnsRecordType;
    use crate::password::{PasswordHash, Secret, hash_password};
    use chrono::{TimeZone, Utc};

    fn zone(domain: &str) -> DnsZone {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        DnsZone {
            id: 1,
            user_id: 1,
            domain: domain.to_string(),
            status: ResourceStatus::Active,
            created_at: at,
            updated_at: at,
        }
    }

    fn record(id: i64, name: &str, record_type: DnsRecordType, value: &str) -> DnsRecord {
        DnsRecord {
            id,
            zone_id: 1,
            name: name.to_string(),
            record_type,
            value: value.to_string(),
            ttl: 3600,
            priority: 10,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn tables() -> SqlProtocolTables {
        SqlProtocolTables::new(Database::open_in_memory().unwrap(), &FtpConfig::default())
            .await
            .unwrap()
    }

    #[test]
    fn serial_and_names() {
        let z = zone("example.com");
        assert_eq!(soa_serial(&z), "2026031401");
        assert_eq!(
            soa_content(&z),
            "ns1.example.com admin.example.com 2026031401 10800 3600 604800 3600"
        );
        assert_eq!(qualify("@", "example.com"), "example.com");
        assert_eq!(qualify("www", "example.com"), "www.example.com");
    }

    #[tokio::test]
    async fn zone_sync_writes_meta_then_records() {
        let tables = tables().await;
        let z = zone("example.com");
        tables
            .sync_dns_zone(
                &z,
                &[
                    record(1, "@", DnsRecordType::A, "192.0.2.1"),
                    record(2, "www", DnsRecordType::Cname, "example.com."),
                ],
            )
            .await
            .unwrap();

        let rows = tables.mirrored_records("example.com").await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].record_type, "SOA");
        assert_eq!(rows[1].content, "ns1.example.com");
        assert_eq!(rows[2].content, "ns2.example.com");
        assert_eq!(rows[3].name, "example.com");
        assert_eq!(rows[4].name, "www.example.com");
        assert!(rows.iter().all(|r| r.auth && !r.disabled));
    }

    #[tokio::test]
    async fn zone_sync_replaces_previous_set() {
        let tables = tables().await;
        let z = zone("example.com");
        tables
            .sync_dns_zone(&z, &[record(1, "old", DnsRecordType::A, "192.0.2.1")])
            .await
            .unwrap();
        tables
            .sync_dns_zone(&z, &[record(2, "new", DnsRecordType::A, "192.0.2.2")])
            .await
            .unwrap();

        let rows = tables.mirrored_records("example.com").await.unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.name != "old.example.com"));
    }

    #[tokio::test]
    async fn zone_delete_is_quiet_when_missing() {
        let tables = tables().await;
        tables.delete_dns_zone("nothing.example").await.unwrap();

        tables.sync_dns_zone(&zone("example.com"), &[]).await.unwrap();
        tables.delete_dns_zone("example.com").await.unwrap();
        assert!(!tables.has_zone("example.com").await.unwrap());
        assert!(tables.mirrored_records("example.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mailbox_upsert_keeps_one_row() {
        let tables = tables().await;
        let mut account = EmailAccount {
            id: 1,
            user_id: 1,
            email: "info@example.com".into(),
            password_hash: hash_password(&Secret::from("first")).unwrap(),
            quota_mb: 1024,
            status: ResourceStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        tables.sync_mailbox(&account).await.unwrap();

        account.password_hash = PasswordHash::from_stored("$2b$04$rotatedhashvalue");
        tables.sync_mailbox(&account).await.unwrap();

        let mirrored = tables.mirrored_mailbox("info@example.com").await.unwrap().unwrap();
        assert_eq!(mirrored.domain, "example.com");
        assert_eq!(mirrored.password, "$2b$04$rotatedhashvalue");
    }

    #[tokio::test]
    async fn ftp_row_tracks_status() {
        let tables = tables().await;
        let mut account = FtpAccount {
            id: 1,
            user_id: 1,
            username: "alice".into(),
            password_hash: hash_password(&Secret::from("pw")).unwrap(),
            home_dir: "/home/ftp/alice".into(),
            status: ResourceStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        tables.sync_ftp_account(&account).await.unwrap();
        assert!(tables.mirrored_ftp_user("alice").await.unwrap().unwrap().active);

        account.status = ResourceStatus::Suspended;
        tables.sync_ftp_account(&account).await.unwrap();
        let row = tables.mirrored_ftp_user("alice").await.unwrap().unwrap();
        assert!(!row.active);
        assert_eq!(row.uid, 2000);
        assert_eq!(row.dir, "/home/ftp/alice");
    }
}
