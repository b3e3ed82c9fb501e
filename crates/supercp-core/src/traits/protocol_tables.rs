// # Protocol Tables Trait
//
// Defines how authoritative records are mirrored into the relational tables
// that PowerDNS, Postfix/Dovecot and Pure-FTPd read directly.
//
// ## Purpose
//
// The mirrored rows are derived data: every write regenerates the full
// projection of one resource from its authoritative record, so a resync is
// always safe and repeated syncs of unchanged state produce identical rows.
//
// ## Implementations
//
// - SQLite: [`SqlProtocolTables`](crate::sync::SqlProtocolTables)

use async_trait::async_trait;

use crate::error::SyncError;
use crate::model::{DnsRecord, DnsZone, EmailAccount, FtpAccount};

/// Trait for protocol-table synchronizers
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Atomicity
///
/// `sync_dns_zone` runs inside one local transaction: a reader sees either
/// the previous full record set or the new one, never a partial set.
#[async_trait]
pub trait ProtocolTables: Send + Sync {
    /// Replace the zone's mirrored rows with SOA, NS and `records`
    async fn sync_dns_zone(&self, zone: &DnsZone, records: &[DnsRecord]) -> Result<(), SyncError>;

    /// Remove the zone and all its mirrored records
    async fn delete_dns_zone(&self, domain: &str) -> Result<(), SyncError>;

    /// Ensure the mail domain exists and upsert the mailbox row
    async fn sync_mailbox(&self, account: &EmailAccount) -> Result<(), SyncError>;

    /// Remove the mailbox row
    async fn delete_mailbox(&self, email: &str) -> Result<(), SyncError>;

    /// Upsert the FTP row; inactive accounts are mirrored disabled
    async fn sync_ftp_account(&self, account: &FtpAccount) -> Result<(), SyncError>;

    /// Remove the FTP row
    async fn delete_ftp_account(&self, username: &str) -> Result<(), SyncError>;
}
