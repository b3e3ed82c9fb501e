//! Authoritative record types and service inputs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::password::{PasswordHash, Secret};

/// Lifecycle status of an authoritative record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Row written, agent work not yet confirmed
    Pending,
    /// Agent confirmed; projections expected to exist
    Active,
    /// A stage after the row write failed
    Failed,
    /// Administratively disabled
    Suspended,
    /// Certificate renewal in flight
    Renewing,
    /// One-shot job finished (backups)
    Completed,
}

impl ResourceStatus {
    /// Storage representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Suspended => "suspended",
            Self::Renewing => "renewing",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "failed" => Ok(Self::Failed),
            "suspended" => Ok(Self::Suspended),
            "renewing" => Ok(Self::Renewing),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Resource family, used in logs and reconcile events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    WebDomain,
    DnsZone,
    DnsRecord,
    Mailbox,
    FtpAccount,
    FirewallRule,
    Database,
    Backup,
    BackupSchedule,
    SslCertificate,
    CronJob,
    /// A user's whole crontab; identified by the owner id
    Crontab,
}

impl ResourceKind {
    /// Table holding records of this kind
    pub fn table(self) -> &'static str {
        match self {
            Self::WebDomain => "web_domains",
            Self::DnsZone => "dns_zones",
            Self::DnsRecord => "dns_records",
            Self::Mailbox => "email_accounts",
            Self::FtpAccount => "ftp_accounts",
            Self::FirewallRule => "firewall_rules",
            Self::Database => "databases",
            Self::Backup => "backups",
            Self::BackupSchedule => "backup_schedules",
            Self::SslCertificate => "ssl_certificates",
            Self::CronJob | Self::Crontab => "cron_jobs",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WebDomain => "web_domain",
            Self::DnsZone => "dns_zone",
            Self::DnsRecord => "dns_record",
            Self::Mailbox => "mailbox",
            Self::FtpAccount => "ftp_account",
            Self::FirewallRule => "firewall_rule",
            Self::Database => "database",
            Self::Backup => "backup",
            Self::BackupSchedule => "backup_schedule",
            Self::SslCertificate => "ssl_certificate",
            Self::CronJob => "cron_job",
            Self::Crontab => "crontab",
        };
        f.write_str(name)
    }
}

/// Acting user, supplied by the host application's auth layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: i64,
    /// System user name (home directories, vhost ownership)
    pub name: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Web domains
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebDomain {
    pub id: i64,
    pub user_id: i64,
    pub domain: String,
    /// System user the vhost runs as
    pub owner_name: String,
    pub root_path: String,
    pub php_version: String,
    pub has_ssl: bool,
    pub ssl_certificate_path: Option<String>,
    pub ssl_key_path: Option<String>,
    pub ssl_expires_at: Option<DateTime<Utc>>,
    /// Disk usage of the document root, refreshed by reconciliation
    pub size_bytes: Option<i64>,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewWebDomain {
    pub domain: String,
    /// Defaults to `<home_root>/<owner>/web/<domain>/public`
    pub root_path: Option<String>,
    pub php_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebDomainUpdate {
    pub root_path: Option<String>,
    pub php_version: Option<String>,
}

// ---------------------------------------------------------------------------
// DNS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsZone {
    pub id: i64,
    pub user_id: i64,
    pub domain: String,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Record types accepted in user zones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
    Srv,
    Caa,
    Ns,
}

impl DnsRecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Cname => "CNAME",
            Self::Mx => "MX",
            Self::Txt => "TXT",
            Self::Srv => "SRV",
            Self::Caa => "CAA",
            Self::Ns => "NS",
        }
    }

    /// Whether `priority` is meaningful for this type
    pub fn uses_priority(self) -> bool {
        matches!(self, Self::Mx | Self::Srv)
    }
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DnsRecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "AAAA" => Ok(Self::Aaaa),
            "CNAME" => Ok(Self::Cname),
            "MX" => Ok(Self::Mx),
            "TXT" => Ok(Self::Txt),
            "SRV" => Ok(Self::Srv),
            "CAA" => Ok(Self::Caa),
            "NS" => Ok(Self::Ns),
            other => Err(format!("unsupported record type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsRecord {
    pub id: i64,
    pub zone_id: i64,
    /// Relative name; `@` is the apex
    pub name: String,
    pub record_type: DnsRecordType,
    pub value: String,
    pub ttl: u32,
    pub priority: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated record contents, ready to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordData {
    pub name: String,
    pub record_type: DnsRecordType,
    pub value: String,
    pub ttl: u32,
    pub priority: u32,
}

impl RecordData {
    /// Whether a stored record already carries these contents
    pub fn matches(&self, record: &DnsRecord) -> bool {
        self.name == record.name
            && self.record_type == record.record_type
            && self.value == record.value
            && self.ttl == record.ttl
            && self.priority == record.priority
    }
}

/// Record as submitted by a caller; the type is parsed during validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDnsRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    /// Defaults to `@`
    pub name: Option<String>,
    pub value: String,
    pub ttl: Option<u32>,
    pub priority: Option<u32>,
}

impl NewDnsRecord {
    pub fn new(record_type: &str, name: &str, value: &str) -> Self {
        Self {
            record_type: record_type.to_string(),
            name: Some(name.to_string()),
            value: value.to_string(),
            ttl: None,
            priority: None,
        }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// One entry of a bulk record edit: `id` set means update, unset means insert
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordEdit {
    pub id: Option<i64>,
    #[serde(flatten)]
    pub record: NewDnsRecord,
}

// ---------------------------------------------------------------------------
// Mail
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailAccount {
    pub id: i64,
    pub user_id: i64,
    pub email: String,
    #[serde(skip)]
    pub password_hash: PasswordHash,
    pub quota_mb: u32,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailAccount {
    /// Domain part of the address
    pub fn domain(&self) -> Option<&str> {
        self.email.split_once('@').map(|(_, d)| d)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewMailbox {
    pub email: String,
    /// A 16-character password is generated when absent
    pub password: Option<Secret>,
    pub quota_mb: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailboxUpdate {
    pub password: Option<Secret>,
    pub quota_mb: Option<u32>,
}

// ---------------------------------------------------------------------------
// FTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FtpAccount {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    #[serde(skip)]
    pub password_hash: PasswordHash,
    pub home_dir: String,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFtpAccount {
    pub username: String,
    pub password: Secret,
    /// Defaults to `<ftp_home_root>/<username>`
    pub home_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FtpAccountUpdate {
    pub password: Option<Secret>,
    pub home_dir: Option<String>,
}

// ---------------------------------------------------------------------------
// Firewall
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(format!("unsupported protocol: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirewallAction {
    Allow,
    Deny,
    Reject,
}

impl FirewallAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Reject => "reject",
        }
    }
}

impl FromStr for FirewallAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unsupported action: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirewallRule {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
    pub action: FirewallAction,
    pub source: String,
    /// Applied on the host (toggled independently of the lifecycle status)
    pub is_active: bool,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rule as submitted by a caller; enums are parsed during validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewFirewallRule {
    pub name: String,
    pub port: u32,
    pub protocol: String,
    pub action: String,
    /// Defaults to `any`
    pub source: Option<String>,
}

// ---------------------------------------------------------------------------
// Databases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseRecord {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub db_user: String,
    #[serde(skip)]
    pub password_hash: PasswordHash,
    pub db_type: String,
    pub collation: String,
    pub max_connections: u32,
    /// Data plus index size, refreshed by reconciliation
    pub size_bytes: Option<i64>,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDatabase {
    pub name: String,
    pub password: Secret,
    /// Only `mysql` is supported; defaults to it
    pub db_type: Option<String>,
    pub max_connections: Option<u32>,
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Web,
    Database,
}

impl BackupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Database => "database",
        }
    }
}

impl FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Self::Web),
            "database" => Ok(Self::Database),
            other => Err(format!("unsupported backup type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Backup {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub kind: BackupKind,
    /// Domain for web backups, database name for database backups
    pub source: String,
    /// Archive path reported by the agent
    pub path: Option<String>,
    pub size_bytes: Option<i64>,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How often a schedule fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleFrequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl ScheduleFrequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl FromStr for ScheduleFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(format!("unsupported frequency: {other}")),
        }
    }
}

/// What a schedule archives on each run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleScope {
    /// Every web domain and database of the owner
    Full,
    DatabaseOnly,
    FilesOnly,
}

impl ScheduleScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::DatabaseOnly => "database_only",
            Self::FilesOnly => "files_only",
        }
    }
}

impl FromStr for ScheduleScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "database_only" => Ok(Self::DatabaseOnly),
            "files_only" => Ok(Self::FilesOnly),
            other => Err(format!("unsupported backup type: {other}")),
        }
    }
}

/// Named sources for the non-full scopes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTargets {
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub web_domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupSchedule {
    pub id: i64,
    pub user_id: i64,
    /// System user the archives are made for
    pub owner_name: String,
    pub name: String,
    pub frequency: ScheduleFrequency,
    /// Local wall-clock `HH:MM`
    pub time: String,
    pub scope: ScheduleScope,
    pub targets: ScheduleTargets,
    pub retention_days: u32,
    pub is_enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: u32,
    pub failed_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewBackupSchedule {
    pub name: String,
    pub frequency: String,
    /// Defaults to `02:00`
    pub time: Option<String>,
    #[serde(rename = "backup_type")]
    pub scope: String,
    #[serde(default)]
    pub targets: ScheduleTargets,
    /// Defaults to 30
    pub retention_days: Option<u32>,
}

// ---------------------------------------------------------------------------
// Cron
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CronJob {
    pub id: i64,
    pub user_id: i64,
    /// System user whose crontab carries the job
    pub owner_name: String,
    pub command: String,
    /// Five-field expression or an `@` macro
    pub schedule: String,
    pub description: Option<String>,
    /// Included in the pushed crontab
    pub is_active: bool,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCronJob {
    pub command: String,
    pub schedule: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CronJobUpdate {
    pub command: Option<String>,
    pub schedule: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslProvider {
    LetsEncrypt,
    Custom,
}

impl SslProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LetsEncrypt => "letsencrypt",
            Self::Custom => "custom",
        }
    }
}

impl FromStr for SslProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "letsencrypt" => Ok(Self::LetsEncrypt),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown certificate provider: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SslCertificate {
    pub id: i64,
    pub user_id: i64,
    pub web_domain_id: i64,
    pub domain: String,
    pub provider: SslProvider,
    pub certificate_path: Option<String>,
    pub key_path: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub renewal_attempts: u32,
    pub auto_renewal: bool,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// PEM material for a custom certificate
#[derive(Debug, Clone, Deserialize)]
pub struct CustomCertificate {
    pub certificate: String,
    pub private_key: Secret,
    pub chain: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_storage_form() {
        for status in [
            ResourceStatus::Pending,
            ResourceStatus::Active,
            ResourceStatus::Failed,
            ResourceStatus::Suspended,
            ResourceStatus::Renewing,
            ResourceStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<ResourceStatus>(), Ok(status));
        }
        assert!("deleted".parse::<ResourceStatus>().is_err());
    }

    #[test]
    fn record_type_parse_is_case_insensitive() {
        assert_eq!("aaaa".parse::<DnsRecordType>(), Ok(DnsRecordType::Aaaa));
        assert_eq!("MX".parse::<DnsRecordType>(), Ok(DnsRecordType::Mx));
        assert!("SOA".parse::<DnsRecordType>().is_err());
        assert!(DnsRecordType::Mx.uses_priority());
        assert!(!DnsRecordType::A.uses_priority());
    }

    #[test]
    fn bulk_edit_deserializes_flat() {
        let edit: RecordEdit =
            serde_json::from_str(r#"{"id": 4, "type": "A", "name": "www", "value": "1.2.3.4"}"#)
                .unwrap();
        assert_eq!(edit.id, Some(4));
        assert_eq!(edit.record.record_type, "A");
        assert_eq!(edit.record.name.as_deref(), Some("www"));
    }
}
