//! Configuration types for the SuperCP control plane
//!
//! A single [`PanelConfig`] is built once (by the daemon from the
//! environment, or by a host application) and handed to every component
//! explicitly.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main control-plane configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PanelConfig {
    /// System agent connection settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Record store and protocol-table locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// DNS zone defaults
    #[serde(default)]
    pub dns: DnsConfig,

    /// Mailbox defaults
    #[serde(default)]
    pub mail: MailConfig,

    /// FTP account defaults
    #[serde(default)]
    pub ftp: FtpConfig,

    /// Web domain defaults
    #[serde(default)]
    pub web: WebConfig,

    /// Backup archive settings
    #[serde(default)]
    pub backup: BackupConfig,

    /// Certificate settings
    #[serde(default)]
    pub ssl: SslConfig,

    /// Scheduled reconciliation settings
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl PanelConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.agent.validate()?;
        self.dns.validate()?;
        self.reconcile.validate()?;

        if self.mail.default_quota_mb == 0 {
            return Err(crate::Error::config("Default mailbox quota must be > 0"));
        }
        if !self.ftp.home_root.starts_with('/') {
            return Err(crate::Error::config("FTP home root must be an absolute path"));
        }
        if !self.web.home_root.starts_with('/') {
            return Err(crate::Error::config("Web home root must be an absolute path"));
        }

        Ok(())
    }
}

/// System agent connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unix socket the agent listens on
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Bound on the connect stage, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl AgentConfig {
    /// Connect timeout as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(crate::Error::config("Agent socket path cannot be empty"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(crate::Error::config("Agent connect timeout must be > 0"));
        }
        if self.connect_timeout_secs > 60 {
            return Err(crate::Error::config(
                "Agent connect timeout must be at most 60 seconds",
            ));
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/supercp/super-daemon.sock")
}

fn default_connect_timeout_secs() -> u64 {
    5
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding the authoritative records
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// SQLite file holding the protocol-daemon tables
    ///
    /// When unset the tables live next to the authoritative records.
    #[serde(default)]
    pub protocol_database_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            protocol_database_path: None,
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/supercp/supercp.db")
}

/// DNS zone defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address used for the seeded `@` and `www` A records
    #[serde(default = "default_dns_ip")]
    pub default_ip: String,

    /// Nameservers seeded as `NS @` records on zone creation
    #[serde(default = "default_nameservers")]
    pub nameservers: Vec<String>,

    /// TTL for records created without one
    #[serde(default = "default_ttl")]
    pub default_ttl: u32,

    /// Priority for records created without one
    #[serde(default = "default_priority")]
    pub default_priority: u32,
}

impl DnsConfig {
    fn validate(&self) -> Result<(), crate::Error> {
        if self.default_ip.parse::<IpAddr>().is_err() {
            return Err(crate::Error::config(format!(
                "DNS default IP is not a valid address: {}",
                self.default_ip
            )));
        }
        if self.nameservers.iter().any(|ns| ns.trim().is_empty()) {
            return Err(crate::Error::config("DNS nameservers cannot be empty"));
        }
        if self.default_ttl == 0 {
            return Err(crate::Error::config("DNS default TTL must be > 0"));
        }
        Ok(())
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            default_ip: default_dns_ip(),
            nameservers: default_nameservers(),
            default_ttl: default_ttl(),
            default_priority: default_priority(),
        }
    }
}

fn default_dns_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_nameservers() -> Vec<String> {
    vec!["ns1.supercp.com.".to_string(), "ns2.supercp.com.".to_string()]
}

fn default_ttl() -> u32 {
    3600
}

fn default_priority() -> u32 {
    10
}

/// Mailbox defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Quota applied when a mailbox is created without one
    #[serde(default = "default_quota_mb")]
    pub default_quota_mb: u32,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            default_quota_mb: default_quota_mb(),
        }
    }
}

fn default_quota_mb() -> u32 {
    1024
}

/// FTP account defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpConfig {
    /// Parent of default FTP home directories
    #[serde(default = "default_ftp_home_root")]
    pub home_root: String,

    /// Virtual uid written to `ftp_users`
    #[serde(default = "default_ftp_id")]
    pub uid: u32,

    /// Virtual gid written to `ftp_users`
    #[serde(default = "default_ftp_id")]
    pub gid: u32,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            home_root: default_ftp_home_root(),
            uid: default_ftp_id(),
            gid: default_ftp_id(),
        }
    }
}

fn default_ftp_home_root() -> String {
    "/home/ftp".to_string()
}

fn default_ftp_id() -> u32 {
    2000
}

/// Web domain defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Parent of per-user web trees (`<home_root>/<user>/web/<domain>`)
    #[serde(default = "default_web_home_root")]
    pub home_root: String,

    /// PHP version used when none is requested
    #[serde(default = "default_php_version")]
    pub default_php_version: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            home_root: default_web_home_root(),
            default_php_version: default_php_version(),
        }
    }
}

fn default_web_home_root() -> String {
    "/home".to_string()
}

fn default_php_version() -> String {
    "8.4".to_string()
}

/// Backup archive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory the agent writes archives into
    #[serde(default = "default_backup_dir")]
    pub directory: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: default_backup_dir(),
        }
    }
}

fn default_backup_dir() -> String {
    "/var/lib/supercp/backups".to_string()
}

/// Certificate settings
#[derive(Clone, Serialize, Deserialize)]
pub struct SslConfig {
    /// Where certbot leaves issued certificates
    #[serde(default = "default_letsencrypt_live_dir")]
    pub letsencrypt_live_dir: String,

    /// Where custom certificates are written
    #[serde(default = "default_custom_cert_dir")]
    pub custom_cert_dir: String,

    /// Contact address for ACME registration
    ///
    /// Falls back to the owner's address when unset.
    #[serde(default)]
    pub admin_email: Option<String>,

    /// Lifetime assumed when the agent does not report an expiry
    #[serde(default = "default_validity_days")]
    pub default_validity_days: i64,
}

impl std::fmt::Debug for SslConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SslConfig")
            .field("letsencrypt_live_dir", &self.letsencrypt_live_dir)
            .field("custom_cert_dir", &self.custom_cert_dir)
            .field("admin_email", &self.admin_email.as_ref().map(|_| "<set>"))
            .field("default_validity_days", &self.default_validity_days)
            .finish()
    }
}

impl Default for SslConfig {
    fn default() -> Self {
        Self {
            letsencrypt_live_dir: default_letsencrypt_live_dir(),
            custom_cert_dir: default_custom_cert_dir(),
            admin_email: None,
            default_validity_days: default_validity_days(),
        }
    }
}

fn default_letsencrypt_live_dir() -> String {
    "/etc/letsencrypt/live".to_string()
}

fn default_custom_cert_dir() -> String {
    "/etc/supercp/ssl".to_string()
}

fn default_validity_days() -> i64 {
    90
}

/// Scheduled reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between full resync passes
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,

    /// Event channel capacity
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl ReconcileConfig {
    fn validate(&self) -> Result<(), crate::Error> {
        if self.interval_secs == 0 {
            return Err(crate::Error::config("Reconcile interval must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_reconcile_interval() -> u64 {
    3600
}

fn default_event_channel_capacity() -> usize {
    100
}
