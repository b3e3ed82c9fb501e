//! System agent protocol
//!
//! [`AgentCommand`] is the typed method surface of the agent. [`AgentClient`]
//! sends commands through any [`AgentTransport`] and interprets the reply
//! envelope: `{"result": ...}` on success, `{"error": {"code", "message"}}`
//! on failure.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AGENT_HANDLER_ERROR, Error, Result};
use crate::model::{CronJob, DnsRecord, FirewallRule, WebDomain};
use crate::password::Secret;
use crate::traits::{AgentTransport, Params};

/// A request to the system agent
///
/// Serializes with adjacent tagging into the wire `method`/`params` pair.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum AgentCommand {
    CreateVhost {
        domain: String,
        user: String,
        root: String,
        php_version: String,
        has_ssl: bool,
        ssl_certificate_path: Option<String>,
        ssl_key_path: Option<String>,
    },
    DeleteVhost {
        domain: String,
        user: String,
        php_version: String,
    },
    ListVhosts,

    CreateDirectory {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    ReadFile {
        path: String,
    },
    DeleteFile {
        path: String,
    },
    RenameFile {
        from: String,
        to: String,
    },
    ListFiles {
        path: String,
    },

    CreateDatabase {
        name: String,
        user: String,
        password: Secret,
        #[serde(rename = "type")]
        db_type: String,
    },
    DeleteDatabase {
        name: String,
    },
    GetDatabaseSize {
        name: String,
    },
    GetDirectorySize {
        path: String,
    },

    UpdateEmailAccount {
        email: String,
        password: Secret,
        quota_mb: u32,
    },
    DeleteEmailAccount {
        email: String,
    },

    CreateFtpUser {
        username: String,
        password: Secret,
        homedir: String,
    },
    DeleteFtpUser {
        username: String,
    },
    ListFtpUsers,

    UpdateDnsZone {
        domain: String,
        records: Vec<ZoneRecord>,
    },
    DeleteDnsZone {
        domain: String,
    },

    ApplyFirewallRule {
        port: u16,
        protocol: String,
        action: String,
        source: String,
    },
    DeleteFirewallRule {
        port: u16,
        protocol: String,
        action: String,
    },
    ToggleFirewall {
        enable: bool,
    },
    GetFirewallStatus,

    CreateBackup {
        name: String,
        source_path: String,
    },
    CreateDbBackup {
        db_name: String,
    },
    RestoreBackup {
        path: String,
        target_path: String,
    },
    RestoreDbBackup {
        path: String,
        db_name: String,
    },

    /// Replaces the user's whole crontab
    UpdateCronJobs {
        user: String,
        jobs: Vec<CronEntry>,
    },
    ListCronJobs {
        user: String,
    },

    GetSystemStats,
    GetLogs {
        #[serde(rename = "type")]
        log_type: String,
        lines: u32,
    },

    RequestSslCert {
        domain: String,
        email: String,
    },

    Ping,

    /// Any method outside the typed surface
    #[serde(skip)]
    Raw { method: String, params: Params },
}

impl AgentCommand {
    /// (Re)create the vhost of a stored web domain with its current SSL state
    pub fn create_vhost(web: &WebDomain) -> Self {
        Self::CreateVhost {
            domain: web.domain.clone(),
            user: web.owner_name.clone(),
            root: web.root_path.clone(),
            php_version: web.php_version.clone(),
            has_ssl: web.has_ssl,
            ssl_certificate_path: web.ssl_certificate_path.clone(),
            ssl_key_path: web.ssl_key_path.clone(),
        }
    }

    /// Full-set zone push built from authoritative records
    pub fn update_dns_zone(domain: &str, records: &[DnsRecord]) -> Self {
        Self::UpdateDnsZone {
            domain: domain.to_string(),
            records: records.iter().map(ZoneRecord::from).collect(),
        }
    }

    /// Full-set crontab push for one system user
    pub fn update_cron_jobs(user: &str, jobs: &[CronJob]) -> Self {
        Self::UpdateCronJobs {
            user: user.to_string(),
            jobs: jobs.iter().map(CronEntry::from).collect(),
        }
    }

    /// Apply a stored firewall rule
    pub fn apply_firewall_rule(rule: &FirewallRule) -> Self {
        Self::ApplyFirewallRule {
            port: rule.port,
            protocol: rule.protocol.as_str().to_string(),
            action: rule.action.as_str().to_string(),
            source: rule.source.clone(),
        }
    }

    /// Remove a stored firewall rule
    pub fn delete_firewall_rule(rule: &FirewallRule) -> Self {
        Self::DeleteFirewallRule {
            port: rule.port,
            protocol: rule.protocol.as_str().to_string(),
            action: rule.action.as_str().to_string(),
        }
    }

    /// Split into wire method name and params object
    ///
    /// Unit variants get an empty params object.
    pub fn into_parts(self) -> Result<(String, Params)> {
        if let Self::Raw { method, params } = self {
            return Ok((method, params));
        }

        let Value::Object(mut envelope) = serde_json::to_value(self)? else {
            return Err(Error::Other("agent command did not serialize to an object".into()));
        };

        let method = match envelope.remove("method") {
            Some(Value::String(method)) => method,
            _ => return Err(Error::Other("agent command has no method tag".into())),
        };
        let params = match envelope.remove("params") {
            Some(Value::Object(params)) => params,
            _ => Params::new(),
        };

        Ok((method, params))
    }
}

/// One record inside an `update_dns_zone` push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub value: String,
    pub ttl: u32,
    pub priority: u32,
}

impl From<&DnsRecord> for ZoneRecord {
    fn from(record: &DnsRecord) -> Self {
        Self {
            name: record.name.clone(),
            record_type: record.record_type.as_str().to_string(),
            value: record.value.clone(),
            ttl: record.ttl,
            priority: record.priority,
        }
    }
}

/// One line of an `update_cron_jobs` push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronEntry {
    pub command: String,
    pub schedule: String,
}

impl From<&CronJob> for CronEntry {
    fn from(job: &CronJob) -> Self {
        Self {
            command: job.command.clone(),
            schedule: job.schedule.clone(),
        }
    }
}

/// Reply to `get_firewall_status`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FirewallStatus {
    /// `active` or `inactive`
    pub status: String,
    #[serde(default)]
    pub rules: Vec<FirewallStatusRule>,
}

impl FirewallStatus {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// A rule as reported by the host firewall
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FirewallStatusRule {
    pub port: u64,
    pub protocol: String,
    pub action: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// Client for the system agent
///
/// Cheap to clone; holds only the shared transport.
#[derive(Clone)]
pub struct AgentClient {
    transport: Arc<dyn AgentTransport>,
}

impl AgentClient {
    pub fn new(transport: Arc<dyn AgentTransport>) -> Self {
        Self { transport }
    }

    /// Send a command and return its `result`
    ///
    /// An error envelope becomes [`Error::Agent`]. A reply with neither
    /// `result` nor `error` yields `Value::Null`.
    pub async fn send(&self, command: AgentCommand) -> Result<Value> {
        let (method, params) = command.into_parts()?;
        debug!(
            method = %method,
            transport = self.transport.transport_name(),
            "Calling system agent"
        );

        let reply = self.transport.call(&method, params).await?;
        interpret_reply(reply)
    }

    /// Send a command and decode its `result` into `T`
    pub async fn send_as<T: DeserializeOwned>(&self, command: AgentCommand) -> Result<T> {
        let value = self.send(command).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a command whose `result` is a string (paths, messages)
    pub async fn send_for_string(&self, command: AgentCommand) -> Result<String> {
        match self.send(command).await? {
            Value::String(s) => Ok(s),
            other => Err(Error::Other(format!(
                "expected a string result from system agent, got {other}"
            ))),
        }
    }
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClient")
            .field("transport", &self.transport.transport_name())
            .finish()
    }
}

fn interpret_reply(mut reply: Value) -> Result<Value> {
    let Some(envelope) = reply.as_object_mut() else {
        return Ok(Value::Null);
    };

    if let Some(error) = envelope.remove("error").filter(|e| !e.is_null()) {
        let code = error
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(AGENT_HANDLER_ERROR);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown agent error")
            .to_string();
        return Err(Error::agent(code, message));
    }

    Ok(envelope.remove("result").unwrap_or(Value::Null))
}
