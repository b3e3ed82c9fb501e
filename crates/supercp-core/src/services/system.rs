use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::{ServiceContext, query};
use crate::agent::AgentCommand;
use crate::error::{ServiceError, ValidationError};

pub const DEFAULT_LOG_LINES: u32 = 100;
const MAX_LOG_LINES: u32 = 10_000;

/// Logs the agent can tail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Daemon,
    NginxAccess,
    NginxError,
    PhpError,
}

impl LogKind {
    pub const ALL: [LogKind; 4] = [
        LogKind::Daemon,
        LogKind::NginxAccess,
        LogKind::NginxError,
        LogKind::PhpError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daemon => "daemon",
            Self::NginxAccess => "nginx_access",
            Self::NginxError => "nginx_error",
            Self::PhpError => "php_error",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown log type: {s}"))
    }
}

/// Host status queries
#[derive(Clone, Debug)]
pub struct SystemService {
    ctx: ServiceContext,
}

impl SystemService {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Round-trip to the agent
    pub async fn ping(&self) -> Result<(), ServiceError> {
        query(
            "Failed to ping system agent".to_string(),
            self.ctx.agent.send(AgentCommand::Ping),
        )
        .await?;
        Ok(())
    }

    /// Whether the agent answers at all; never fails
    pub async fn is_agent_running(&self) -> bool {
        match self.ctx.agent.send(AgentCommand::Ping).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "System agent ping failed");
                false
            }
        }
    }

    /// CPU, memory, disk and load figures; the shape is the agent's
    pub async fn stats(&self) -> Result<Value, ServiceError> {
        query(
            "Failed to get system stats".to_string(),
            self.ctx.agent.send(AgentCommand::GetSystemStats),
        )
        .await
    }

    /// Last `lines` lines of one log
    pub async fn logs(&self, kind: LogKind, lines: u32) -> Result<String, ServiceError> {
        if lines == 0 || lines > MAX_LOG_LINES {
            return Err(ValidationError::new(
                "lines",
                format!("must be between 1 and {MAX_LOG_LINES}"),
            )
            .into());
        }

        let reply = query(
            format!("Failed to fetch {kind} logs"),
            self.ctx.agent.send(AgentCommand::GetLogs {
                log_type: kind.as_str().to_string(),
                lines,
            }),
        )
        .await?;

        Ok(match reply {
            Value::String(text) => text,
            Value::Null => "No logs found or error reading logs.".to_string(),
            other => other.to_string(),
        })
    }
}
