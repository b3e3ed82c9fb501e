use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::{RecordStore, parse_column};
use crate::error::{Error, Result};
use crate::model::{FirewallAction, FirewallRule, Protocol, ResourceStatus};

const COLUMNS: &str =
    "id, user_id, name, port, protocol, action, source, is_active, status, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<FirewallRule> {
    Ok(FirewallRule {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        port: row.get(3)?,
        protocol: parse_column(row, 4)?,
        action: parse_column(row, 5)?,
        source: row.get(6)?,
        is_active: row.get(7)?,
        status: parse_column(row, 8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Validated rule contents, ready to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleData {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
    pub action: FirewallAction,
    pub source: String,
}

impl RecordStore {
    pub async fn insert_firewall_rule(
        &self,
        user_id: i64,
        rule: &RuleData,
        status: ResourceStatus,
    ) -> Result<FirewallRule> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO firewall_rules (user_id, name, port, protocol, action, source, is_active, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?8)",
            params![
                user_id,
                rule.name,
                rule.port,
                rule.protocol.as_str(),
                rule.action.as_str(),
                rule.source,
                status.as_str(),
                Utc::now()
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            &format!("SELECT {COLUMNS} FROM firewall_rules WHERE id = ?1"),
            params![id],
            from_row,
        )?)
    }

    pub async fn firewall_rule(&self, id: i64) -> Result<Option<FirewallRule>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM firewall_rules WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()?)
    }

    pub async fn update_firewall_rule(&self, id: i64, rule: &RuleData) -> Result<FirewallRule> {
        let conn = self.conn().await;
        let changed = conn.execute(
            "UPDATE firewall_rules
             SET name = ?1, port = ?2, protocol = ?3, action = ?4, source = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                rule.name,
                rule.port,
                rule.protocol.as_str(),
                rule.action.as_str(),
                rule.source,
                Utc::now(),
                id
            ],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("firewall rule #{id}")));
        }
        Ok(conn.query_row(
            &format!("SELECT {COLUMNS} FROM firewall_rules WHERE id = ?1"),
            params![id],
            from_row,
        )?)
    }

    pub async fn set_firewall_rule_active(&self, id: i64, is_active: bool) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE firewall_rules SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![is_active, Utc::now(), id],
        )?;
        Ok(())
    }

    pub async fn list_firewall_rules(&self, user_id: Option<i64>) -> Result<Vec<FirewallRule>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM firewall_rules
             WHERE (?1 IS NULL OR user_id = ?1) ORDER BY port, id"
        ))?;
        let rules = stmt
            .query_map(params![user_id], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    /// Rules that should currently be applied on the host
    pub async fn applied_firewall_rules(&self) -> Result<Vec<FirewallRule>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM firewall_rules
             WHERE status = 'active' AND is_active = 1 ORDER BY id"
        ))?;
        let rules = stmt
            .query_map([], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    pub async fn delete_firewall_rule(&self, id: i64) -> Result<()> {
        let conn = self.conn().await;
        conn.execute("DELETE FROM firewall_rules WHERE id = ?1", params![id])?;
        Ok(())
    }
}
