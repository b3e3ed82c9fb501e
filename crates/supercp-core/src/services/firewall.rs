use std::net::IpAddr;
use std::sync::OnceLock;
use tracing::info;

use super::{ServiceContext, find, query};
use crate::agent::{AgentCommand, FirewallStatus};
use crate::boundary;
use crate::error::{Result, ServiceError, ValidationError};
use crate::model::{
    FirewallAction, FirewallRule, NewFirewallRule, Owner, Protocol, ResourceKind, ResourceStatus,
};
use crate::store::RuleData;

const ANY_SOURCE: &str = "any";

/// Host firewall rules
#[derive(Clone, Debug)]
pub struct FirewallService {
    ctx: ServiceContext,
}

impl FirewallService {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create_rule(
        &self,
        owner: &Owner,
        input: &NewFirewallRule,
    ) -> Result<FirewallRule, ServiceError> {
        let data = validate_rule(input)?;
        let created = OnceLock::new();
        let created = &created;
        let store = &self.ctx.store;

        let rule = boundary::execute_with_rollback(
            format!("Failed to create firewall rule for port: {}", data.port),
            async {
                let rule = store
                    .insert_firewall_rule(owner.id, &data, ResourceStatus::Pending)
                    .await?;
                let _ = created.set(rule.id);

                self.ctx
                    .agent
                    .send(AgentCommand::apply_firewall_rule(&rule))
                    .await?;
                info!(port = rule.port, protocol = %rule.protocol.as_str(), "Firewall rule applied on system agent");

                store
                    .set_status(ResourceKind::FirewallRule, rule.id, ResourceStatus::Active)
                    .await?;
                self.reload(rule.id).await
            },
            |cause| async move {
                if let Some(id) = created.get() {
                    self.ctx.mark_failed(ResourceKind::FirewallRule, *id, &cause).await;
                }
            },
        )
        .await?;

        info!(id = rule.id, port = rule.port, "Firewall rule created");
        Ok(rule)
    }

    /// Replace a rule: the old one is removed from the host before the new
    /// one is applied
    pub async fn update_rule(
        &self,
        id: i64,
        input: &NewFirewallRule,
    ) -> Result<FirewallRule, ServiceError> {
        let data = validate_rule(input)?;
        let old = self.get(id).await?;

        let rule = boundary::execute(
            format!("Failed to update firewall rule for port: {}", old.port),
            async {
                if old.is_active {
                    self.ctx
                        .agent
                        .send(AgentCommand::delete_firewall_rule(&old))
                        .await?;
                }
                let rule = self.ctx.store.update_firewall_rule(old.id, &data).await?;
                if rule.is_active {
                    self.ctx
                        .agent
                        .send(AgentCommand::apply_firewall_rule(&rule))
                        .await?;
                }
                Ok(rule)
            },
        )
        .await?;

        info!(
            id = rule.id,
            port = rule.port,
            protocol = %rule.protocol.as_str(),
            "Firewall rule updated"
        );
        Ok(rule)
    }

    /// Remove from the host, then delete the row
    pub async fn delete_rule(&self, id: i64) -> Result<(), ServiceError> {
        let rule = self.get(id).await?;

        boundary::execute(
            format!("Failed to delete firewall rule for port: {}", rule.port),
            async {
                self.ctx
                    .agent
                    .send(AgentCommand::delete_firewall_rule(&rule))
                    .await?;
                info!(port = rule.port, protocol = %rule.protocol.as_str(), "Firewall rule deleted from system agent");

                self.ctx.store.delete_firewall_rule(rule.id).await
            },
        )
        .await?;

        info!(id = rule.id, port = rule.port, "Firewall rule deleted");
        Ok(())
    }

    /// Apply or remove the rule on the host, then persist the flipped
    /// `is_active`
    ///
    /// The stored flag only changes once the agent has confirmed.
    pub async fn toggle_rule(&self, id: i64) -> Result<FirewallRule, ServiceError> {
        let rule = self.get(id).await?;
        let toggled = FirewallRule {
            is_active: !rule.is_active,
            ..rule.clone()
        };

        let rule = boundary::execute(
            format!("Failed to toggle firewall rule for port: {}", rule.port),
            async {
                self.apply(&toggled).await?;
                self.ctx
                    .store
                    .set_firewall_rule_active(toggled.id, toggled.is_active)
                    .await?;
                self.reload(toggled.id).await
            },
        )
        .await?;

        info!(port = rule.port, is_active = rule.is_active, "Firewall rule toggled");
        Ok(rule)
    }

    /// Re-apply (or re-remove) one rule from its stored state
    pub async fn resync_rule(&self, id: i64) -> Result<(), ServiceError> {
        let rule = self.get(id).await?;
        if rule.status != ResourceStatus::Active {
            return Err(ValidationError::new(
                "status",
                format!("firewall rule #{} is {}", rule.id, rule.status),
            )
            .into());
        }

        boundary::execute(
            format!("Failed to sync firewall rule for port: {}", rule.port),
            self.apply(&rule),
        )
        .await?;
        Ok(())
    }

    pub async fn enable(&self) -> Result<(), ServiceError> {
        self.toggle_firewall(true).await
    }

    pub async fn disable(&self) -> Result<(), ServiceError> {
        self.toggle_firewall(false).await
    }

    /// Host firewall state as reported by the agent
    pub async fn status(&self) -> Result<FirewallStatus, ServiceError> {
        query(
            "Failed to get firewall status".to_string(),
            self.ctx.agent.send_as(AgentCommand::GetFirewallStatus),
        )
        .await
    }

    pub async fn get(&self, id: i64) -> Result<FirewallRule, ServiceError> {
        find(format!("firewall rule #{id}"), self.ctx.store.firewall_rule(id)).await
    }

    pub async fn list(&self, owner: Option<&Owner>) -> Result<Vec<FirewallRule>, ServiceError> {
        query(
            "Failed to list firewall rules".to_string(),
            self.ctx.store.list_firewall_rules(owner.map(|o| o.id)),
        )
        .await
    }

    async fn toggle_firewall(&self, enable: bool) -> Result<(), ServiceError> {
        let context = if enable {
            "Failed to enable firewall"
        } else {
            "Failed to disable firewall"
        };
        boundary::execute(
            context,
            self.ctx.agent.send(AgentCommand::ToggleFirewall { enable }),
        )
        .await?;

        info!(enabled = enable, "Firewall toggled");
        Ok(())
    }

    async fn apply(&self, rule: &FirewallRule) -> Result<()> {
        let command = if rule.is_active {
            AgentCommand::apply_firewall_rule(rule)
        } else {
            AgentCommand::delete_firewall_rule(rule)
        };
        self.ctx.agent.send(command).await?;
        Ok(())
    }

    async fn reload(&self, id: i64) -> Result<FirewallRule> {
        self.ctx
            .store
            .firewall_rule(id)
            .await?
            .ok_or_else(|| crate::Error::not_found(format!("firewall rule #{id}")))
    }
}

fn validate_rule(input: &NewFirewallRule) -> Result<RuleData, ValidationError> {
    let port = u16::try_from(input.port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ValidationError::new("port", "Port must be between 1 and 65535"))?;
    let protocol: Protocol = input
        .protocol
        .parse()
        .map_err(|_| ValidationError::new("protocol", "Invalid protocol. Must be tcp or udp"))?;
    let action: FirewallAction = input.action.parse().map_err(|_| {
        ValidationError::new("action", "Invalid action. Must be allow, deny, or reject")
    })?;

    let source = input
        .source
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(ANY_SOURCE)
        .to_string();
    if source != ANY_SOURCE && !is_address_or_network(&source) {
        return Err(ValidationError::new(
            "source",
            format!("must be 'any', an IP address or a CIDR network: {source}"),
        ));
    }

    let name = match input.name.trim() {
        "" => format!("{}/{}", port, protocol.as_str()),
        name => name.to_string(),
    };

    Ok(RuleData {
        name,
        port,
        protocol,
        action,
        source,
    })
}

fn is_address_or_network(source: &str) -> bool {
    match source.split_once('/') {
        None => source.parse::<IpAddr>().is_ok(),
        Some((addr, prefix)) => match (addr.parse::<IpAddr>(), prefix.parse::<u8>()) {
            (Ok(IpAddr::V4(_)), Ok(len)) => len <= 32,
            (Ok(IpAddr::V6(_)), Ok(len)) => len <= 128,
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(port: u32, protocol: &str, action: &str, source: Option<&str>) -> NewFirewallRule {
        NewFirewallRule {
            name: String::new(),
            port,
            protocol: protocol.to_string(),
            action: action.to_string(),
            source: source.map(str::to_string),
        }
    }

    #[test]
    fn defaults_fill_name_and_source() {
        let data = validate_rule(&input(443, "tcp", "allow", None)).unwrap();
        assert_eq!(data.name, "443/tcp");
        assert_eq!(data.source, "any");
        assert_eq!(data.action, FirewallAction::Allow);
    }

    #[test]
    fn rejects_out_of_range_and_unknown_values() {
        assert_eq!(validate_rule(&input(0, "tcp", "allow", None)).unwrap_err().field, "port");
        assert_eq!(validate_rule(&input(70000, "tcp", "allow", None)).unwrap_err().field, "port");
        assert_eq!(validate_rule(&input(22, "icmp", "allow", None)).unwrap_err().field, "protocol");
        assert_eq!(validate_rule(&input(22, "tcp", "drop", None)).unwrap_err().field, "action");
        assert_eq!(
            validate_rule(&input(22, "tcp", "deny", Some("10.0.0.0/33"))).unwrap_err().field,
            "source"
        );
    }

    #[test]
    fn accepts_addresses_and_networks() {
        assert!(is_address_or_network("203.0.113.9"));
        assert!(is_address_or_network("10.0.0.0/8"));
        assert!(is_address_or_network("2001:db8::/32"));
        assert!(!is_address_or_network("example.com"));
    }
}
