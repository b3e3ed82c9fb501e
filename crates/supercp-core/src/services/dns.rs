use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;
use tracing::{info, warn};

use super::{ServiceContext, find, query};
use crate::agent::AgentCommand;
use crate::boundary;
use crate::error::{Result, ServiceError, ValidationError};
use crate::model::{
    DnsRecord, DnsRecordType, DnsZone, NewDnsRecord, Owner, RecordData, RecordEdit, ResourceKind,
    ResourceStatus,
};
use crate::validation;

const MAX_TTL: u32 = 604_800;
const MAX_VALUE_LEN: usize = 4096;

/// DNS zones and records
#[derive(Clone, Debug)]
pub struct DnsService {
    ctx: ServiceContext,
}

impl DnsService {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Create a zone seeded with the default records
    ///
    /// Seeds `A @`, `A www` (default address) and one `NS @` per configured
    /// nameserver, pushes the set to the agent, then mirrors it.
    pub async fn create_zone(&self, owner: &Owner, domain: &str) -> Result<DnsZone, ServiceError> {
        validation::domain("domain", domain)?;
        let domain = domain.to_ascii_lowercase();
        let domain = domain.as_str();

        let existing = query(
            format!("Failed to look up DNS zone: {domain}"),
            self.ctx.store.dns_zone_by_domain(domain),
        )
        .await?;
        if existing.is_some() {
            return Err(ValidationError::new("domain", "DNS zone already exists").into());
        }

        let defaults = self.default_records();
        let created = OnceLock::new();
        let created = &created;
        let store = &self.ctx.store;

        let zone = boundary::execute_with_rollback(
            format!("Failed to create DNS zone: {domain}"),
            async {
                let zone = store
                    .insert_dns_zone(owner.id, domain, ResourceStatus::Pending)
                    .await?;
                let _ = created.set(zone.id);
                store.insert_dns_records(zone.id, &defaults).await?;

                let records = store.dns_records(zone.id).await?;
                self.ctx
                    .agent
                    .send(AgentCommand::update_dns_zone(domain, &records))
                    .await?;

                store
                    .set_status(ResourceKind::DnsZone, zone.id, ResourceStatus::Active)
                    .await?;
                let zone = self.reload(zone.id).await?;
                self.ctx.tables.sync_dns_zone(&zone, &records).await?;
                Ok(zone)
            },
            |cause| async move {
                if let Some(id) = created.get() {
                    self.ctx.mark_failed(ResourceKind::DnsZone, *id, &cause).await;
                    self.drop_projection(domain).await;
                }
            },
        )
        .await?;

        info!(domain = %zone.domain, user_id = owner.id, "DNS zone created");
        Ok(zone)
    }

    /// Add a record and push the zone's full set
    ///
    /// On failure the new row stays; the next push or resync converges it.
    pub async fn add_record(
        &self,
        zone_id: i64,
        input: &NewDnsRecord,
    ) -> Result<DnsRecord, ServiceError> {
        let data = self.validate_record(input)?;
        let zone = self.active_zone(zone_id).await?;

        let record = boundary::execute(
            format!("Failed to add DNS record to zone: {}", zone.domain),
            async {
                let record = self.ctx.store.insert_dns_record(zone.id, &data).await?;
                self.push(zone.id).await?;
                Ok(record)
            },
        )
        .await?;

        info!(
            zone = %zone.domain,
            name = %record.name,
            record_type = %record.record_type,
            "DNS record added"
        );
        Ok(record)
    }

    /// Replace one record's contents and push the zone's full set
    pub async fn update_record(
        &self,
        record_id: i64,
        input: &NewDnsRecord,
    ) -> Result<DnsRecord, ServiceError> {
        let data = self.validate_record(input)?;
        let existing = find(
            format!("DNS record #{record_id}"),
            self.ctx.store.dns_record(record_id),
        )
        .await?;
        let zone = self.active_zone(existing.zone_id).await?;

        let record = boundary::execute(
            format!("Failed to update DNS record: {}", existing.name),
            async {
                let record = self.ctx.store.update_dns_record(record_id, &data).await?;
                self.push(zone.id).await?;
                Ok(record)
            },
        )
        .await?;

        info!(zone = %zone.domain, name = %record.name, "DNS record updated");
        Ok(record)
    }

    /// Delete one record and push the zone's remaining set
    pub async fn delete_record(&self, record_id: i64) -> Result<(), ServiceError> {
        let existing = find(
            format!("DNS record #{record_id}"),
            self.ctx.store.dns_record(record_id),
        )
        .await?;
        let zone = self.active_zone(existing.zone_id).await?;

        boundary::execute(
            format!("Failed to delete DNS record: {}", existing.name),
            async {
                self.ctx.store.delete_dns_record(record_id).await?;
                self.push(zone.id).await
            },
        )
        .await?;

        info!(zone = %zone.domain, name = %existing.name, "DNS record deleted");
        Ok(())
    }

    /// Bulk edit: entries with an id update, entries without insert, and
    /// records not named are deleted; then one full-set push
    pub async fn replace_records(
        &self,
        zone_id: i64,
        edits: &[RecordEdit],
    ) -> Result<Vec<DnsRecord>, ServiceError> {
        let mut validated = Vec::with_capacity(edits.len());
        for edit in edits {
            validated.push((edit.id, self.validate_record(&edit.record)?));
        }

        let zone = self.active_zone(zone_id).await?;
        let current = query(
            format!("Failed to load DNS records for zone: {}", zone.domain),
            self.ctx.store.dns_records(zone.id),
        )
        .await?;
        let known: HashSet<i64> = current.iter().map(|r| r.id).collect();
        if let Some(id) = validated.iter().filter_map(|(id, _)| *id).find(|id| !known.contains(id)) {
            return Err(ValidationError::new(
                "id",
                format!("record #{id} does not belong to zone {}", zone.domain),
            )
            .into());
        }

        let records = boundary::execute(
            format!("Failed to sync DNS records for zone: {}", zone.domain),
            async {
                self.ctx.store.apply_record_edits(zone.id, &validated).await?;
                self.push(zone.id).await?;
                self.ctx.store.dns_records(zone.id).await
            },
        )
        .await?;

        info!(zone = %zone.domain, records = records.len(), "DNS records replaced");
        Ok(records)
    }

    /// Delete a zone: agent first, protocol tables best effort, rows last
    pub async fn delete_zone(&self, zone_id: i64) -> Result<(), ServiceError> {
        let zone = find(format!("DNS zone #{zone_id}"), self.ctx.store.dns_zone(zone_id)).await?;

        boundary::execute(format!("Failed to delete DNS zone: {}", zone.domain), async {
            self.ctx
                .agent
                .send(AgentCommand::DeleteDnsZone {
                    domain: zone.domain.clone(),
                })
                .await?;

            if let Err(e) = self.ctx.tables.delete_dns_zone(&zone.domain).await {
                warn!(
                    domain = %zone.domain,
                    error = %e,
                    "Failed to remove DNS zone from protocol tables; continuing"
                );
            }

            self.ctx.store.delete_dns_zone(zone.id).await
        })
        .await?;

        info!(domain = %zone.domain, "DNS zone deleted");
        Ok(())
    }

    /// Idempotent full resync of one active zone
    pub async fn resync_zone(&self, zone_id: i64) -> Result<(), ServiceError> {
        let zone = self.active_zone(zone_id).await?;
        boundary::execute(
            format!("Failed to resync DNS zone: {}", zone.domain),
            self.push(zone.id),
        )
        .await?;
        Ok(())
    }

    pub async fn get_zone(&self, zone_id: i64) -> Result<DnsZone, ServiceError> {
        find(format!("DNS zone #{zone_id}"), self.ctx.store.dns_zone(zone_id)).await
    }

    /// Zones, optionally restricted to one owner
    pub async fn list_zones(&self, owner: Option<&Owner>) -> Result<Vec<DnsZone>, ServiceError> {
        query(
            "Failed to list DNS zones".to_string(),
            self.ctx.store.list_dns_zones(owner.map(|o| o.id)),
        )
        .await
    }

    pub async fn list_records(&self, zone_id: i64) -> Result<Vec<DnsRecord>, ServiceError> {
        let zone = self.get_zone(zone_id).await?;
        query(
            format!("Failed to load DNS records for zone: {}", zone.domain),
            self.ctx.store.dns_records(zone.id),
        )
        .await
    }

    /// Push the zone's full record set to the agent, then regenerate the
    /// protocol tables from the same set
    async fn push(&self, zone_id: i64) -> Result<()> {
        let zone = self.reload(zone_id).await?;
        let records = self.ctx.store.dns_records(zone.id).await?;

        self.ctx
            .agent
            .send(AgentCommand::update_dns_zone(&zone.domain, &records))
            .await?;
        self.ctx.tables.sync_dns_zone(&zone, &records).await?;
        Ok(())
    }

    async fn reload(&self, zone_id: i64) -> Result<DnsZone> {
        self.ctx
            .store
            .dns_zone(zone_id)
            .await?
            .ok_or_else(|| crate::Error::not_found(format!("DNS zone #{zone_id}")))
    }

    async fn active_zone(&self, zone_id: i64) -> Result<DnsZone, ServiceError> {
        let zone = self.get_zone(zone_id).await?;
        if zone.status != ResourceStatus::Active {
            return Err(ValidationError::new(
                "zone",
                format!("DNS zone {} is {}", zone.domain, zone.status),
            )
            .into());
        }
        Ok(zone)
    }

    async fn drop_projection(&self, domain: &str) {
        if let Err(e) = self.ctx.tables.delete_dns_zone(domain).await {
            warn!(domain = domain, error = %e, "Failed to clear protocol tables for failed zone");
        }
    }

    fn default_records(&self) -> Vec<RecordData> {
        let dns = &self.ctx.config.dns;
        let record = |name: &str, record_type, value: &str| RecordData {
            name: name.to_string(),
            record_type,
            value: value.to_string(),
            ttl: dns.default_ttl,
            priority: dns.default_priority,
        };

        let mut records = vec![
            record("@", DnsRecordType::A, &dns.default_ip),
            record("www", DnsRecordType::A, &dns.default_ip),
        ];
        records.extend(
            dns.nameservers
                .iter()
                .map(|ns| record("@", DnsRecordType::Ns, ns)),
        );
        records
    }

    fn validate_record(&self, input: &NewDnsRecord) -> Result<RecordData, ValidationError> {
        validate_record(input, self.ctx.config.dns.default_ttl, self.ctx.config.dns.default_priority)
    }
}

fn validate_record(
    input: &NewDnsRecord,
    default_ttl: u32,
    default_priority: u32,
) -> Result<RecordData, ValidationError> {
    let record_type: DnsRecordType = input
        .record_type
        .parse()
        .map_err(|e: String| ValidationError::new("type", e))?;

    let name = input
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("@")
        .to_string();
    if name != "@" && !is_relative_name(&name) {
        return Err(ValidationError::new("name", format!("invalid record name: {name}")));
    }

    let value = input.value.trim().to_string();
    validation::required("value", &value)?;
    if value.len() > MAX_VALUE_LEN {
        return Err(ValidationError::new("value", "is too long"));
    }
    match record_type {
        DnsRecordType::A if value.parse::<Ipv4Addr>().is_err() => {
            return Err(ValidationError::new("value", "must be an IPv4 address"));
        }
        DnsRecordType::Aaaa if value.parse::<Ipv6Addr>().is_err() => {
            return Err(ValidationError::new("value", "must be an IPv6 address"));
        }
        _ => {}
    }

    let ttl = input.ttl.unwrap_or(default_ttl);
    if ttl == 0 || ttl > MAX_TTL {
        return Err(ValidationError::new("ttl", format!("must be between 1 and {MAX_TTL}")));
    }

    let priority = input.priority.unwrap_or(default_priority);
    if priority > u32::from(u16::MAX) {
        return Err(ValidationError::new("priority", "must be at most 65535"));
    }

    Ok(RecordData {
        name,
        record_type,
        value,
        ttl,
        priority,
    })
}

/// Relative owner name: labels of letters, digits, `-`, `_`, or a leading `*`
fn is_relative_name(name: &str) -> bool {
    if name.len() > 253 || name.ends_with('.') {
        return false;
    }
    name.split('.').enumerate().all(|(i, label)| {
        (i == 0 && label == "*")
            || (!label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
    })
}
