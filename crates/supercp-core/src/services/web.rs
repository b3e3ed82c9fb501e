use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::{DnsService, ServiceContext, find, query};
use crate::agent::AgentCommand;
use crate::boundary;
use crate::error::{Result, ServiceError, ValidationError};
use crate::model::{NewWebDomain, Owner, ResourceKind, ResourceStatus, WebDomain, WebDomainUpdate};
use crate::validation;

const MAX_OWNER_NAME_LEN: usize = 32;

/// Nginx vhosts with their PHP-FPM pools
#[derive(Clone, Debug)]
pub struct WebDomainService {
    ctx: ServiceContext,
    dns: DnsService,
}

impl WebDomainService {
    pub(crate) fn new(ctx: ServiceContext, dns: DnsService) -> Self {
        Self { ctx, dns }
    }

    /// Create the document root, a placeholder index and the vhost
    ///
    /// A DNS zone for the domain is provisioned afterwards if none exists.
    /// That step is best effort: its failure is logged and the web domain
    /// is still returned.
    pub async fn create(&self, owner: &Owner, input: &NewWebDomain) -> Result<WebDomain, ServiceError> {
        let domain = input.domain.trim().trim_end_matches('.').to_ascii_lowercase();
        validation::domain("domain", &domain)?;
        validation::identifier("owner", &owner.name, MAX_OWNER_NAME_LEN)?;
        let domain = domain.as_str();

        let site_dir = format!("{}/{}/web/{domain}", self.ctx.config.web.home_root, owner.name);
        let root_path = match &input.root_path {
            Some(root) => root.trim_end_matches('/').to_string(),
            None => format!("{site_dir}/public"),
        };
        validation::absolute_path("root_path", &root_path)?;
        let php_version = input
            .php_version
            .clone()
            .unwrap_or_else(|| self.ctx.config.web.default_php_version.clone());
        check_php_version(&php_version)?;

        let existing = query(
            format!("Failed to look up web domain: {domain}"),
            self.ctx.store.web_domain_by_name(domain),
        )
        .await?;
        if existing.is_some() {
            return Err(ValidationError::new("domain", "Domain already exists").into());
        }

        let directories = [
            Path::new(&root_path)
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "/".to_string()),
            root_path.clone(),
            format!("{site_dir}/logs"),
        ];
        let created = OnceLock::new();
        let created = &created;
        let store = &self.ctx.store;

        let web = boundary::execute_with_rollback(
            format!("Failed to create domain: {domain}"),
            async {
                let web = store
                    .insert_web_domain(
                        owner.id,
                        domain,
                        &owner.name,
                        &root_path,
                        &php_version,
                        ResourceStatus::Pending,
                    )
                    .await?;
                let _ = created.set(web.id);

                for path in &directories {
                    self.ctx
                        .agent
                        .send(AgentCommand::CreateDirectory { path: path.clone() })
                        .await?;
                }
                self.ctx
                    .agent
                    .send(AgentCommand::WriteFile {
                        path: format!("{root_path}/index.php"),
                        content: placeholder_index(domain),
                    })
                    .await?;
                self.ctx.agent.send(AgentCommand::create_vhost(&web)).await?;
                info!(domain = domain, "Web domain vhost created");

                store
                    .set_status(ResourceKind::WebDomain, web.id, ResourceStatus::Active)
                    .await?;
                self.reload(web.id).await
            },
            |cause| async move {
                if let Some(id) = created.get() {
                    self.ctx.mark_failed(ResourceKind::WebDomain, *id, &cause).await;
                }
            },
        )
        .await?;

        self.provision_zone(owner, domain).await;

        info!(domain = %web.domain, user_id = owner.id, "Web domain created");
        Ok(web)
    }

    /// Change root and/or PHP version, then re-push the vhost
    pub async fn update(&self, id: i64, input: &WebDomainUpdate) -> Result<WebDomain, ServiceError> {
        if let Some(root) = &input.root_path {
            validation::absolute_path("root_path", root)?;
        }
        if let Some(version) = &input.php_version {
            check_php_version(version)?;
        }
        let web = self.get(id).await?;

        let web = boundary::execute(format!("Failed to update domain: {}", web.domain), async {
            let web = self
                .ctx
                .store
                .update_web_domain(web.id, input.root_path.as_deref(), input.php_version.as_deref())
                .await?;
            self.ctx.agent.send(AgentCommand::create_vhost(&web)).await?;
            Ok(web)
        })
        .await?;

        info!(domain = %web.domain, php_version = %web.php_version, "Web domain updated");
        Ok(web)
    }

    /// Remove the vhost, then the row. The DNS zone is left in place.
    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        let web = self.get(id).await?;

        boundary::execute(format!("Failed to delete domain: {}", web.domain), async {
            self.ctx
                .agent
                .send(AgentCommand::DeleteVhost {
                    domain: web.domain.clone(),
                    user: web.owner_name.clone(),
                    php_version: web.php_version.clone(),
                })
                .await?;
            info!(domain = %web.domain, "Web domain vhost deleted");

            self.ctx.store.delete_web_domain(web.id).await
        })
        .await?;

        info!(domain = %web.domain, "Web domain deleted");
        Ok(())
    }

    /// Ask the agent for the document root's disk usage and store it
    pub async fn refresh_size(&self, id: i64) -> Result<i64, ServiceError> {
        let web = self.get(id).await?;

        let size = boundary::execute(
            format!("Failed to update size for domain {}", web.domain),
            async {
                let size: u64 = self
                    .ctx
                    .agent
                    .send_as(AgentCommand::GetDirectorySize {
                        path: web.root_path.clone(),
                    })
                    .await?;
                let size = i64::try_from(size).unwrap_or(i64::MAX);
                self.ctx.store.set_web_domain_size(web.id, size).await?;
                Ok(size)
            },
        )
        .await?;

        debug!(domain = %web.domain, size_bytes = size, "Web domain size refreshed");
        Ok(size)
    }

    /// Vhosts as the agent sees them
    pub async fn list_vhosts(&self) -> Result<Value, ServiceError> {
        query(
            "Failed to list vhosts from system agent".to_string(),
            self.ctx.agent.send(AgentCommand::ListVhosts),
        )
        .await
    }

    pub async fn get(&self, id: i64) -> Result<WebDomain, ServiceError> {
        find(format!("web domain #{id}"), self.ctx.store.web_domain(id)).await
    }

    pub async fn list(&self, owner: Option<&Owner>) -> Result<Vec<WebDomain>, ServiceError> {
        query(
            "Failed to list web domains".to_string(),
            self.ctx.store.list_web_domains(owner.map(|o| o.id)),
        )
        .await
    }

    async fn provision_zone(&self, owner: &Owner, domain: &str) {
        match self.ctx.store.dns_zone_by_domain(domain).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(e) = self.dns.create_zone(owner, domain).await {
                    warn!(domain = domain, error = %e, "Failed to create DNS zone for web domain");
                }
            }
            Err(e) => {
                warn!(domain = domain, error = %e, "Failed to look up DNS zone for web domain");
            }
        }
    }

    async fn reload(&self, id: i64) -> Result<WebDomain> {
        self.ctx
            .store
            .web_domain(id)
            .await?
            .ok_or_else(|| crate::Error::not_found(format!("web domain #{id}")))
    }
}

/// `major.minor`, e.g. `8.4`
fn check_php_version(version: &str) -> Result<(), ValidationError> {
    let valid = version
        .split_once('.')
        .is_some_and(|(major, minor)| {
            !major.is_empty()
                && !minor.is_empty()
                && major.chars().all(|c| c.is_ascii_digit())
                && minor.chars().all(|c| c.is_ascii_digit())
        });
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new(
            "php_version",
            format!("invalid PHP version: {version}"),
        ))
    }
}

fn placeholder_index(domain: &str) -> String {
    format!(
        "<?php\n\n\
         echo '<div style=\"font-family: sans-serif; text-align: center; padding-top: 50px;\">';\n\
         echo '<h1>Welcome to {domain}</h1>';\n\
         echo '<p>Your website is successfully set up and hosted on SuperCP.</p>';\n\
         echo '</div>';\n"
    )
}
