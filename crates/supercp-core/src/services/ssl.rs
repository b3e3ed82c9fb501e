use chrono::{DateTime, Duration, Utc};
use std::sync::OnceLock;
use tracing::{info, warn};

use super::{ServiceContext, find, query};
use crate::agent::AgentCommand;
use crate::boundary;
use crate::error::{Result, ServiceError, ValidationError};
use crate::model::{
    CustomCertificate, Owner, ResourceKind, ResourceStatus, SslCertificate, SslProvider, WebDomain,
};

const CUSTOM_VALIDITY_DAYS: i64 = 365;

/// Certificates for web domains
#[derive(Clone, Debug)]
pub struct SslService {
    ctx: ServiceContext,
}

impl SslService {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Issue a Let's Encrypt certificate and switch the vhost to it
    pub async fn request_lets_encrypt(
        &self,
        web_domain_id: i64,
        owner: &Owner,
    ) -> Result<SslCertificate, ServiceError> {
        let web = self.web_domain(web_domain_id).await?;
        let email = self
            .ctx
            .config
            .ssl
            .admin_email
            .clone()
            .unwrap_or_else(|| owner.email.clone());
        let live_dir = format!("{}/{}", self.ctx.config.ssl.letsencrypt_live_dir, web.domain);
        let certificate_path = format!("{live_dir}/fullchain.pem");
        let key_path = format!("{live_dir}/privkey.pem");
        let created = OnceLock::new();
        let created = &created;
        let store = &self.ctx.store;

        let certificate = boundary::execute_with_rollback(
            format!("Failed to request Let's Encrypt certificate for {}", web.domain),
            async {
                let certificate = store
                    .insert_certificate(
                        owner.id,
                        web.id,
                        &web.domain,
                        SslProvider::LetsEncrypt,
                        ResourceStatus::Pending,
                    )
                    .await?;
                let _ = created.set(certificate.id);

                self.ctx
                    .agent
                    .send(AgentCommand::RequestSslCert {
                        domain: web.domain.clone(),
                        email,
                    })
                    .await?;

                let expires_at = self.lets_encrypt_expiry();
                self.install(&web, certificate.id, &certificate_path, &key_path, expires_at)
                    .await
            },
            |cause| async move {
                if let Some(id) = created.get() {
                    self.fail(*id, &cause).await;
                }
            },
        )
        .await?;

        info!(
            domain = %certificate.domain,
            expires_at = ?certificate.expires_at,
            "Let's Encrypt certificate issued"
        );
        Ok(certificate)
    }

    /// Write operator-supplied PEM files through the agent and switch the
    /// vhost to them
    pub async fn install_custom(
        &self,
        web_domain_id: i64,
        owner: &Owner,
        input: &CustomCertificate,
    ) -> Result<SslCertificate, ServiceError> {
        if !input.certificate.contains("-----BEGIN CERTIFICATE-----") {
            return Err(ValidationError::new("certificate", "must be a PEM certificate").into());
        }
        if !input.private_key.expose().contains("PRIVATE KEY-----") {
            return Err(ValidationError::new("private_key", "must be a PEM private key").into());
        }
        let web = self.web_domain(web_domain_id).await?;

        let dir = &self.ctx.config.ssl.custom_cert_dir;
        let certificate_path = format!("{dir}/{}.crt", web.domain);
        let key_path = format!("{dir}/{}.key", web.domain);
        let pem = match &input.chain {
            Some(chain) => format!("{}\n{}", input.certificate.trim_end(), chain),
            None => input.certificate.clone(),
        };
        let expires_at = input
            .expires_at
            .unwrap_or_else(|| Utc::now() + Duration::days(CUSTOM_VALIDITY_DAYS));
        let created = OnceLock::new();
        let created = &created;
        let store = &self.ctx.store;

        let certificate = boundary::execute_with_rollback(
            format!("Failed to install custom certificate for {}", web.domain),
            async {
                let certificate = store
                    .insert_certificate(
                        owner.id,
                        web.id,
                        &web.domain,
                        SslProvider::Custom,
                        ResourceStatus::Pending,
                    )
                    .await?;
                let _ = created.set(certificate.id);

                self.ctx
                    .agent
                    .send(AgentCommand::CreateDirectory { path: dir.clone() })
                    .await?;
                self.ctx
                    .agent
                    .send(AgentCommand::WriteFile {
                        path: certificate_path.clone(),
                        content: pem,
                    })
                    .await?;
                self.ctx
                    .agent
                    .send(AgentCommand::WriteFile {
                        path: key_path.clone(),
                        content: input.private_key.expose().to_string(),
                    })
                    .await?;

                self.install(&web, certificate.id, &certificate_path, &key_path, expires_at)
                    .await
            },
            |cause| async move {
                if let Some(id) = created.get() {
                    self.fail(*id, &cause).await;
                }
            },
        )
        .await?;

        info!(domain = %certificate.domain, "Custom certificate installed");
        Ok(certificate)
    }

    /// Re-issue a Let's Encrypt certificate in place
    pub async fn renew(&self, certificate_id: i64) -> Result<SslCertificate, ServiceError> {
        let certificate = self.get(certificate_id).await?;
        if certificate.provider != SslProvider::LetsEncrypt {
            return Err(ValidationError::new(
                "provider",
                "Only Let's Encrypt certificates can be automatically renewed",
            )
            .into());
        }
        let web = self.web_domain(certificate.web_domain_id).await?;
        let email = self.contact_for(&certificate);
        let id = certificate.id;
        let previous = match certificate.status {
            ResourceStatus::Renewing => ResourceStatus::Active,
            status => status,
        };

        let certificate = boundary::execute_with_rollback(
            format!("Failed to renew certificate for {}", certificate.domain),
            async {
                self.ctx
                    .store
                    .set_status(ResourceKind::SslCertificate, id, ResourceStatus::Renewing)
                    .await?;
                self.ctx.store.increment_renewal_attempts(id).await?;

                self.ctx
                    .agent
                    .send(AgentCommand::RequestSslCert {
                        domain: certificate.domain.clone(),
                        email,
                    })
                    .await?;

                let live_dir = format!(
                    "{}/{}",
                    self.ctx.config.ssl.letsencrypt_live_dir, certificate.domain
                );
                let certificate_path = certificate
                    .certificate_path
                    .clone()
                    .unwrap_or_else(|| format!("{live_dir}/fullchain.pem"));
                let key_path = certificate
                    .key_path
                    .clone()
                    .unwrap_or_else(|| format!("{live_dir}/privkey.pem"));
                let expires_at = self.lets_encrypt_expiry();
                self.install(&web, id, &certificate_path, &key_path, expires_at)
                    .await
            },
            |cause| async move {
                self.keep_previous(id, previous, &cause).await;
            },
        )
        .await?;

        info!(
            domain = %certificate.domain,
            attempts = certificate.renewal_attempts,
            "Certificate renewed"
        );
        Ok(certificate)
    }

    /// Active auto-renewing certificates that expire within `within_days`
    pub async fn due_for_renewal(
        &self,
        within_days: i64,
    ) -> Result<Vec<SslCertificate>, ServiceError> {
        query(
            "Failed to list certificates due for renewal".to_string(),
            self.ctx
                .store
                .certificates_expiring_before(Utc::now() + Duration::days(within_days)),
        )
        .await
    }

    pub async fn get(&self, id: i64) -> Result<SslCertificate, ServiceError> {
        find(format!("certificate #{id}"), self.ctx.store.certificate(id)).await
    }

    /// Latest certificate issued for a web domain, if any
    pub async fn for_web_domain(
        &self,
        web_domain_id: i64,
    ) -> Result<Option<SslCertificate>, ServiceError> {
        query(
            format!("Failed to load certificate for web domain #{web_domain_id}"),
            self.ctx.store.certificate_for_web_domain(web_domain_id),
        )
        .await
    }

    /// Record the issued paths, activate the certificate and re-push the
    /// vhost with SSL on
    async fn install(
        &self,
        web: &WebDomain,
        certificate_id: i64,
        certificate_path: &str,
        key_path: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SslCertificate> {
        let store = &self.ctx.store;
        store
            .mark_certificate_issued(certificate_id, certificate_path, key_path, Utc::now(), expires_at)
            .await?;
        store
            .set_web_domain_ssl(web.id, certificate_path, key_path, Some(expires_at))
            .await?;

        let web = store
            .web_domain(web.id)
            .await?
            .ok_or_else(|| crate::Error::not_found(format!("web domain #{}", web.id)))?;
        self.ctx.agent.send(AgentCommand::create_vhost(&web)).await?;

        store
            .set_status(ResourceKind::SslCertificate, certificate_id, ResourceStatus::Active)
            .await?;
        store
            .certificate(certificate_id)
            .await?
            .ok_or_else(|| crate::Error::not_found(format!("certificate #{certificate_id}")))
    }

    async fn fail(&self, id: i64, cause: &str) {
        self.ctx.mark_failed(ResourceKind::SslCertificate, id, cause).await;
        if let Err(e) = self.ctx.store.set_certificate_error(id, cause).await {
            warn!(id = id, error = %e, "Could not record certificate error");
        }
    }

    /// Compensation for a failed renewal
    ///
    /// The previously issued files are still installed, so the certificate
    /// goes back to the status it had and stays eligible for the next
    /// renewal pass. The cause is kept in `last_error`.
    async fn keep_previous(&self, id: i64, previous: ResourceStatus, cause: &str) {
        warn!(id = id, cause = cause, status = %previous, "Renewal failed; keeping the installed certificate");
        if let Err(e) = self.ctx.store.set_certificate_error(id, cause).await {
            warn!(id = id, error = %e, "Could not record certificate error");
        }
        if let Err(e) = self
            .ctx
            .store
            .set_status(ResourceKind::SslCertificate, id, previous)
            .await
        {
            warn!(id = id, error = %e, "Could not restore certificate status");
        }
    }

    async fn web_domain(&self, id: i64) -> Result<WebDomain, ServiceError> {
        find(format!("web domain #{id}"), self.ctx.store.web_domain(id)).await
    }

    /// ACME contact for renewals: the configured admin address, else the
    /// domain's hostmaster
    fn contact_for(&self, certificate: &SslCertificate) -> String {
        self.ctx
            .config
            .ssl
            .admin_email
            .clone()
            .unwrap_or_else(|| format!("hostmaster@{}", certificate.domain))
    }

    fn lets_encrypt_expiry(&self) -> DateTime<Utc> {
        Utc::now() + Duration::days(self.ctx.config.ssl.default_validity_days)
    }
}
