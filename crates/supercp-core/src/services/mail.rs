use std::sync::OnceLock;
use tracing::{info, warn};

use super::{ServiceContext, find, query};
use crate::agent::AgentCommand;
use crate::boundary;
use crate::error::{Result, ServiceError, ValidationError};
use crate::model::{EmailAccount, MailboxUpdate, NewMailbox, Owner, ResourceKind, ResourceStatus};
use crate::password::{GENERATED_PASSWORD_LEN, Secret, generate_password, hash_password};
use crate::validation;

const MIN_PASSWORD_LEN: usize = 8;

/// Postfix/Dovecot mailboxes
#[derive(Clone, Debug)]
pub struct MailService {
    ctx: ServiceContext,
}

impl MailService {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Create a mailbox
    ///
    /// Returns the account together with the plaintext password, which is
    /// generated when the caller did not supply one. The plaintext is never
    /// stored.
    pub async fn create(
        &self,
        owner: &Owner,
        input: &NewMailbox,
    ) -> Result<(EmailAccount, Secret), ServiceError> {
        validation::email("email", &input.email)?;
        let email = input.email.trim().to_ascii_lowercase();
        let email = email.as_str();
        let password = match &input.password {
            Some(password) => {
                validation::password("password", password.expose(), MIN_PASSWORD_LEN)?;
                password.clone()
            }
            None => generate_password(GENERATED_PASSWORD_LEN),
        };
        let quota_mb = self.quota(input.quota_mb)?;

        let existing = query(
            format!("Failed to look up email account: {email}"),
            self.ctx.store.email_account_by_address(email),
        )
        .await?;
        if existing.is_some() {
            return Err(ValidationError::new("email", "Email account already exists").into());
        }

        let created = OnceLock::new();
        let created = &created;
        let store = &self.ctx.store;

        let account = boundary::execute_with_rollback(
            format!("Failed to create email account: {email}"),
            async {
                let hash = hash_password(&password)?;
                let account = store
                    .insert_email_account(owner.id, email, &hash, quota_mb, ResourceStatus::Pending)
                    .await?;
                let _ = created.set(account.id);

                self.ctx
                    .agent
                    .send(AgentCommand::UpdateEmailAccount {
                        email: email.to_string(),
                        password: password.clone(),
                        quota_mb,
                    })
                    .await?;

                store
                    .set_status(ResourceKind::Mailbox, account.id, ResourceStatus::Active)
                    .await?;
                let account = self.reload(account.id).await?;
                self.ctx.tables.sync_mailbox(&account).await?;
                Ok(account)
            },
            |cause| async move {
                if let Some(id) = created.get() {
                    self.ctx.mark_failed(ResourceKind::Mailbox, *id, &cause).await;
                    if let Err(e) = self.ctx.tables.delete_mailbox(email).await {
                        warn!(email = email, error = %e, "Failed to clear protocol tables for failed mailbox");
                    }
                }
            },
        )
        .await?;

        info!(email = %account.email, user_id = owner.id, "Email account created");
        Ok((account, password))
    }

    /// Change password and/or quota
    ///
    /// The agent only hears about the change when a password is given;
    /// quota-only edits go through [`MailService::update_quota`].
    pub async fn update(
        &self,
        id: i64,
        input: &MailboxUpdate,
    ) -> Result<EmailAccount, ServiceError> {
        if let Some(password) = &input.password {
            validation::password("password", password.expose(), MIN_PASSWORD_LEN)?;
        }
        let quota_mb = input.quota_mb.map(|q| self.quota(Some(q))).transpose()?;
        let account = self.get(id).await?;

        let account = boundary::execute(
            format!("Failed to update email account: {}", account.email),
            async {
                let hash = match &input.password {
                    Some(password) => {
                        self.ctx
                            .agent
                            .send(AgentCommand::UpdateEmailAccount {
                                email: account.email.clone(),
                                password: password.clone(),
                                quota_mb: quota_mb.unwrap_or(account.quota_mb),
                            })
                            .await?;
                        Some(hash_password(password)?)
                    }
                    None => None,
                };

                let account = self
                    .ctx
                    .store
                    .update_email_account(account.id, hash.as_ref(), quota_mb)
                    .await?;
                self.ctx.tables.sync_mailbox(&account).await?;
                Ok(account)
            },
        )
        .await?;

        info!(
            email = %account.email,
            password_changed = input.password.is_some(),
            quota_mb = account.quota_mb,
            "Email account updated"
        );
        Ok(account)
    }

    /// Change only the quota; the agent gets an empty password, meaning
    /// "keep the current one"
    pub async fn update_quota(&self, id: i64, quota_mb: u32) -> Result<EmailAccount, ServiceError> {
        let quota_mb = self.quota(Some(quota_mb))?;
        let account = self.get(id).await?;

        let account = boundary::execute(
            format!("Failed to update email quota: {}", account.email),
            async {
                self.ctx
                    .agent
                    .send(AgentCommand::UpdateEmailAccount {
                        email: account.email.clone(),
                        password: Secret::new(""),
                        quota_mb,
                    })
                    .await?;
                self.ctx
                    .store
                    .update_email_account(account.id, None, Some(quota_mb))
                    .await
            },
        )
        .await?;

        info!(email = %account.email, quota_mb = quota_mb, "Email quota updated");
        Ok(account)
    }

    /// Delete a mailbox: agent first, protocol tables best effort, row last
    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        let account = self.get(id).await?;

        boundary::execute(format!("Failed to delete email account: {}", account.email), async {
            self.ctx
                .agent
                .send(AgentCommand::DeleteEmailAccount {
                    email: account.email.clone(),
                })
                .await?;
            info!(email = %account.email, "Email account deleted from system agent");

            if let Err(e) = self.ctx.tables.delete_mailbox(&account.email).await {
                warn!(
                    email = %account.email,
                    error = %e,
                    "Failed to remove mailbox from protocol tables; continuing"
                );
            }

            self.ctx.store.delete_email_account(account.id).await
        })
        .await?;

        info!(email = %account.email, "Email account deleted");
        Ok(())
    }

    /// Regenerate the mailbox's protocol-table rows
    ///
    /// The agent side is left alone: it needs the plaintext password, which
    /// is not kept.
    pub async fn resync(&self, id: i64) -> Result<(), ServiceError> {
        let account = self.get(id).await?;
        if account.status != ResourceStatus::Active {
            return Err(ValidationError::new(
                "status",
                format!("email account {} is {}", account.email, account.status),
            )
            .into());
        }

        boundary::execute(
            format!("Failed to resync email account: {}", account.email),
            async { Ok(self.ctx.tables.sync_mailbox(&account).await?) },
        )
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<EmailAccount, ServiceError> {
        find(format!("email account #{id}"), self.ctx.store.email_account(id)).await
    }

    pub async fn list(&self, owner: Option<&Owner>) -> Result<Vec<EmailAccount>, ServiceError> {
        query(
            "Failed to list email accounts".to_string(),
            self.ctx.store.list_email_accounts(owner.map(|o| o.id)),
        )
        .await
    }

    async fn reload(&self, id: i64) -> Result<EmailAccount> {
        self.ctx
            .store
            .email_account(id)
            .await?
            .ok_or_else(|| crate::Error::not_found(format!("email account #{id}")))
    }

    fn quota(&self, requested: Option<u32>) -> Result<u32, ValidationError> {
        match requested.unwrap_or(self.ctx.config.mail.default_quota_mb) {
            0 => Err(ValidationError::new("quota_mb", "must be at least 1")),
            quota => Ok(quota),
        }
    }
}
