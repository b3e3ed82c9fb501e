use serde_json::Value;
use std::sync::OnceLock;
use tracing::{info, warn};

use super::{ServiceContext, find, query};
use crate::agent::AgentCommand;
use crate::boundary;
use crate::error::{Result, ServiceError, ValidationError};
use crate::model::{FtpAccount, FtpAccountUpdate, NewFtpAccount, Owner, ResourceKind, ResourceStatus};
use crate::password::hash_password;
use crate::validation;

const MAX_USERNAME_LEN: usize = 32;
const MIN_PASSWORD_LEN: usize = 8;

/// Pure-FTPd virtual users
#[derive(Clone, Debug)]
pub struct FtpService {
    ctx: ServiceContext,
}

impl FtpService {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(
        &self,
        owner: &Owner,
        input: &NewFtpAccount,
    ) -> Result<FtpAccount, ServiceError> {
        validation::identifier("username", &input.username, MAX_USERNAME_LEN)?;
        validation::password("password", input.password.expose(), MIN_PASSWORD_LEN)?;
        let username = input.username.as_str();
        let home_dir = match &input.home_dir {
            Some(dir) => dir.clone(),
            None => format!("{}/{username}", self.ctx.config.ftp.home_root),
        };
        validation::absolute_path("home_dir", &home_dir)?;
        let home_dir = home_dir.as_str();

        let existing = query(
            format!("Failed to look up FTP user: {username}"),
            self.ctx.store.ftp_account_by_username(username),
        )
        .await?;
        if existing.is_some() {
            return Err(ValidationError::new("username", "FTP user already exists").into());
        }

        let created = OnceLock::new();
        let created = &created;
        let store = &self.ctx.store;

        let account = boundary::execute_with_rollback(
            format!("Failed to create FTP user: {username}"),
            async {
                let hash = hash_password(&input.password)?;
                let account = store
                    .insert_ftp_account(owner.id, username, &hash, home_dir, ResourceStatus::Pending)
                    .await?;
                let _ = created.set(account.id);

                self.ctx
                    .agent
                    .send(AgentCommand::CreateFtpUser {
                        username: username.to_string(),
                        password: input.password.clone(),
                        homedir: home_dir.to_string(),
                    })
                    .await?;
                info!(username = username, "FTP user created on system agent");

                store
                    .set_status(ResourceKind::FtpAccount, account.id, ResourceStatus::Active)
                    .await?;
                let account = self.reload(account.id).await?;
                self.ctx.tables.sync_ftp_account(&account).await?;
                Ok(account)
            },
            |cause| async move {
                if let Some(id) = created.get() {
                    self.ctx.mark_failed(ResourceKind::FtpAccount, *id, &cause).await;
                    if let Err(e) = self.ctx.tables.delete_ftp_account(username).await {
                        warn!(username = username, error = %e, "Failed to clear protocol tables for failed FTP user");
                    }
                }
            },
        )
        .await?;

        info!(username = %account.username, user_id = owner.id, "FTP user created");
        Ok(account)
    }

    /// Change password and/or home directory
    ///
    /// A password change re-runs `create_ftp_user` on the agent, which
    /// overwrites the existing user.
    pub async fn update(
        &self,
        id: i64,
        input: &FtpAccountUpdate,
    ) -> Result<FtpAccount, ServiceError> {
        if let Some(password) = &input.password {
            validation::password("password", password.expose(), MIN_PASSWORD_LEN)?;
        }
        if let Some(dir) = &input.home_dir {
            validation::absolute_path("home_dir", dir)?;
        }
        let account = self.get(id).await?;

        let account = boundary::execute(
            format!("Failed to update FTP user: {}", account.username),
            async {
                let hash = match &input.password {
                    Some(password) => {
                        self.ctx
                            .agent
                            .send(AgentCommand::CreateFtpUser {
                                username: account.username.clone(),
                                password: password.clone(),
                                homedir: input
                                    .home_dir
                                    .clone()
                                    .unwrap_or_else(|| account.home_dir.clone()),
                            })
                            .await?;
                        Some(hash_password(password)?)
                    }
                    None => None,
                };

                let account = self
                    .ctx
                    .store
                    .update_ftp_account(account.id, hash.as_ref(), input.home_dir.as_deref())
                    .await?;
                self.ctx.tables.sync_ftp_account(&account).await?;
                Ok(account)
            },
        )
        .await?;

        info!(username = %account.username, "FTP user updated");
        Ok(account)
    }

    /// Re-activate a suspended user in the Pure-FTPd table
    pub async fn enable(&self, id: i64) -> Result<FtpAccount, ServiceError> {
        self.set_enabled(id, true).await
    }

    /// Suspend a user; the row stays in the Pure-FTPd table with `active = 0`
    pub async fn disable(&self, id: i64) -> Result<FtpAccount, ServiceError> {
        self.set_enabled(id, false).await
    }

    /// Delete a user: agent first, protocol tables best effort, row last
    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        let account = self.get(id).await?;

        boundary::execute(format!("Failed to delete FTP user: {}", account.username), async {
            self.ctx
                .agent
                .send(AgentCommand::DeleteFtpUser {
                    username: account.username.clone(),
                })
                .await?;
            info!(username = %account.username, "FTP user deleted from system agent");

            if let Err(e) = self.ctx.tables.delete_ftp_account(&account.username).await {
                warn!(
                    username = %account.username,
                    error = %e,
                    "Failed to remove FTP user from protocol tables; continuing"
                );
            }

            self.ctx.store.delete_ftp_account(account.id).await
        })
        .await?;

        info!(username = %account.username, "FTP user deleted");
        Ok(())
    }

    /// Regenerate the user's Pure-FTPd row (table only, like mailboxes)
    pub async fn resync(&self, id: i64) -> Result<(), ServiceError> {
        let account = self.get(id).await?;
        if !matches!(account.status, ResourceStatus::Active | ResourceStatus::Suspended) {
            return Err(ValidationError::new(
                "status",
                format!("FTP user {} is {}", account.username, account.status),
            )
            .into());
        }

        boundary::execute(
            format!("Failed to resync FTP user: {}", account.username),
            async { Ok(self.ctx.tables.sync_ftp_account(&account).await?) },
        )
        .await?;
        Ok(())
    }

    /// Users as the agent sees them
    pub async fn list_remote(&self) -> Result<Value, ServiceError> {
        query(
            "Failed to list FTP users".to_string(),
            self.ctx.agent.send(AgentCommand::ListFtpUsers),
        )
        .await
    }

    pub async fn get(&self, id: i64) -> Result<FtpAccount, ServiceError> {
        find(format!("FTP user #{id}"), self.ctx.store.ftp_account(id)).await
    }

    pub async fn list(&self, owner: Option<&Owner>) -> Result<Vec<FtpAccount>, ServiceError> {
        query(
            "Failed to list FTP accounts".to_string(),
            self.ctx.store.list_ftp_accounts(owner.map(|o| o.id)),
        )
        .await
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<FtpAccount, ServiceError> {
        let account = self.get(id).await?;
        let (target, verb) = if enabled {
            (ResourceStatus::Active, "enable")
        } else {
            (ResourceStatus::Suspended, "disable")
        };
        if !matches!(account.status, ResourceStatus::Active | ResourceStatus::Suspended) {
            return Err(ValidationError::new(
                "status",
                format!("FTP user {} is {}", account.username, account.status),
            )
            .into());
        }

        let account = boundary::execute(
            format!("Failed to {verb} FTP user: {}", account.username),
            async {
                self.ctx
                    .store
                    .set_status(ResourceKind::FtpAccount, account.id, target)
                    .await?;
                let account = self.reload(account.id).await?;
                self.ctx.tables.sync_ftp_account(&account).await?;
                Ok(account)
            },
        )
        .await?;

        info!(username = %account.username, enabled = enabled, "FTP user status changed");
        Ok(account)
    }

    async fn reload(&self, id: i64) -> Result<FtpAccount> {
        self.ctx
            .store
            .ftp_account(id)
            .await?
            .ok_or_else(|| crate::Error::not_found(format!("FTP user #{id}")))
    }
}
