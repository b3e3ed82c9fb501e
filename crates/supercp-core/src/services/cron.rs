use std::sync::OnceLock;
use tracing::{info, warn};

use super::{ServiceContext, find, query};
use crate::agent::AgentCommand;
use crate::boundary;
use crate::error::{Result, ServiceError};
use crate::model::{CronJob, CronJobUpdate, NewCronJob, Owner, ResourceKind, ResourceStatus};
use crate::validation;

const MAX_COMMAND_LEN: usize = 1000;

/// Per-user crontabs
///
/// The agent only knows whole crontabs: every change pushes the user's
/// complete set of active jobs through `update_cron_jobs`.
#[derive(Clone, Debug)]
pub struct CronService {
    ctx: ServiceContext,
}

impl CronService {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, owner: &Owner, input: &NewCronJob) -> Result<CronJob, ServiceError> {
        validation::single_line("command", &input.command, MAX_COMMAND_LEN)?;
        validation::cron_schedule("schedule", &input.schedule)?;
        let schedule = input.schedule.trim();
        let created = OnceLock::new();
        let created = &created;
        let store = &self.ctx.store;

        let job = boundary::execute_with_rollback(
            format!("Failed to create cron job for user: {}", owner.name),
            async {
                let job = store
                    .insert_cron_job(
                        owner.id,
                        &owner.name,
                        input.command.trim(),
                        schedule,
                        input.description.as_deref(),
                        ResourceStatus::Active,
                    )
                    .await?;
                let _ = created.set(job.id);

                self.push(owner.id, &owner.name).await?;
                Ok(job)
            },
            |cause| async move {
                if let Some(id) = created.get() {
                    self.ctx.mark_failed(ResourceKind::CronJob, *id, &cause).await;
                }
            },
        )
        .await?;

        info!(id = job.id, user = %job.owner_name, schedule = %job.schedule, "Cron job created");
        Ok(job)
    }

    /// Edit a job and push the user's crontab
    ///
    /// When the push fails the stored job is put back as it was, so the
    /// store keeps describing what the host runs.
    pub async fn update(&self, id: i64, input: &CronJobUpdate) -> Result<CronJob, ServiceError> {
        if let Some(command) = &input.command {
            validation::single_line("command", command, MAX_COMMAND_LEN)?;
        }
        if let Some(schedule) = &input.schedule {
            validation::cron_schedule("schedule", schedule)?;
        }
        let old = self.get(id).await?;
        let edited = CronJob {
            command: input
                .command
                .as_deref()
                .map(str::trim)
                .map(str::to_string)
                .unwrap_or_else(|| old.command.clone()),
            schedule: input
                .schedule
                .as_deref()
                .map(str::trim)
                .map(str::to_string)
                .unwrap_or_else(|| old.schedule.clone()),
            description: input.description.clone().or_else(|| old.description.clone()),
            is_active: input.is_active.unwrap_or(old.is_active),
            ..old.clone()
        };
        let old = &old;

        let job = boundary::execute_with_rollback(
            format!("Failed to update cron job for user: {}", old.owner_name),
            async {
                let job = self.ctx.store.update_cron_job(&edited).await?;
                self.push(job.user_id, &job.owner_name).await?;
                Ok(job)
            },
            |_| async move {
                if let Err(e) = self.ctx.store.update_cron_job(old).await {
                    warn!(id = old.id, error = %e, "Could not restore cron job after failed push");
                }
            },
        )
        .await?;

        info!(id = job.id, is_active = job.is_active, "Cron job updated");
        Ok(job)
    }

    /// Push the crontab without the job, then delete its row
    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        let job = self.get(id).await?;

        boundary::execute(
            format!("Failed to delete cron job for user: {}", job.owner_name),
            async {
                let remaining: Vec<CronJob> = self
                    .ctx
                    .store
                    .crontab_entries(job.user_id)
                    .await?
                    .into_iter()
                    .filter(|entry| entry.id != job.id)
                    .collect();
                self.ctx
                    .agent
                    .send(AgentCommand::update_cron_jobs(&job.owner_name, &remaining))
                    .await?;

                self.ctx.store.delete_cron_job(job.id).await
            },
        )
        .await?;

        info!(id = job.id, user = %job.owner_name, "Cron job deleted");
        Ok(())
    }

    /// Re-push a user's crontab from the store
    ///
    /// Idempotent; used by reconciliation.
    pub async fn resync_user(&self, user_id: i64, user_name: &str) -> Result<(), ServiceError> {
        boundary::execute(
            format!("Failed to sync cron jobs for user {user_name}"),
            self.push(user_id, user_name),
        )
        .await?;
        Ok(())
    }

    /// Crontab lines as the agent currently has them
    pub async fn list_remote(&self, user_name: &str) -> Result<Vec<String>, ServiceError> {
        query(
            format!("Failed to list cron jobs for user {user_name}"),
            self.ctx.agent.send_as(AgentCommand::ListCronJobs {
                user: user_name.to_string(),
            }),
        )
        .await
    }

    pub async fn get(&self, id: i64) -> Result<CronJob, ServiceError> {
        find(format!("cron job #{id}"), self.ctx.store.cron_job(id)).await
    }

    pub async fn list(&self, owner: Option<&Owner>) -> Result<Vec<CronJob>, ServiceError> {
        query(
            "Failed to list cron jobs".to_string(),
            self.ctx.store.list_cron_jobs(owner.map(|o| o.id)),
        )
        .await
    }

    async fn push(&self, user_id: i64, user_name: &str) -> Result<()> {
        let jobs = self.ctx.store.crontab_entries(user_id).await?;
        self.ctx
            .agent
            .send(AgentCommand::update_cron_jobs(user_name, &jobs))
            .await?;
        info!(user = user_name, jobs = jobs.len(), "Crontab pushed to system agent");
        Ok(())
    }
}
