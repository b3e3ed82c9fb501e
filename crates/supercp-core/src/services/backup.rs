use chrono::{DateTime, Duration, Months, NaiveTime, TimeZone, Utc};
use std::path::{Component, Path};
use tracing::{error, info, warn};

use super::{ServiceContext, find, query};
use crate::agent::AgentCommand;
use crate::boundary;
use crate::error::{Error, Result, ServiceError, ValidationError};
use crate::model::{
    Backup, BackupKind, BackupSchedule, NewBackupSchedule, Owner, ResourceKind, ResourceStatus,
    ScheduleFrequency, ScheduleScope, ScheduleTargets,
};
use crate::store::ScheduleData;
use crate::validation;

const MAX_DATABASE_NAME_LEN: usize = 64;
const MAX_SCHEDULE_NAME_LEN: usize = 255;
const DEFAULT_SCHEDULE_TIME: &str = "02:00";
const DEFAULT_RETENTION_DAYS: u32 = 30;
const MAX_RETENTION_DAYS: u32 = 3650;

/// Web-root and database archives made by the agent
#[derive(Clone, Debug)]
pub struct BackupService {
    ctx: ServiceContext,
}

impl BackupService {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Archive a web root (`source` is the domain) or a database (`source`
    /// is its name)
    ///
    /// The `pending` row exists before the agent is called, so a failed
    /// attempt stays visible as `failed`.
    pub async fn create(
        &self,
        owner: &Owner,
        kind: BackupKind,
        source: &str,
    ) -> Result<Backup, ServiceError> {
        self.create_for(owner.id, &owner.name, kind, source).await
    }

    async fn create_for(
        &self,
        user_id: i64,
        user_name: &str,
        kind: BackupKind,
        source: &str,
    ) -> Result<Backup, ServiceError> {
        match kind {
            BackupKind::Web => validation::domain("source", source)?,
            BackupKind::Database => {
                validation::identifier("source", source, MAX_DATABASE_NAME_LEN)?
            }
        }

        let name = format!(
            "backup_{}_{}_{}",
            kind.as_str(),
            source,
            Utc::now().format("%Y-%m-%d_%H-%M-%S")
        );
        let backup = query(
            format!("Failed to create backup: {name}"),
            self.ctx
                .store
                .insert_backup(user_id, &name, kind, source, ResourceStatus::Pending),
        )
        .await?;
        let id = backup.id;

        let backup = boundary::execute_with_rollback(
            format!("Failed to create backup: {name}"),
            async {
                let command = match kind {
                    BackupKind::Web => AgentCommand::CreateBackup {
                        name: name.clone(),
                        source_path: self.web_root(user_name, source).await?,
                    },
                    BackupKind::Database => AgentCommand::CreateDbBackup {
                        db_name: source.to_string(),
                    },
                };
                let path = self.ctx.agent.send_for_string(command).await?;
                if path.is_empty() {
                    return Err(Error::Other(
                        "System agent returned an empty response for backup creation".into(),
                    ));
                }

                let size = archive_size(&path).await;
                self.ctx.store.set_backup_archive(id, &path, size).await?;
                self.ctx
                    .store
                    .set_status(ResourceKind::Backup, id, ResourceStatus::Completed)
                    .await?;
                self.reload(id).await
            },
            |cause| async move {
                self.ctx.mark_failed(ResourceKind::Backup, id, &cause).await;
            },
        )
        .await?;

        info!(
            name = %backup.name,
            path = backup.path.as_deref().unwrap_or_default(),
            size_bytes = backup.size_bytes,
            "Backup created"
        );
        Ok(backup)
    }

    /// Restore a completed archive onto its source
    pub async fn restore(&self, id: i64) -> Result<(), ServiceError> {
        let backup = self.get(id).await?;
        let path = match (&backup.path, backup.status) {
            (Some(path), ResourceStatus::Completed) => path.clone(),
            _ => {
                return Err(ValidationError::new(
                    "status",
                    format!("backup {} is {} and cannot be restored", backup.name, backup.status),
                )
                .into());
            }
        };
        if !is_inside(&path, &self.ctx.config.backup.directory) {
            return Err(ValidationError::new(
                "path",
                format!("archive is outside {}", self.ctx.config.backup.directory),
            )
            .into());
        }

        let target_path = match backup.kind {
            BackupKind::Web => Some(
                find(
                    format!("web domain {}", backup.source),
                    self.ctx.store.web_domain_by_name(&backup.source),
                )
                .await?
                .root_path,
            ),
            BackupKind::Database => None,
        };

        let command = match target_path {
            Some(target_path) => AgentCommand::RestoreBackup {
                path: path.clone(),
                target_path,
            },
            None => AgentCommand::RestoreDbBackup {
                path: path.clone(),
                db_name: backup.source.clone(),
            },
        };
        boundary::execute(
            format!("Failed to restore backup: {}", backup.name),
            self.ctx.agent.send(command),
        )
        .await?;

        info!(name = %backup.name, source = %backup.source, "Backup restored");
        Ok(())
    }

    /// Remove the archive through the agent, then the row
    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        let backup = self.get(id).await?;

        boundary::execute(format!("Failed to delete backup: {}", backup.name), async {
            if let Some(path) = &backup.path {
                self.ctx
                    .agent
                    .send(AgentCommand::DeleteFile { path: path.clone() })
                    .await?;
            }
            self.ctx.store.delete_backup(backup.id).await
        })
        .await?;

        info!(name = %backup.name, "Backup deleted");
        Ok(())
    }

    /// Store a recurring backup; the first run is due at the next
    /// occurrence of its time
    pub async fn create_schedule(
        &self,
        owner: &Owner,
        input: &NewBackupSchedule,
    ) -> Result<BackupSchedule, ServiceError> {
        let data = validate_schedule(input)?;
        let next_run_at = next_run_after(data.frequency, &data.time, Utc::now());

        let schedule = query(
            format!("Failed to create backup schedule: {}", data.name),
            self.ctx
                .store
                .insert_backup_schedule(owner.id, &owner.name, &data, next_run_at),
        )
        .await?;

        info!(
            id = schedule.id,
            name = %schedule.name,
            frequency = schedule.frequency.as_str(),
            next_run_at = ?schedule.next_run_at,
            "Backup schedule created"
        );
        Ok(schedule)
    }

    pub async fn set_schedule_enabled(
        &self,
        id: i64,
        enabled: bool,
    ) -> Result<BackupSchedule, ServiceError> {
        let schedule = self.get_schedule(id).await?;
        query(
            format!("Failed to update backup schedule: {}", schedule.name),
            self.ctx.store.set_backup_schedule_enabled(schedule.id, enabled),
        )
        .await?;

        info!(id = schedule.id, enabled = enabled, "Backup schedule toggled");
        self.get_schedule(id).await
    }

    /// Remove the schedule; archives it already made are kept
    pub async fn delete_schedule(&self, id: i64) -> Result<(), ServiceError> {
        let schedule = self.get_schedule(id).await?;
        query(
            format!("Failed to delete backup schedule: {}", schedule.name),
            self.ctx.store.delete_backup_schedule(schedule.id),
        )
        .await?;

        info!(id = schedule.id, name = %schedule.name, "Backup schedule deleted");
        Ok(())
    }

    /// Archive every source of a schedule and move it to its next run
    ///
    /// Each source is attempted even when an earlier one fails. A run with
    /// any failure counts against `failed_count` and returns the first
    /// error; a clean run counts in `run_count` and prunes completed
    /// archives older than the retention window.
    pub async fn run_schedule(&self, id: i64) -> Result<Vec<Backup>, ServiceError> {
        let schedule = self.get_schedule(id).await?;
        let sources = self.schedule_sources(&schedule).await?;
        let started = Utc::now();

        let mut made = Vec::new();
        let mut first_error = None;
        for (kind, source) in &sources {
            match self
                .create_for(schedule.user_id, &schedule.owner_name, *kind, source)
                .await
            {
                Ok(backup) => made.push(backup),
                Err(e) => {
                    error!(schedule = schedule.id, source = %source, error = %e, "Scheduled backup failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        let succeeded = first_error.is_none();
        let next_run_at = next_run_after(schedule.frequency, &schedule.time, Utc::now());
        query(
            format!("Failed to record run of backup schedule: {}", schedule.name),
            self.ctx
                .store
                .record_schedule_run(schedule.id, succeeded, started, next_run_at),
        )
        .await?;

        if let Some(e) = first_error {
            return Err(e);
        }

        self.prune(&schedule).await;
        info!(
            id = schedule.id,
            name = %schedule.name,
            backups = made.len(),
            next_run_at = %next_run_at,
            "Backup schedule processed"
        );
        Ok(made)
    }

    /// Enabled schedules due at `now`
    pub async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<BackupSchedule>, ServiceError> {
        query(
            "Failed to list due backup schedules".to_string(),
            self.ctx.store.backup_schedules_due(now),
        )
        .await
    }

    pub async fn get_schedule(&self, id: i64) -> Result<BackupSchedule, ServiceError> {
        find(format!("backup schedule #{id}"), self.ctx.store.backup_schedule(id)).await
    }

    pub async fn list_schedules(
        &self,
        owner: Option<&Owner>,
    ) -> Result<Vec<BackupSchedule>, ServiceError> {
        query(
            "Failed to list backup schedules".to_string(),
            self.ctx.store.list_backup_schedules(owner.map(|o| o.id)),
        )
        .await
    }

    /// Sources a run archives, web roots first
    async fn schedule_sources(
        &self,
        schedule: &BackupSchedule,
    ) -> Result<Vec<(BackupKind, String)>, ServiceError> {
        let targets = &schedule.targets;
        Ok(match schedule.scope {
            ScheduleScope::DatabaseOnly => targets
                .databases
                .iter()
                .map(|name| (BackupKind::Database, name.clone()))
                .collect(),
            ScheduleScope::FilesOnly => targets
                .web_domains
                .iter()
                .map(|domain| (BackupKind::Web, domain.clone()))
                .collect(),
            ScheduleScope::Full => {
                let store = &self.ctx.store;
                let user = Some(schedule.user_id);
                let (webs, databases) = query(
                    format!("Failed to load sources of backup schedule: {}", schedule.name),
                    async { Ok((store.list_web_domains(user).await?, store.list_databases(user).await?)) },
                )
                .await?;

                webs.into_iter()
                    .filter(|web| web.status == ResourceStatus::Active)
                    .map(|web| (BackupKind::Web, web.domain))
                    .chain(
                        databases
                            .into_iter()
                            .filter(|db| db.status == ResourceStatus::Active)
                            .map(|db| (BackupKind::Database, db.name)),
                    )
                    .collect()
            }
        })
    }

    /// Delete the owner's completed archives older than the retention
    /// window; failures are logged
    async fn prune(&self, schedule: &BackupSchedule) {
        let cutoff = Utc::now() - Duration::days(i64::from(schedule.retention_days));
        let expired = match self
            .ctx
            .store
            .completed_backups_before(schedule.user_id, cutoff)
            .await
        {
            Ok(expired) => expired,
            Err(e) => {
                warn!(schedule = schedule.id, error = %e, "Could not list expired backups");
                return;
            }
        };

        for backup in expired {
            if let Err(e) = self.delete(backup.id).await {
                warn!(backup = %backup.name, error = %e, "Failed to delete expired backup");
            }
        }
    }

    pub async fn get(&self, id: i64) -> Result<Backup, ServiceError> {
        find(format!("backup #{id}"), self.ctx.store.backup(id)).await
    }

    pub async fn list(&self, owner: Option<&Owner>) -> Result<Vec<Backup>, ServiceError> {
        query(
            "Failed to list backups".to_string(),
            self.ctx.store.list_backups(owner.map(|o| o.id)),
        )
        .await
    }

    /// The stored document root, or the conventional layout when the domain
    /// is not managed here
    async fn web_root(&self, user_name: &str, domain: &str) -> Result<String> {
        Ok(match self.ctx.store.web_domain_by_name(domain).await? {
            Some(web) => web.root_path,
            None => format!(
                "{}/{user_name}/web/{domain}/public",
                self.ctx.config.web.home_root
            ),
        })
    }

    async fn reload(&self, id: i64) -> Result<Backup> {
        self.ctx
            .store
            .backup(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("backup #{id}")))
    }
}

fn validate_schedule(input: &NewBackupSchedule) -> Result<ScheduleData, ValidationError> {
    validation::single_line("name", &input.name, MAX_SCHEDULE_NAME_LEN)?;
    let frequency: ScheduleFrequency = input
        .frequency
        .parse()
        .map_err(|e: String| ValidationError::new("frequency", e))?;
    let time = input
        .time
        .as_deref()
        .unwrap_or(DEFAULT_SCHEDULE_TIME)
        .to_string();
    validation::clock_time("time", &time)?;
    let scope: ScheduleScope = input
        .scope
        .parse()
        .map_err(|e: String| ValidationError::new("backup_type", e))?;

    let targets = match scope {
        ScheduleScope::Full => ScheduleTargets::default(),
        ScheduleScope::DatabaseOnly => {
            if input.targets.databases.is_empty() {
                return Err(ValidationError::new("targets", "name at least one database"));
            }
            for name in &input.targets.databases {
                validation::identifier("targets", name, MAX_DATABASE_NAME_LEN)?;
            }
            ScheduleTargets {
                databases: input.targets.databases.clone(),
                web_domains: Vec::new(),
            }
        }
        ScheduleScope::FilesOnly => {
            if input.targets.web_domains.is_empty() {
                return Err(ValidationError::new("targets", "name at least one web domain"));
            }
            for domain in &input.targets.web_domains {
                validation::domain("targets", domain)?;
            }
            ScheduleTargets {
                databases: Vec::new(),
                web_domains: input.targets.web_domains.clone(),
            }
        }
    };

    let retention_days = input.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);
    if !(1..=MAX_RETENTION_DAYS).contains(&retention_days) {
        return Err(ValidationError::new(
            "retention_days",
            format!("must be between 1 and {MAX_RETENTION_DAYS}"),
        ));
    }

    Ok(ScheduleData {
        name: input.name.trim().to_string(),
        frequency,
        time,
        scope,
        targets,
        retention_days,
    })
}

/// Next run of a schedule strictly after `now`
///
/// Hourly schedules run an hour from now. The others run at `time` (UTC)
/// today, or one period later when that moment has passed.
pub fn next_run_after(frequency: ScheduleFrequency, time: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    if frequency == ScheduleFrequency::Hourly {
        return now + Duration::hours(1);
    }

    let at = NaiveTime::parse_from_str(time, "%H:%M").unwrap_or(NaiveTime::MIN);
    let today = Utc.from_utc_datetime(&now.date_naive().and_time(at));
    if today > now {
        return today;
    }

    match frequency {
        ScheduleFrequency::Weekly => today + Duration::weeks(1),
        ScheduleFrequency::Monthly => today
            .checked_add_months(Months::new(1))
            .unwrap_or(today + Duration::days(30)),
        _ => today + Duration::days(1),
    }
}

/// Whether `path` lies under `directory` without climbing out through `..`
fn is_inside(path: &str, directory: &str) -> bool {
    let path = Path::new(path);
    path.is_absolute()
        && !path.components().any(|c| matches!(c, Component::ParentDir))
        && path.starts_with(directory)
}

/// Size of the archive when it is visible from this process
async fn archive_size(path: &str) -> Option<i64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => i64::try_from(meta.len()).ok(),
        Err(e) => {
            warn!(path = path, error = %e, "Backup archive not readable; size unknown");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn next_run_moves_past_elapsed_times() {
        let now = at("2024-05-10T10:30:00Z");

        assert_eq!(next_run_after(ScheduleFrequency::Daily, "12:00", now), at("2024-05-10T12:00:00Z"));
        assert_eq!(next_run_after(ScheduleFrequency::Daily, "02:00", now), at("2024-05-11T02:00:00Z"));
        assert_eq!(next_run_after(ScheduleFrequency::Weekly, "02:00", now), at("2024-05-17T02:00:00Z"));
        assert_eq!(next_run_after(ScheduleFrequency::Monthly, "02:00", now), at("2024-06-10T02:00:00Z"));
        assert_eq!(next_run_after(ScheduleFrequency::Hourly, "02:00", now), at("2024-05-10T11:30:00Z"));
        assert_eq!(next_run_after(ScheduleFrequency::Daily, "10:30", now), at("2024-05-11T10:30:00Z"));
    }

    #[test]
    fn schedule_validation() {
        let input = |scope: &str, targets: ScheduleTargets| NewBackupSchedule {
            name: "nightly".into(),
            frequency: "daily".into(),
            time: None,
            scope: scope.into(),
            targets,
            retention_days: None,
        };

        let full = validate_schedule(&input("full", ScheduleTargets::default())).unwrap();
        assert_eq!(full.time, "02:00");
        assert_eq!(full.retention_days, 30);

        let err = validate_schedule(&input("database_only", ScheduleTargets::default())).unwrap_err();
        assert_eq!(err.field, "targets");

        let err = validate_schedule(&input(
            "files_only",
            ScheduleTargets {
                databases: Vec::new(),
                web_domains: vec!["not a domain".into()],
            },
        ))
        .unwrap_err();
        assert_eq!(err.field, "targets");

        let err = validate_schedule(&NewBackupSchedule {
            frequency: "yearly".into(),
            ..input("full", ScheduleTargets::default())
        })
        .unwrap_err();
        assert_eq!(err.field, "frequency");
    }

    #[test]
    fn archive_paths_must_stay_in_the_backup_directory() {
        let dir = "/var/backups/supercp";
        assert!(is_inside("/var/backups/supercp/backup_web_example.com.tar.gz", dir));
        assert!(is_inside("/var/backups/supercp/2024/db.sql.gz", dir));

        assert!(!is_inside("/var/backups/supercp/../../etc/shadow", dir));
        assert!(!is_inside("/var/backups/supercp-other/x.tar.gz", dir));
        assert!(!is_inside("/tmp/x.tar.gz", dir));
        assert!(!is_inside("var/backups/supercp/x.tar.gz", dir));
    }
}
