use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{RecordStore, parse_column};
use crate::error::Result;
use crate::model::{
    Backup, BackupKind, BackupSchedule, ResourceStatus, ScheduleFrequency, ScheduleScope,
    ScheduleTargets,
};

const COLUMNS: &str = "id, user_id, name, kind, source, path, size_bytes, status, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Backup> {
    Ok(Backup {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        kind: parse_column(row, 3)?,
        source: row.get(4)?,
        path: row.get(5)?,
        size_bytes: row.get(6)?,
        status: parse_column(row, 7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const SCHEDULE_COLUMNS: &str = "id, user_id, owner_name, name, frequency, time, scope, targets, \
     retention_days, is_enabled, last_run_at, next_run_at, run_count, failed_count, created_at, updated_at";

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<BackupSchedule> {
    let targets: String = row.get(7)?;
    let targets: ScheduleTargets = serde_json::from_str(&targets).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(BackupSchedule {
        id: row.get(0)?,
        user_id: row.get(1)?,
        owner_name: row.get(2)?,
        name: row.get(3)?,
        frequency: parse_column(row, 4)?,
        time: row.get(5)?,
        scope: parse_column(row, 6)?,
        targets,
        retention_days: row.get(8)?,
        is_enabled: row.get(9)?,
        last_run_at: row.get(10)?,
        next_run_at: row.get(11)?,
        run_count: row.get(12)?,
        failed_count: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

/// Validated schedule contents, ready to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleData {
    pub name: String,
    pub frequency: ScheduleFrequency,
    pub time: String,
    pub scope: ScheduleScope,
    pub targets: ScheduleTargets,
    pub retention_days: u32,
}

impl RecordStore {
    pub async fn insert_backup(
        &self,
        user_id: i64,
        name: &str,
        kind: BackupKind,
        source: &str,
        status: ResourceStatus,
    ) -> Result<Backup> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO backups (user_id, name, kind, source, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![user_id, name, kind.as_str(), source, status.as_str(), Utc::now()],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            &format!("SELECT {COLUMNS} FROM backups WHERE id = ?1"),
            params![id],
            from_row,
        )?)
    }

    pub async fn backup(&self, id: i64) -> Result<Option<Backup>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM backups WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()?)
    }

    /// Record where the agent left the archive
    pub async fn set_backup_archive(&self, id: i64, path: &str, size_bytes: Option<i64>) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE backups SET path = ?1, size_bytes = ?2, updated_at = ?3 WHERE id = ?4",
            params![path, size_bytes, Utc::now(), id],
        )?;
        Ok(())
    }

    pub async fn list_backups(&self, user_id: Option<i64>) -> Result<Vec<Backup>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM backups
             WHERE (?1 IS NULL OR user_id = ?1) ORDER BY created_at DESC, id DESC"
        ))?;
        let backups = stmt
            .query_map(params![user_id], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(backups)
    }

    pub async fn delete_backup(&self, id: i64) -> Result<()> {
        let conn = self.conn().await;
        conn.execute("DELETE FROM backups WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Completed archives of a user made before `before`
    pub async fn completed_backups_before(
        &self,
        user_id: i64,
        before: DateTime<Utc>,
    ) -> Result<Vec<Backup>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM backups
             WHERE user_id = ?1 AND status = 'completed' AND created_at < ?2
             ORDER BY created_at"
        ))?;
        let backups = stmt
            .query_map(params![user_id, before], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(backups)
    }

    pub async fn insert_backup_schedule(
        &self,
        user_id: i64,
        owner_name: &str,
        data: &ScheduleData,
        next_run_at: DateTime<Utc>,
    ) -> Result<BackupSchedule> {
        let targets = serde_json::to_string(&data.targets)?;
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO backup_schedules
                (user_id, owner_name, name, frequency, time, scope, targets, retention_days,
                 next_run_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                user_id,
                owner_name,
                data.name,
                data.frequency.as_str(),
                data.time,
                data.scope.as_str(),
                targets,
                data.retention_days,
                next_run_at,
                Utc::now()
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            &format!("SELECT {SCHEDULE_COLUMNS} FROM backup_schedules WHERE id = ?1"),
            params![id],
            schedule_from_row,
        )?)
    }

    pub async fn backup_schedule(&self, id: i64) -> Result<Option<BackupSchedule>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM backup_schedules WHERE id = ?1"),
                params![id],
                schedule_from_row,
            )
            .optional()?)
    }

    pub async fn list_backup_schedules(&self, user_id: Option<i64>) -> Result<Vec<BackupSchedule>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM backup_schedules
             WHERE (?1 IS NULL OR user_id = ?1) ORDER BY id"
        ))?;
        let schedules = stmt
            .query_map(params![user_id], schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(schedules)
    }

    /// Enabled schedules whose next run is unset or not after `now`
    pub async fn backup_schedules_due(&self, now: DateTime<Utc>) -> Result<Vec<BackupSchedule>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM backup_schedules
             WHERE is_enabled = 1 AND (next_run_at IS NULL OR next_run_at <= ?1)
             ORDER BY id"
        ))?;
        let schedules = stmt
            .query_map(params![now], schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(schedules)
    }

    pub async fn set_backup_schedule_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE backup_schedules SET is_enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled, Utc::now(), id],
        )?;
        Ok(())
    }

    /// Record the outcome of one run and when the next one is due
    pub async fn record_schedule_run(
        &self,
        id: i64,
        succeeded: bool,
        ran_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn().await;
        if succeeded {
            conn.execute(
                "UPDATE backup_schedules
                 SET last_run_at = ?1, next_run_at = ?2, run_count = run_count + 1, updated_at = ?1
                 WHERE id = ?3",
                params![ran_at, next_run_at, id],
            )?;
        } else {
            conn.execute(
                "UPDATE backup_schedules
                 SET next_run_at = ?1, failed_count = failed_count + 1, updated_at = ?2
                 WHERE id = ?3",
                params![next_run_at, ran_at, id],
            )?;
        }
        Ok(())
    }

    pub async fn delete_backup_schedule(&self, id: i64) -> Result<()> {
        let conn = self.conn().await;
        conn.execute("DELETE FROM backup_schedules WHERE id = ?1", params![id])?;
        Ok(())
    }
}
