use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::{RecordStore, parse_column};
use crate::error::{Error, Result};
use crate::model::{CronJob, ResourceStatus};

const COLUMNS: &str = "id, user_id, owner_name, command, schedule, description, is_active, \
     status, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<CronJob> {
    Ok(CronJob {
        id: row.get(0)?,
        user_id: row.get(1)?,
        owner_name: row.get(2)?,
        command: row.get(3)?,
        schedule: row.get(4)?,
        description: row.get(5)?,
        is_active: row.get(6)?,
        status: parse_column(row, 7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl RecordStore {
    pub async fn insert_cron_job(
        &self,
        user_id: i64,
        owner_name: &str,
        command: &str,
        schedule: &str,
        description: Option<&str>,
        status: ResourceStatus,
    ) -> Result<CronJob> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO cron_jobs (user_id, owner_name, command, schedule, description, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                user_id,
                owner_name,
                command,
                schedule,
                description,
                status.as_str(),
                Utc::now()
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            &format!("SELECT {COLUMNS} FROM cron_jobs WHERE id = ?1"),
            params![id],
            from_row,
        )?)
    }

    pub async fn cron_job(&self, id: i64) -> Result<Option<CronJob>> {
        let conn = self.conn().await;
        Ok(conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM cron_jobs WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()?)
    }

    /// Overwrite the editable fields of a job
    pub async fn update_cron_job(&self, job: &CronJob) -> Result<CronJob> {
        let conn = self.conn().await;
        let changed = conn.execute(
            "UPDATE cron_jobs
             SET command = ?1, schedule = ?2, description = ?3, is_active = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                job.command,
                job.schedule,
                job.description,
                job.is_active,
                Utc::now(),
                job.id
            ],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("cron job #{}", job.id)));
        }
        Ok(conn.query_row(
            &format!("SELECT {COLUMNS} FROM cron_jobs WHERE id = ?1"),
            params![job.id],
            from_row,
        )?)
    }

    /// The jobs that make up a user's crontab, in insertion order
    pub async fn crontab_entries(&self, user_id: i64) -> Result<Vec<CronJob>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM cron_jobs
             WHERE user_id = ?1 AND is_active = 1 AND status = 'active'
             ORDER BY id"
        ))?;
        let jobs = stmt
            .query_map(params![user_id], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub async fn list_cron_jobs(&self, user_id: Option<i64>) -> Result<Vec<CronJob>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM cron_jobs
             WHERE (?1 IS NULL OR user_id = ?1) ORDER BY id"
        ))?;
        let jobs = stmt
            .query_map(params![user_id], from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Every `(user_id, owner_name)` that owns at least one job
    pub async fn crontab_owners(&self) -> Result<Vec<(i64, String)>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(
            "SELECT user_id, MIN(owner_name) FROM cron_jobs GROUP BY user_id ORDER BY user_id",
        )?;
        let owners = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(owners)
    }

    pub async fn delete_cron_job(&self, id: i64) -> Result<()> {
        let conn = self.conn().await;
        conn.execute("DELETE FROM cron_jobs WHERE id = ?1", params![id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKind;
    use crate::store::Database;

    #[tokio::test]
    async fn crontab_holds_only_active_enabled_jobs() {
        let store = RecordStore::new(Database::open_in_memory().unwrap())
            .await
            .unwrap();
        let kept = store
            .insert_cron_job(1, "alice", "/usr/bin/true", "0 * * * *", None, ResourceStatus::Active)
            .await
            .unwrap();
        let paused = store
            .insert_cron_job(1, "alice", "/usr/bin/false", "@daily", None, ResourceStatus::Active)
            .await
            .unwrap();
        store
            .update_cron_job(&CronJob {
                is_active: false,
                ..paused
            })
            .await
            .unwrap();
        let broken = store
            .insert_cron_job(1, "alice", "/bin/echo", "@hourly", None, ResourceStatus::Active)
            .await
            .unwrap();
        store
            .set_status(ResourceKind::CronJob, broken.id, ResourceStatus::Failed)
            .await
            .unwrap();
        store
            .insert_cron_job(2, "bob", "/bin/date", "@reboot", None, ResourceStatus::Active)
            .await
            .unwrap();

        let entries = store.crontab_entries(1).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, kept.id);

        assert_eq!(
            store.crontab_owners().await.unwrap(),
            vec![(1, "alice".to_string()), (2, "bob".to_string())]
        );
    }
}
