//! Architectural Contract Test: Scheduled Work
//!
//! This test verifies the recurring work the control plane owns: per-user
//! crontabs, backup schedules and disk-usage refresh.
//!
//! Constraints verified:
//! - Every crontab change pushes the user's complete active set
//! - A failed crontab push leaves the store describing the host
//! - Due backup schedules run inside a reconcile pass and move forward
//! - A schedule run attempts every source and counts partial failure
//! - Usage refresh stores sizes and one failure does not stop the pass
//!
//! If this test fails, someone has:
//! - Pushed single cron entries instead of the whole crontab
//! - Left an edited job in the store after the host rejected it
//! - Let a failed schedule stay due forever, or stop at the first source

mod common;

use chrono::{Duration, Utc};
use common::*;
use serde_json::json;
use supercp_core::model::{
    CronJobUpdate, NewBackupSchedule, NewCronJob, NewDatabase, NewWebDomain, ResourceStatus,
    ScheduleTargets,
};
use supercp_core::password::Secret;
use supercp_core::reconcile::ReconcileReport;
use supercp_core::{Reconciler, ServiceError};

fn job(command: &str, schedule: &str) -> NewCronJob {
    NewCronJob {
        command: command.to_string(),
        schedule: schedule.to_string(),
        description: None,
    }
}

fn pushed_jobs(h: &Harness) -> Vec<serde_json::Value> {
    h.transport.last_params("update_cron_jobs").unwrap()["jobs"]
        .as_array()
        .unwrap()
        .clone()
}

fn nightly(scope: &str, targets: ScheduleTargets) -> NewBackupSchedule {
    NewBackupSchedule {
        name: "nightly".to_string(),
        frequency: "daily".to_string(),
        time: Some("02:00".to_string()),
        scope: scope.to_string(),
        targets,
        retention_days: None,
    }
}

fn shop_only() -> ScheduleTargets {
    ScheduleTargets {
        databases: vec!["shop".to_string()],
        web_domains: Vec::new(),
    }
}

async fn site_and_database(h: &Harness) {
    h.plane
        .web
        .create(
            &owner(),
            &NewWebDomain {
                domain: "example.com".to_string(),
                root_path: None,
                php_version: None,
            },
        )
        .await
        .unwrap();
    h.plane
        .databases
        .create(
            &owner(),
            &NewDatabase {
                name: "shop".to_string(),
                password: Secret::new("correct-horse"),
                db_type: None,
                max_connections: None,
            },
        )
        .await
        .unwrap();
    h.transport.clear();
}

// ---------------------------------------------------------------------------
// Cron
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_cron_change_pushes_the_whole_crontab() {
    let h = harness().await;

    h.plane.cron.create(&owner(), &job("php artisan schedule:run", "* * * * *")).await.unwrap();
    let second = h
        .plane
        .cron
        .create(&owner(), &job("/usr/local/bin/cleanup", "0 3 * * *"))
        .await
        .unwrap();

    let params = h.transport.last_params("update_cron_jobs").unwrap();
    assert_eq!(params["user"], "alice");
    let jobs = pushed_jobs(&h);
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[1]["command"], "/usr/local/bin/cleanup");
    assert_eq!(jobs[1]["schedule"], "0 3 * * *");

    h.plane.cron.delete(second.id).await.unwrap();

    assert_eq!(pushed_jobs(&h).len(), 1);
    assert!(matches!(
        h.plane.cron.get(second.id).await,
        Err(ServiceError::NotFound(_))
    ));
}

#[tokio::test]
async fn failed_cron_push_marks_the_new_job_failed() {
    let h = harness().await;
    h.plane.cron.create(&owner(), &job("/usr/bin/true", "@daily")).await.unwrap();
    h.transport.fail_method("update_cron_jobs", "crontab: installing new crontab failed");

    let err = h
        .plane
        .cron
        .create(&owner(), &job("/usr/bin/false", "@hourly"))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Operation(_)));
    let jobs = h.plane.cron.list(Some(&owner())).await.unwrap();
    assert_eq!(jobs.len(), 2);
    let failed = jobs.iter().find(|j| j.command == "/usr/bin/false").unwrap();
    assert_eq!(failed.status, ResourceStatus::Failed);

    // Failed jobs never reach the host on later pushes.
    h.transport.clear_failures();
    h.plane.cron.create(&owner(), &job("/usr/bin/env", "@weekly")).await.unwrap();
    let commands: Vec<_> = pushed_jobs(&h).iter().map(|j| j["command"].clone()).collect();
    assert_eq!(commands, vec![json!("/usr/bin/true"), json!("/usr/bin/env")]);
}

#[tokio::test]
async fn failed_cron_update_restores_the_stored_job() {
    let h = harness().await;
    let created = h.plane.cron.create(&owner(), &job("/usr/bin/backup", "0 2 * * *")).await.unwrap();
    h.transport.fail_method("update_cron_jobs", "crontab: permission denied");

    h.plane
        .cron
        .update(
            created.id,
            &CronJobUpdate {
                schedule: Some("*/5 * * * *".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    let stored = h.plane.cron.get(created.id).await.unwrap();
    assert_eq!(stored.schedule, "0 2 * * *");
    assert!(stored.is_active);
}

#[tokio::test]
async fn deactivated_jobs_leave_the_crontab() {
    let h = harness().await;
    let created = h.plane.cron.create(&owner(), &job("/usr/bin/backup", "0 2 * * *")).await.unwrap();

    let updated = h
        .plane
        .cron
        .update(
            created.id,
            &CronJobUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!updated.is_active);
    assert!(pushed_jobs(&h).is_empty());
}

#[tokio::test]
async fn cron_input_is_checked_before_any_write() {
    let h = harness().await;

    let bad_schedule = h.plane.cron.create(&owner(), &job("/usr/bin/true", "every day")).await;
    let multi_line = h
        .plane
        .cron
        .create(&owner(), &job("/usr/bin/true\n* * * * * rm -rf /", "@daily"))
        .await;

    assert!(matches!(bad_schedule, Err(ServiceError::Validation(ref v)) if v.field == "schedule"));
    assert!(matches!(multi_line, Err(ServiceError::Validation(ref v)) if v.field == "command"));
    assert_eq!(h.transport.call_count(), 0);
    assert!(h.plane.cron.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn reconciliation_repushes_crontabs() {
    let h = harness().await;
    h.plane.cron.create(&owner(), &job("/usr/bin/true", "@daily")).await.unwrap();
    h.transport.clear();

    let (reconciler, _events) = Reconciler::new(h.plane.clone());
    let report = reconciler.reconcile_once().await.unwrap();

    assert_eq!(report, ReconcileReport { synced: 1, failed: 0 });
    assert_eq!(h.transport.methods(), vec!["update_cron_jobs"]);
    assert_eq!(pushed_jobs(&h).len(), 1);
}

// ---------------------------------------------------------------------------
// Backup schedules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_schedule_waits_for_its_first_run() {
    let h = harness().await;

    let schedule = h
        .plane
        .backups
        .create_schedule(&owner(), &nightly("database_only", shop_only()))
        .await
        .unwrap();

    assert!(schedule.is_enabled);
    assert_eq!(schedule.retention_days, 30);
    assert_eq!(schedule.run_count, 0);
    assert!(schedule.next_run_at.unwrap() > Utc::now());
    assert!(h.plane.backups.due_schedules(Utc::now()).await.unwrap().is_empty());
    assert_eq!(h.transport.call_count(), 0);
}

#[tokio::test]
async fn schedule_input_is_validated() {
    let h = harness().await;

    let no_targets = h
        .plane
        .backups
        .create_schedule(&owner(), &nightly("database_only", ScheduleTargets::default()))
        .await;
    let yearly = h
        .plane
        .backups
        .create_schedule(
            &owner(),
            &NewBackupSchedule {
                frequency: "yearly".to_string(),
                ..nightly("full", ScheduleTargets::default())
            },
        )
        .await;

    assert!(matches!(no_targets, Err(ServiceError::Validation(ref v)) if v.field == "targets"));
    assert!(matches!(yearly, Err(ServiceError::Validation(ref v)) if v.field == "frequency"));
}

#[tokio::test]
async fn due_schedule_runs_inside_a_reconcile_pass() {
    let h = harness().await;
    h.transport
        .reply_with("create_db_backup", json!("/var/lib/supercp/backups/shop.sql.gz"));
    let schedule = h
        .plane
        .backups
        .create_schedule(&owner(), &nightly("database_only", shop_only()))
        .await
        .unwrap();
    let an_hour_ago = Utc::now() - Duration::hours(1);
    h.store()
        .record_schedule_run(schedule.id, true, an_hour_ago, an_hour_ago)
        .await
        .unwrap();

    let (reconciler, _events) = Reconciler::new(h.plane.clone());
    let report = reconciler.reconcile_once().await.unwrap();

    assert_eq!(report, ReconcileReport { synced: 1, failed: 0 });
    let schedule = h.plane.backups.get_schedule(schedule.id).await.unwrap();
    assert_eq!(schedule.run_count, 2);
    assert!(schedule.next_run_at.unwrap() > Utc::now());
    let backups = h.plane.backups.list(Some(&owner())).await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].status, ResourceStatus::Completed);
}

#[tokio::test]
async fn full_schedule_attempts_every_source_and_counts_the_failure() {
    let h = harness().await;
    site_and_database(&h).await;
    h.transport
        .reply_with("create_backup", json!("/var/lib/supercp/backups/example.tar.gz"));
    h.transport.fail_method("create_db_backup", "mysqldump: Got error 2013");
    let schedule = h
        .plane
        .backups
        .create_schedule(&owner(), &nightly("full", ScheduleTargets::default()))
        .await
        .unwrap();

    let err = h.plane.backups.run_schedule(schedule.id).await.unwrap_err();

    assert!(matches!(err, ServiceError::Operation(_)));
    assert_eq!(h.transport.methods(), vec!["create_backup", "create_db_backup"]);
    let schedule = h.plane.backups.get_schedule(schedule.id).await.unwrap();
    assert_eq!(schedule.run_count, 0);
    assert_eq!(schedule.failed_count, 1);
    assert!(schedule.next_run_at.unwrap() > Utc::now());

    let mut statuses: Vec<_> = h
        .plane
        .backups
        .list(Some(&owner()))
        .await
        .unwrap()
        .into_iter()
        .map(|b| (b.kind.as_str(), b.status))
        .collect();
    statuses.sort_by_key(|(kind, _)| *kind);
    assert_eq!(
        statuses,
        vec![("database", ResourceStatus::Failed), ("web", ResourceStatus::Completed)]
    );
}

#[tokio::test]
async fn disabled_schedules_are_never_due() {
    let h = harness().await;
    let schedule = h
        .plane
        .backups
        .create_schedule(&owner(), &nightly("database_only", shop_only()))
        .await
        .unwrap();
    let yesterday = Utc::now() - Duration::days(1);
    h.store()
        .record_schedule_run(schedule.id, true, yesterday, yesterday)
        .await
        .unwrap();
    assert_eq!(h.plane.backups.due_schedules(Utc::now()).await.unwrap().len(), 1);

    h.plane.backups.set_schedule_enabled(schedule.id, false).await.unwrap();

    assert!(h.plane.backups.due_schedules(Utc::now()).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconciliation_stores_reported_sizes() {
    let h = harness().await;
    site_and_database(&h).await;
    h.transport.reply_with("get_database_size", json!(4096));
    h.transport.reply_with("get_directory_size", json!(123_456));

    let (reconciler, _events) = Reconciler::new(h.plane.clone());
    let report = reconciler.reconcile_once().await.unwrap();

    assert_eq!(report.failed, 0);
    let database = h.plane.databases.list(Some(&owner())).await.unwrap().remove(0);
    assert_eq!(database.size_bytes, Some(4096));
    let web = h.plane.web.list(Some(&owner())).await.unwrap().remove(0);
    assert_eq!(web.size_bytes, Some(123_456));
    let params = h.transport.last_params("get_directory_size").unwrap();
    assert_eq!(params["path"], "/home/alice/web/example.com/public");
}

#[tokio::test]
async fn failed_size_refresh_does_not_stop_the_pass() {
    let h = harness().await;
    site_and_database(&h).await;
    h.transport.fail_method("get_database_size", "Unknown database 'shop'");
    h.transport.reply_with("get_directory_size", json!(2048));

    let (reconciler, _events) = Reconciler::new(h.plane.clone());
    let report = reconciler.reconcile_once().await.unwrap();

    assert_eq!(report.failed, 1);
    let database = h.plane.databases.list(Some(&owner())).await.unwrap().remove(0);
    assert_eq!(database.size_bytes, None);
    let web = h.plane.web.list(Some(&owner())).await.unwrap().remove(0);
    assert_eq!(web.size_bytes, Some(2048));
}
