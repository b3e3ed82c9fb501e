//! Architectural Contract Test: Full-Set Pushes & Idempotent Resync
//!
//! This test verifies that DNS changes always travel as the zone's whole
//! record set, and that regenerating protocol tables from unchanged state
//! is a no-op.
//!
//! Constraints verified:
//! - Every `update_dns_zone` push carries all of the zone's records
//! - Mirrored PowerDNS rows are rebuilt, never appended to
//! - Resync of an unchanged zone writes byte-identical rows
//! - Mailbox and FTP mirrors follow the authoritative row
//!
//! If this test fails, someone has introduced:
//! - Per-record (diff) pushes to the agent
//! - Append-only table writes that duplicate rows
//! - Non-deterministic values (timestamps, serials) in mirrored rows

mod common;

use common::*;
use serde_json::Value;
use std::collections::HashSet;
use supercp_core::model::{NewDnsRecord, NewFtpAccount, NewMailbox};
use supercp_core::password::Secret;

fn pushed_records(h: &Harness) -> Vec<Value> {
    let params = h
        .transport
        .last_params("update_dns_zone")
        .expect("zone was pushed");
    params["records"].as_array().cloned().unwrap_or_default()
}

#[tokio::test]
async fn zone_creation_pushes_defaults_and_mirrors_them() {
    let h = harness().await;

    let zone = h
        .plane
        .dns
        .create_zone(&owner(), "Example.com")
        .await
        .expect("zone is created");

    assert_eq!(zone.domain, "example.com");
    let records = h.plane.dns.list_records(zone.id).await.unwrap();
    assert_eq!(records.len(), 4, "A @, A www and two NS @ are seeded");

    assert_eq!(h.transport.methods(), vec!["update_dns_zone"]);
    let params = h.transport.last_params("update_dns_zone").unwrap();
    assert_eq!(params["domain"], "example.com");
    assert_eq!(pushed_records(&h).len(), 4);

    let mirrored = h.tables.inner.mirrored_records("example.com").await.unwrap();
    assert_eq!(mirrored.len(), 7, "SOA + 2 zone NS + 4 records");
    assert_eq!(mirrored[0].record_type, "SOA");
    assert!(mirrored.iter().any(|r| r.name == "www.example.com" && r.record_type == "A"));
}

#[tokio::test]
async fn adding_a_record_pushes_the_whole_set_without_duplicates() {
    let h = harness().await;
    let zone = h.plane.dns.create_zone(&owner(), "example.com").await.unwrap();

    h.plane
        .dns
        .add_record(zone.id, &NewDnsRecord::new("TXT", "@", "v=spf1 mx -all"))
        .await
        .expect("record is added");

    assert_eq!(pushed_records(&h).len(), 5, "push carries all five records");

    h.plane.dns.resync_zone(zone.id).await.unwrap();

    let mirrored = h.tables.inner.mirrored_records("example.com").await.unwrap();
    assert_eq!(mirrored.len(), 8);
    let distinct: HashSet<_> = mirrored
        .iter()
        .map(|r| (r.name.clone(), r.record_type.clone(), r.content.clone()))
        .collect();
    assert_eq!(distinct.len(), 8, "no mirrored row is duplicated");
}

#[tokio::test]
async fn resync_of_unchanged_zone_is_byte_identical() {
    let h = harness().await;
    let zone = h.plane.dns.create_zone(&owner(), "example.com").await.unwrap();
    let first_push = h.transport.last_params("update_dns_zone").unwrap();
    let before = h.tables.inner.mirrored_records("example.com").await.unwrap();

    h.plane.dns.resync_zone(zone.id).await.unwrap();
    h.plane.dns.resync_zone(zone.id).await.unwrap();

    let after = h.tables.inner.mirrored_records("example.com").await.unwrap();
    assert_eq!(before, after);
    assert_eq!(h.transport.last_params("update_dns_zone").unwrap(), first_push);
    assert_eq!(h.transport.call_count(), 3);
}

#[tokio::test]
async fn deleting_a_record_pushes_the_remaining_set() {
    let h = harness().await;
    let zone = h.plane.dns.create_zone(&owner(), "example.com").await.unwrap();
    let www = h
        .plane
        .dns
        .list_records(zone.id)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.name == "www")
        .unwrap();

    h.plane.dns.delete_record(www.id).await.unwrap();

    let pushed = pushed_records(&h);
    assert_eq!(pushed.len(), 3);
    assert!(pushed.iter().all(|r| r["name"] != "www"));
    let mirrored = h.tables.inner.mirrored_records("example.com").await.unwrap();
    assert_eq!(mirrored.len(), 6);
}

#[tokio::test]
async fn mailbox_mirror_carries_the_stored_hash() {
    let h = harness().await;

    let (account, password) = h
        .plane
        .mail
        .create(
            &owner(),
            &NewMailbox {
                email: "Info@Example.com".to_string(),
                password: None,
                quota_mb: None,
            },
        )
        .await
        .expect("mailbox is created");

    assert_eq!(account.email, "info@example.com");
    assert!(!password.expose().is_empty(), "a password is generated");
    assert!(account.password_hash.verify(&password));

    let params = h.transport.last_params("update_email_account").unwrap();
    assert_eq!(params["email"], "info@example.com");
    assert_eq!(params["quota_mb"], 1024);

    let mirrored = h
        .tables
        .inner
        .mirrored_mailbox("info@example.com")
        .await
        .unwrap()
        .expect("virtual user row exists");
    assert_eq!(mirrored.domain, "example.com");
    assert_eq!(mirrored.password, account.password_hash.as_str());

    h.plane.mail.resync(account.id).await.unwrap();
    let again = h.tables.inner.mirrored_mailbox("info@example.com").await.unwrap();
    assert_eq!(again, Some(mirrored));
}

#[tokio::test]
async fn disabled_ftp_user_stays_mirrored_as_inactive() {
    let h = harness().await;

    let account = h
        .plane
        .ftp
        .create(
            &owner(),
            &NewFtpAccount {
                username: "deploy".to_string(),
                password: Secret::new("correct-horse"),
                home_dir: None,
            },
        )
        .await
        .expect("FTP user is created");

    assert_eq!(account.home_dir, "/home/ftp/deploy");
    let row = h.tables.inner.mirrored_ftp_user("deploy").await.unwrap().unwrap();
    assert!(row.active);
    assert_eq!(row.dir, "/home/ftp/deploy");

    h.plane.ftp.disable(account.id).await.unwrap();
    let row = h.tables.inner.mirrored_ftp_user("deploy").await.unwrap().unwrap();
    assert!(!row.active);

    h.plane.ftp.enable(account.id).await.unwrap();
    let row = h.tables.inner.mirrored_ftp_user("deploy").await.unwrap().unwrap();
    assert!(row.active);
}
