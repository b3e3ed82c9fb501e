//! Architectural Contract Test: Deletion Order
//!
//! This test verifies the order of side effects when a resource is removed:
//! the agent first, the protocol tables best effort, the authoritative row
//! last.
//!
//! Constraints verified:
//! - An agent failure aborts the delete and keeps the authoritative row
//! - A protocol-table failure is logged, not raised
//! - Child rows (DNS records) go with their parent
//!
//! If this test fails, someone has:
//! - Reordered the delete stages
//! - Made table cleanup fatal to the caller
//! - Dropped the row before the agent confirmed

mod common;

use common::*;
use supercp_core::ServiceError;
use supercp_core::model::NewMailbox;
use supercp_core::password::Secret;

#[tokio::test]
async fn zone_delete_survives_table_failure() {
    let h = harness().await;
    let zone = h.plane.dns.create_zone(&owner(), "example.com").await.unwrap();
    h.tables.set_fail_deletes(true);

    h.plane
        .dns
        .delete_zone(zone.id)
        .await
        .expect("table failure is not raised to the caller");

    assert_eq!(h.transport.methods().last().unwrap(), "delete_dns_zone");
    let params = h.transport.last_params("delete_dns_zone").unwrap();
    assert_eq!(params["domain"], "example.com");

    let err = h.plane.dns.get_zone(zone.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    assert!(h.store().dns_records(zone.id).await.unwrap().is_empty());

    // The stale mirror is left for an operator; the delete did not touch it.
    assert!(h.tables.inner.has_zone("example.com").await.unwrap());
}

#[tokio::test]
async fn zone_delete_clears_tables_when_they_accept_it() {
    let h = harness().await;
    let zone = h.plane.dns.create_zone(&owner(), "example.com").await.unwrap();

    h.plane.dns.delete_zone(zone.id).await.unwrap();

    assert!(!h.tables.inner.has_zone("example.com").await.unwrap());
    assert!(h.tables.inner.mirrored_records("example.com").await.unwrap().is_empty());
}

#[tokio::test]
async fn agent_failure_keeps_the_authoritative_row() {
    let h = harness().await;
    let zone = h.plane.dns.create_zone(&owner(), "example.com").await.unwrap();
    h.transport.fail_method("delete_dns_zone", "Failed to remove zone file");

    let err = h.plane.dns.delete_zone(zone.id).await.unwrap_err();
    assert_eq!(
        err.as_operation().unwrap().context(),
        "Failed to delete DNS zone: example.com"
    );

    let kept = h.plane.dns.get_zone(zone.id).await.unwrap();
    assert_eq!(kept.domain, "example.com");
    assert_eq!(h.plane.dns.list_records(zone.id).await.unwrap().len(), 4);
    assert_eq!(h.tables.inner.mirrored_records("example.com").await.unwrap().len(), 7);
}

#[tokio::test]
async fn mailbox_delete_calls_agent_then_clears_everything() {
    let h = harness().await;
    let (account, _) = h
        .plane
        .mail
        .create(
            &owner(),
            &NewMailbox {
                email: "info@example.com".to_string(),
                password: Some(Secret::new("s3cret-pass")),
                quota_mb: Some(512),
            },
        )
        .await
        .unwrap();
    h.transport.clear();

    h.plane.mail.delete(account.id).await.unwrap();

    assert_eq!(h.transport.methods(), vec!["delete_email_account"]);
    assert!(h.tables.inner.mirrored_mailbox("info@example.com").await.unwrap().is_none());
    assert!(matches!(
        h.plane.mail.get(account.id).await,
        Err(ServiceError::NotFound(_))
    ));
}

#[tokio::test]
async fn unavailable_agent_blocks_mailbox_delete() {
    let h = harness().await;
    let (account, _) = h
        .plane
        .mail
        .create(
            &owner(),
            &NewMailbox {
                email: "info@example.com".to_string(),
                password: Some(Secret::new("s3cret-pass")),
                quota_mb: None,
            },
        )
        .await
        .unwrap();
    h.transport.set_unavailable(true);

    let err = h.plane.mail.delete(account.id).await.unwrap_err();
    assert!(err.as_operation().unwrap().is_agent_unavailable());

    assert!(h.plane.mail.get(account.id).await.is_ok());
    assert!(h.tables.inner.mirrored_mailbox("info@example.com").await.unwrap().is_some());
}
