//! Test doubles and common utilities for architecture contract tests
//!
//! The control plane under test runs over an in-memory SQLite database and
//! a scripted agent transport that records every call and can be told to
//! fail.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use supercp_core::agent::AgentClient;
use supercp_core::error::{AGENT_HANDLER_ERROR, SyncError, TransportError};
use supercp_core::model::{DnsRecord, DnsZone, EmailAccount, FtpAccount, Owner};
use supercp_core::traits::{AgentTransport, Params, ProtocolTables};
use supercp_core::{ControlPlane, Database, PanelConfig, RecordStore, SqlProtocolTables};

/// Endpoint reported by the scripted transport when it is "down"
pub const FAKE_SOCKET: &str = "/run/supercp/test-agent.sock";

/// An agent transport that records calls and answers from a script
///
/// Every method succeeds with `"ok"` unless a result or a failure was
/// scripted for it.
#[derive(Default)]
pub struct ScriptedTransport {
    calls: Mutex<Vec<(String, Params)>>,
    unavailable: AtomicBool,
    failures: Mutex<HashMap<String, String>>,
    results: Mutex<HashMap<String, Value>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call fail as if the socket were missing
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Answer `method` with an agent error envelope
    pub fn fail_method(&self, method: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(method.to_string(), message.to_string());
    }

    /// Drop every scripted failure
    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Answer `method` with `result`
    pub fn reply_with(&self, method: &str, result: Value) {
        self.results
            .lock()
            .unwrap()
            .insert(method.to_string(), result);
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<(String, Params)> {
        self.calls.lock().unwrap().clone()
    }

    /// Method names of all calls so far, in order
    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|(method, _)| method).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Params of the most recent call to `method`
    pub fn last_params(&self, method: &str) -> Option<Params> {
        self.calls()
            .into_iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, params)| params)
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl AgentTransport for ScriptedTransport {
    async fn call(&self, method: &str, params: Params) -> Result<Value, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::unavailable(FAKE_SOCKET, "Connection refused"));
        }

        if let Some(message) = self.failures.lock().unwrap().get(method) {
            return Ok(json!({
                "jsonrpc": "2.0",
                "error": {"code": AGENT_HANDLER_ERROR, "message": message},
                "id": "scripted",
            }));
        }

        let result = self
            .results
            .lock()
            .unwrap()
            .get(method)
            .cloned()
            .unwrap_or_else(|| json!("ok"));
        Ok(json!({"jsonrpc": "2.0", "result": result, "id": "scripted"}))
    }

    fn transport_name(&self) -> &'static str {
        "scripted"
    }
}

/// Real SQLite protocol tables with switchable write/delete failures
pub struct FaultyTables {
    pub inner: SqlProtocolTables,
    fail_syncs: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FaultyTables {
    pub fn new(inner: SqlProtocolTables) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_syncs: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        })
    }

    pub fn set_fail_syncs(&self, fail: bool) {
        self.fail_syncs.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn check(&self, flag: &AtomicBool) -> Result<(), SyncError> {
        if flag.load(Ordering::SeqCst) {
            return Err(SyncError::invalid_resource("injected table failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolTables for FaultyTables {
    async fn sync_dns_zone(&self, zone: &DnsZone, records: &[DnsRecord]) -> Result<(), SyncError> {
        self.check(&self.fail_syncs)?;
        self.inner.sync_dns_zone(zone, records).await
    }

    async fn delete_dns_zone(&self, domain: &str) -> Result<(), SyncError> {
        self.check(&self.fail_deletes)?;
        self.inner.delete_dns_zone(domain).await
    }

    async fn sync_mailbox(&self, account: &EmailAccount) -> Result<(), SyncError> {
        self.check(&self.fail_syncs)?;
        self.inner.sync_mailbox(account).await
    }

    async fn delete_mailbox(&self, email: &str) -> Result<(), SyncError> {
        self.check(&self.fail_deletes)?;
        self.inner.delete_mailbox(email).await
    }

    async fn sync_ftp_account(&self, account: &FtpAccount) -> Result<(), SyncError> {
        self.check(&self.fail_syncs)?;
        self.inner.sync_ftp_account(account).await
    }

    async fn delete_ftp_account(&self, username: &str) -> Result<(), SyncError> {
        self.check(&self.fail_deletes)?;
        self.inner.delete_ftp_account(username).await
    }
}

/// A control plane wired to test doubles
pub struct Harness {
    pub plane: ControlPlane,
    pub transport: Arc<ScriptedTransport>,
    pub tables: Arc<FaultyTables>,
}

impl Harness {
    pub fn store(&self) -> &RecordStore {
        &self.plane.context().store
    }
}

/// Build a control plane over a fresh in-memory database
pub async fn harness() -> Harness {
    harness_with(PanelConfig::default()).await
}

pub async fn harness_with(config: PanelConfig) -> Harness {
    let db = Database::open_in_memory().expect("in-memory database opens");
    let store = RecordStore::new(db.clone())
        .await
        .expect("authoritative schema applies");
    let tables = FaultyTables::new(
        SqlProtocolTables::new(db, &config.ftp)
            .await
            .expect("protocol schema applies"),
    );
    let transport = ScriptedTransport::new();

    let plane = ControlPlane::new(
        config,
        store,
        AgentClient::new(transport.clone()),
        tables.clone(),
    );

    Harness {
        plane,
        transport,
        tables,
    }
}

/// The acting user for most tests
pub fn owner() -> Owner {
    Owner {
        id: 1,
        name: "alice".to_string(),
        email: "alice@example.net".to_string(),
    }
}
