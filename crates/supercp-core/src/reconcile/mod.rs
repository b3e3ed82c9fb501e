//! Scheduled reconciliation
//!
//! The reconciler periodically re-derives every agent artifact and
//! protocol-table row that can be regenerated from the record store. It
//! calls the same idempotent resync entry points an operator would, so a
//! pass over unchanged state leaves the mirrors byte-identical.
//!
//! ## Pass Order
//!
//! 1. Active DNS zones (agent push + table regeneration)
//! 2. Active mailboxes (tables only)
//! 3. Active and suspended FTP users (tables only)
//! 4. Applied firewall rules (agent)
//! 5. Let's Encrypt certificates inside the renewal window
//! 6. Crontabs of every user with cron jobs (agent, full set)
//! 7. Backup schedules whose next run is due
//! 8. Disk usage of active databases and web domains
//!
//! One resource failing never stops the pass; failures are reported as
//! events and retried on the next tick. A failed renewal leaves the
//! installed certificate in place, so it is picked up again while it is
//! still inside the window.

use chrono::Utc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, warn};

use crate::error::{Result, ServiceError};
use crate::model::{ResourceKind, ResourceStatus, SslProvider};
use crate::services::ControlPlane;

/// Certificates expiring within this many days are renewed
pub const RENEWAL_WINDOW_DAYS: i64 = 30;

/// Events emitted by the [`Reconciler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    Started {
        interval_secs: u64,
    },

    PassStarted {
        pass: u64,
    },

    /// One resource re-derived successfully
    ResourceSynced {
        kind: ResourceKind,
        id: i64,
    },

    /// One resource could not be re-derived; it is retried next pass
    ResourceFailed {
        kind: ResourceKind,
        id: i64,
        error: String,
    },

    PassCompleted {
        pass: u64,
        synced: usize,
        failed: usize,
    },

    Stopped {
        reason: String,
    },
}

/// Outcome of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub synced: usize,
    pub failed: usize,
}

impl ReconcileReport {
    fn record(&mut self, outcome: &std::result::Result<(), ServiceError>) {
        match outcome {
            Ok(()) => self.synced += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Periodic full resync over a [`ControlPlane`]
pub struct Reconciler {
    plane: ControlPlane,
    interval: Duration,
    event_tx: mpsc::Sender<ReconcileEvent>,
}

impl Reconciler {
    /// Create a reconciler and the receiving end of its event channel
    pub fn new(plane: ControlPlane) -> (Self, mpsc::Receiver<ReconcileEvent>) {
        let config = &plane.context().config.reconcile;
        let interval = Duration::from_secs(config.interval_secs.max(1));
        let (tx, rx) = mpsc::channel(config.event_channel_capacity.max(1));

        let reconciler = Self {
            plane,
            interval,
            event_tx: tx,
        };
        (reconciler, rx)
    }

    /// Run passes until SIGINT/SIGTERM
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run passes until `shutdown_rx` fires
    ///
    /// **TESTING ONLY**: the daemon uses [`Reconciler::run`], which stops
    /// on OS signals.
    pub async fn run_with_shutdown(&self, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        self.run_internal(Some(shutdown_rx)).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.emit_event(ReconcileEvent::Started {
            interval_secs: self.interval.as_secs(),
        });
        info!(interval_secs = self.interval.as_secs(), "Reconciler started");

        let mut ticks = IntervalStream::new(tokio::time::interval(self.interval));
        let mut pass = 0u64;
        let shutdown = async {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => wait_for_signal().await,
            }
        };
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(_) = ticks.next() => {
                    pass += 1;
                    if let Err(e) = self.run_pass(pass).await {
                        error!(pass = pass, error = %e, "Reconcile pass aborted");
                    }
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    self.emit_event(ReconcileEvent::Stopped {
                        reason: "Shutdown signal".to_string(),
                    });
                    break;
                }
            }
        }

        info!(passes = pass, "Reconciler stopped");
        Ok(())
    }

    async fn run_pass(&self, pass: u64) -> Result<ReconcileReport> {
        self.emit_event(ReconcileEvent::PassStarted { pass });
        let report = self.reconcile_once().await?;
        self.emit_event(ReconcileEvent::PassCompleted {
            pass,
            synced: report.synced,
            failed: report.failed,
        });
        Ok(report)
    }

    /// One full pass
    ///
    /// Fails only when the record store cannot be read; per-resource
    /// failures are counted in the report.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let store = &self.plane.context().store;
        let mut report = ReconcileReport::default();

        for zone in store.dns_zones_with_status(ResourceStatus::Active).await? {
            let outcome = self.plane.dns.resync_zone(zone.id).await;
            self.observe(ResourceKind::DnsZone, zone.id, &outcome, &mut report);
        }

        for account in store.email_accounts_with_status(ResourceStatus::Active).await? {
            let outcome = self.plane.mail.resync(account.id).await;
            self.observe(ResourceKind::Mailbox, account.id, &outcome, &mut report);
        }

        for account in store.ftp_accounts_to_mirror().await? {
            let outcome = self.plane.ftp.resync(account.id).await;
            self.observe(ResourceKind::FtpAccount, account.id, &outcome, &mut report);
        }

        for rule in store.applied_firewall_rules().await? {
            let outcome = self.plane.firewall.resync_rule(rule.id).await;
            self.observe(ResourceKind::FirewallRule, rule.id, &outcome, &mut report);
        }

        let window_end = Utc::now() + chrono::Duration::days(RENEWAL_WINDOW_DAYS);
        for certificate in store.certificates_expiring_before(window_end).await? {
            if certificate.provider != SslProvider::LetsEncrypt {
                continue;
            }
            let outcome = self.plane.ssl.renew(certificate.id).await.map(|_| ());
            self.observe(ResourceKind::SslCertificate, certificate.id, &outcome, &mut report);
        }

        for (user_id, user_name) in store.crontab_owners().await? {
            let outcome = self.plane.cron.resync_user(user_id, &user_name).await;
            self.observe(ResourceKind::Crontab, user_id, &outcome, &mut report);
        }

        for schedule in store.backup_schedules_due(Utc::now()).await? {
            let outcome = self.plane.backups.run_schedule(schedule.id).await.map(|_| ());
            self.observe(ResourceKind::BackupSchedule, schedule.id, &outcome, &mut report);
        }

        for database in store.list_databases(None).await? {
            if database.status != ResourceStatus::Active {
                continue;
            }
            let outcome = self.plane.databases.refresh_size(database.id).await.map(|_| ());
            self.observe(ResourceKind::Database, database.id, &outcome, &mut report);
        }

        for web in store.list_web_domains(None).await? {
            if web.status != ResourceStatus::Active {
                continue;
            }
            let outcome = self.plane.web.refresh_size(web.id).await.map(|_| ());
            self.observe(ResourceKind::WebDomain, web.id, &outcome, &mut report);
        }

        info!(synced = report.synced, failed = report.failed, "Reconcile pass finished");
        Ok(report)
    }

    fn observe(
        &self,
        kind: ResourceKind,
        id: i64,
        outcome: &std::result::Result<(), ServiceError>,
        report: &mut ReconcileReport,
    ) {
        report.record(outcome);
        match outcome {
            Ok(()) => {
                debug!(kind = %kind, id = id, "Resource reconciled");
                self.emit_event(ReconcileEvent::ResourceSynced { kind, id });
            }
            Err(e) => {
                warn!(kind = %kind, id = id, error = %e, "Resource reconcile failed");
                self.emit_event(ReconcileEvent::ResourceFailed {
                    kind,
                    id,
                    error: e.to_string(),
                });
            }
        }
    }

    fn emit_event(&self, event: ReconcileEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Resolve on SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Signal handlers unavailable, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
