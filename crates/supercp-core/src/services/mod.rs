//! Resource services
//!
//! One service per resource family. Every mutating method follows the same
//! shape: validate (no side effects) → one wrapped section that writes the
//! authoritative record, calls the agent and fans out to the protocol
//! tables → compensation on failure.
//!
//! [`ControlPlane`] bundles all services over one shared context.

mod backup;
mod cron;
mod database;
mod dns;
mod files;
mod firewall;
mod ftp;
mod mail;
mod ssl;
mod system;
mod web;

pub use backup::{BackupService, next_run_after};
pub use cron::CronService;
pub use database::DatabaseService;
pub use dns::DnsService;
pub use files::FileService;
pub use firewall::FirewallService;
pub use ftp::FtpService;
pub use mail::MailService;
pub use ssl::SslService;
pub use system::{DEFAULT_LOG_LINES, LogKind, SystemService};
pub use web::WebDomainService;

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::AgentClient;
use crate::boundary;
use crate::config::PanelConfig;
use crate::error::{Result, ServiceError};
use crate::model::{ResourceKind, ResourceStatus};
use crate::store::{Database, RecordStore};
use crate::sync::SqlProtocolTables;
use crate::traits::{AgentTransport, ProtocolTables};

/// Dependencies shared by every service
#[derive(Clone)]
pub struct ServiceContext {
    pub config: Arc<PanelConfig>,
    pub store: RecordStore,
    pub agent: AgentClient,
    pub tables: Arc<dyn ProtocolTables>,
}

impl ServiceContext {
    /// Compensation for a failed creation: flip the row to `failed`
    ///
    /// Errors are logged; the original cause is what the caller sees.
    pub(crate) async fn mark_failed(&self, kind: ResourceKind, id: i64, cause: &str) {
        warn!(kind = %kind, id = id, cause = cause, "Compensating failed operation");
        if let Err(e) = self.store.set_status(kind, id, ResourceStatus::Failed).await {
            warn!(kind = %kind, id = id, error = %e, "Could not mark resource as failed");
        }
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("store", &self.store)
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

/// Load a record for a service call; `None` becomes [`ServiceError::NotFound`]
pub(crate) async fn find<T, F>(what: String, query: F) -> std::result::Result<T, ServiceError>
where
    F: Future<Output = Result<Option<T>>>,
{
    boundary::execute(format!("Failed to load {what}"), query)
        .await?
        .ok_or(ServiceError::NotFound(what))
}

/// Run a read-only query under the failure boundary
pub(crate) async fn query<T, F>(context: String, query: F) -> std::result::Result<T, ServiceError>
where
    F: Future<Output = Result<T>>,
{
    Ok(boundary::execute(context, query).await?)
}

/// All resource services over one shared context
#[derive(Clone, Debug)]
pub struct ControlPlane {
    pub dns: DnsService,
    pub mail: MailService,
    pub ftp: FtpService,
    pub web: WebDomainService,
    pub firewall: FirewallService,
    pub databases: DatabaseService,
    pub backups: BackupService,
    pub cron: CronService,
    pub ssl: SslService,
    pub files: FileService,
    pub system: SystemService,
    ctx: ServiceContext,
}

impl ControlPlane {
    /// Build the services over explicit dependencies
    pub fn new(
        config: PanelConfig,
        store: RecordStore,
        agent: AgentClient,
        tables: Arc<dyn ProtocolTables>,
    ) -> Self {
        let ctx = ServiceContext {
            config: Arc::new(config),
            store,
            agent,
            tables,
        };
        let dns = DnsService::new(ctx.clone());

        Self {
            mail: MailService::new(ctx.clone()),
            ftp: FtpService::new(ctx.clone()),
            web: WebDomainService::new(ctx.clone(), dns.clone()),
            firewall: FirewallService::new(ctx.clone()),
            databases: DatabaseService::new(ctx.clone()),
            backups: BackupService::new(ctx.clone()),
            cron: CronService::new(ctx.clone()),
            ssl: SslService::new(ctx.clone()),
            files: FileService::new(ctx.clone()),
            system: SystemService::new(ctx.clone()),
            dns,
            ctx,
        }
    }

    /// Open the configured databases and build the services
    pub async fn open(config: PanelConfig, transport: Arc<dyn AgentTransport>) -> Result<Self> {
        config.validate()?;

        let db = Database::open(&config.storage.database_path)?;
        let protocol_db = match &config.storage.protocol_database_path {
            Some(path) => Database::open(path)?,
            None => db.clone(),
        };

        let store = RecordStore::new(db).await?;
        let tables = SqlProtocolTables::new(protocol_db, &config.ftp).await?;

        info!(
            database = %config.storage.database_path.display(),
            agent_socket = %config.agent.socket_path.display(),
            "Control plane opened"
        );

        Ok(Self::new(
            config,
            store,
            AgentClient::new(transport),
            Arc::new(tables),
        ))
    }

    /// The shared context
    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }
}
