// # supercpd - SuperCP Reconciliation Daemon
//
// ⚠️ ARCHITECTURAL CONSTRAINTS ⚠️
//
// - This is a THIN integration layer ONLY
// - DO NOT add resource logic, table logic, or retry logic here
// - All control-plane logic MUST be in supercp-core
// - Configuration is via environment variables ONLY
//
// The supercpd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Opening the control plane over the Unix-socket agent transport
// 4. Running scheduled reconciliation until SIGTERM/SIGINT
//
// ## Configuration
//
// ### System Agent
// - `SUPERCP_AGENT_SOCKET`: Agent socket path (default /run/supercp/super-daemon.sock)
// - `SUPERCP_AGENT_CONNECT_TIMEOUT_SECS`: Connect timeout (1-60, default 5)
//
// ### Storage
// - `SUPERCP_DATABASE_PATH`: Authoritative record store (SQLite)
// - `SUPERCP_PROTOCOL_DATABASE_PATH`: Protocol-daemon tables (defaults to the record store)
//
// ### DNS
// - `SUPERCP_DNS_DEFAULT_IP`: Address seeded for `@` and `www`
// - `SUPERCP_DNS_NAMESERVERS`: Comma-separated nameservers seeded as NS records
//
// ### Reconciliation
// - `SUPERCP_RECONCILE_INTERVAL_SECS`: Seconds between passes (default 3600)
// - `SUPERCP_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export SUPERCP_AGENT_SOCKET=/run/supercp/super-daemon.sock
// export SUPERCP_DATABASE_PATH=/var/lib/supercp/supercp.db
// export SUPERCP_PROTOCOL_DATABASE_PATH=/var/lib/supercp/protocol.db
// export SUPERCP_RECONCILE_INTERVAL_SECS=900
//
// supercpd
// ```

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use supercp_agent_unix::UnixSocketTransport;
use supercp_core::{ControlPlane, PanelConfig, ReconcileEvent, Reconciler};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum SupercpExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<SupercpExitCode> for ExitCode {
    fn from(code: SupercpExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon settings read from the environment
struct Settings {
    panel: PanelConfig,
    log_level: String,
}

impl Settings {
    /// Load settings from environment variables over the panel defaults
    fn from_env() -> Result<Self> {
        let mut panel = PanelConfig::default();

        if let Ok(path) = env::var("SUPERCP_AGENT_SOCKET") {
            panel.agent.socket_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_var("SUPERCP_AGENT_CONNECT_TIMEOUT_SECS")? {
            panel.agent.connect_timeout_secs = secs;
        }
        if let Ok(path) = env::var("SUPERCP_DATABASE_PATH") {
            panel.storage.database_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("SUPERCP_PROTOCOL_DATABASE_PATH") {
            panel.storage.protocol_database_path = Some(PathBuf::from(path));
        }
        if let Ok(ip) = env::var("SUPERCP_DNS_DEFAULT_IP") {
            panel.dns.default_ip = ip;
        }
        if let Ok(list) = env::var("SUPERCP_DNS_NAMESERVERS") {
            panel.dns.nameservers = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(secs) = parse_var("SUPERCP_RECONCILE_INTERVAL_SECS")? {
            panel.reconcile.interval_secs = secs;
        }

        Ok(Self {
            panel,
            log_level: env::var("SUPERCP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    fn validate(&self) -> Result<()> {
        self.panel
            .validate()
            .context("Invalid control-plane configuration")?;

        if let Some(parent) = self.panel.storage.database_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "SUPERCP_DATABASE_PATH parent directory does not exist: {}. \
                Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        if !(10..=86_400).contains(&self.panel.reconcile.interval_secs) {
            anyhow::bail!(
                "SUPERCP_RECONCILE_INTERVAL_SECS must be between 10 and 86400 seconds. Got: {}",
                self.panel.reconcile.interval_secs
            );
        }

        parse_level(&self.log_level)?;
        Ok(())
    }
}

/// Parse an optional numeric variable; a malformed value is an error
fn parse_var(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} must be a whole number. Got: {raw}")),
        Err(_) => Ok(None),
    }
}

fn parse_level(level: &str) -> Result<Level> {
    Ok(match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => anyhow::bail!(
            "SUPERCP_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            other
        ),
    })
}

fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return SupercpExitCode::ConfigError.into();
        }
    };

    if let Err(e) = settings.validate() {
        eprintln!("Configuration validation error: {e:#}");
        return SupercpExitCode::ConfigError.into();
    }

    let log_level = parse_level(&settings.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return SupercpExitCode::ConfigError.into();
    }

    info!("Starting supercpd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return SupercpExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run_daemon(settings.panel).await {
            Ok(()) => SupercpExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                SupercpExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Open the control plane and reconcile until a shutdown signal
async fn run_daemon(config: PanelConfig) -> Result<()> {
    let transport = UnixSocketTransport::from_config(&config.agent);
    info!(
        socket = %transport.socket_path().display(),
        connect_timeout = ?transport.connect_timeout(),
        "Using system agent transport"
    );

    let plane = ControlPlane::open(config, Arc::new(transport))
        .await
        .context("Failed to open control plane")?;

    if !plane.system.is_agent_running().await {
        warn!("System agent is not reachable; passes will report failures until it is");
    }

    let (reconciler, mut events) = Reconciler::new(plane);

    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    reconciler.run().await.context("Reconciler failed")?;
    drop(reconciler);

    if let Err(e) = event_log.await {
        warn!("Event logger ended abnormally: {}", e);
    }

    info!("Shutting down daemon");
    Ok(())
}

fn log_event(event: &ReconcileEvent) {
    match event {
        ReconcileEvent::Started { interval_secs } => {
            info!(interval_secs = interval_secs, "Reconciliation scheduled");
        }
        ReconcileEvent::PassStarted { pass } => debug!(pass = pass, "Pass started"),
        ReconcileEvent::ResourceSynced { kind, id } => {
            debug!(kind = %kind, id = id, "Resource in sync");
        }
        ReconcileEvent::ResourceFailed { kind, id, error } => {
            warn!(kind = %kind, id = id, error = %error, "Resource out of sync");
        }
        ReconcileEvent::PassCompleted {
            pass,
            synced,
            failed,
        } => {
            if *failed > 0 {
                warn!(pass = pass, synced = synced, failed = failed, "Pass completed with failures");
            } else {
                info!(pass = pass, synced = synced, "Pass completed");
            }
        }
        ReconcileEvent::Stopped { reason } => info!(reason = %reason, "Reconciliation stopped"),
    }
}
