// # supercp-core
//
// Control-plane synchronization layer of the SuperCP hosting panel.
//
// ## Architecture Overview
//
// One user intent (create a mailbox, add a DNS record, ...) is propagated
// across three stores that must converge:
//
// - **Record store**: the panel's authoritative SQLite tables
// - **System agent**: a privileged out-of-process peer reached through an
//   [`AgentTransport`], one JSON-RPC request per connection
// - **Protocol tables**: PowerDNS, Postfix/Dovecot and Pure-FTPd tables
//   that other daemons read directly, written through [`ProtocolTables`]
//
// Every mutating service method validates first, then runs its side
// effects as one wrapped section of the [`boundary`]: authoritative row,
// agent call, protocol-table fan-out, compensation on failure.
//
// ## Design Principles
//
// 1. **Authoritative first**: agent artifacts and table rows are derived
//    from the record store and can always be regenerated from it
// 2. **Full-set pushes**: DNS changes always send the zone's whole record set
// 3. **No hidden retries**: failures surface as `OperationError`; the
//    [`Reconciler`] converges what was left behind
// 4. **Library-First**: the daemon is a thin shell around this crate

pub mod agent;
pub mod boundary;
pub mod config;
pub mod error;
pub mod model;
pub mod password;
pub mod reconcile;
pub mod services;
pub mod store;
pub mod sync;
pub mod traits;
pub mod validation;

// Re-export core types for convenience
pub use agent::{AgentClient, AgentCommand};
pub use config::PanelConfig;
pub use error::{Error, OperationError, Result, ServiceError, TransportError, ValidationError};
pub use reconcile::{ReconcileEvent, Reconciler};
pub use services::ControlPlane;
pub use store::{Database, RecordStore};
pub use sync::SqlProtocolTables;
pub use traits::{AgentTransport, ProtocolTables};
