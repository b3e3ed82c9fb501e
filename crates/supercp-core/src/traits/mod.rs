//! Core traits for the control plane
//!
//! - [`AgentTransport`]: round trips to the privileged system agent
//! - [`ProtocolTables`]: mirrors records into protocol-daemon tables

pub mod agent_transport;
pub mod protocol_tables;

pub use agent_transport::{AgentTransport, Params};
pub use protocol_tables::ProtocolTables;
