// # Agent Transport Trait
//
// Defines the channel between the control plane and the privileged system
// agent. One call is one request and one response.
//
// ## Implementations
//
// - Unix domain socket: `supercp-agent-unix` crate
// - Tests: scripted in-memory transports
//
// ## Usage
//
// ```rust,ignore
// use supercp_core::AgentTransport;
// use serde_json::{json, Map};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let transport = /* AgentTransport implementation */;
//
//     let mut params = Map::new();
//     params.insert("domain".into(), json!("example.com"));
//     let reply = transport.call("delete_dns_zone", params).await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::TransportError;

/// Parameters object sent with a call
pub type Params = Map<String, Value>;

/// Trait for system agent transports
///
/// # Contract
///
/// - Each call opens its own connection, writes exactly one request, reads
///   exactly one response and closes the connection on every exit path.
/// - The returned [`Value`] is the decoded response object, unchecked. The
///   caller ([`AgentClient`](crate::agent::AgentClient)) interprets the
///   `result`/`error` envelope.
/// - Transports hold no mutable state between calls, so concurrent callers
///   never share a connection.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Open a connection to the configured endpoint only
/// - ✅ Bound the connect stage with a timeout
/// - ✅ Frame and decode one request/response pair
///
/// ## Forbidden Capabilities
/// - ❌ Retry, back off or queue calls (failure handling is owned by the
///   [`boundary`](crate::boundary) and reconciliation)
/// - ❌ Pool or cache connections
/// - ❌ Interpret result payloads
/// - ❌ Touch the record store or protocol tables
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Perform one round trip
    ///
    /// # Errors
    ///
    /// - [`TransportError::Unavailable`]: the endpoint is missing, refused the
    ///   connection, or did not accept it within the connect timeout
    /// - [`TransportError::Io`]: write/read failure or EOF before a full line
    /// - [`TransportError::Protocol`]: the response line is not a JSON object
    async fn call(&self, method: &str, params: Params) -> Result<Value, TransportError>;

    /// Short name for logs
    fn transport_name(&self) -> &'static str;
}
