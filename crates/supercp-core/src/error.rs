//! Error types for the SuperCP control plane
//!
//! Failures are split by where they can happen:
//!
//! - [`TransportError`]: the channel to the system agent
//! - [`ValidationError`]: bad input, raised before any side effect
//! - [`SyncError`]: writes into protocol-daemon tables
//! - [`Error`]: the cause of a failure inside a wrapped service flow
//! - [`OperationError`]: what the failure boundary turns any [`Error`] into
//! - [`ServiceError`]: what public service methods return

use thiserror::Error;

/// Result type alias for work done inside a wrapped service flow
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// JSON-RPC code the agent uses for an unknown method
pub const AGENT_METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC code the agent uses for handler failures
pub const AGENT_HANDLER_ERROR: i64 = -32000;

/// Channel-level errors talking to the system agent
#[derive(Error, Debug)]
pub enum TransportError {
    /// The agent is not listening, the socket is missing, or the connect
    /// attempt was refused or timed out
    #[error("system agent unavailable at {endpoint}: {reason}")]
    Unavailable {
        /// Socket path that was dialled
        endpoint: String,
        /// Why the connection could not be opened
        reason: String,
    },

    /// Write or read failure on an open connection
    #[error("I/O error talking to system agent: {0}")]
    Io(#[from] std::io::Error),

    /// The response line was not a JSON object
    #[error("malformed response from system agent: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Create an unavailable error
    pub fn unavailable(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether this error means the agent is simply not running
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Protocol-table write failure
#[derive(Error, Debug)]
pub enum SyncError {
    /// The underlying table store rejected the write
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The resource cannot be projected (e.g. an address without a domain part)
    #[error("invalid resource: {0}")]
    InvalidResource(String),
}

impl SyncError {
    /// Create an invalid-resource error
    pub fn invalid_resource(msg: impl Into<String>) -> Self {
        Self::InvalidResource(msg.into())
    }
}

/// Input rejected before any side effect took place
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Name of the offending input field
    pub field: &'static str,
    /// Human-readable reason
    pub message: String,
}

impl ValidationError {
    /// Create a validation error for a field
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Core error type: the cause of a failed step inside a wrapped flow
#[derive(Error, Debug)]
pub enum Error {
    /// The transport could not complete the round trip
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The agent answered with an error envelope
    #[error("system agent error {code}: {message}")]
    Agent {
        /// JSON-RPC error code
        code: i64,
        /// Error message reported by the agent
        message: String,
    },

    /// A protocol-table write failed
    #[error("protocol table sync failed: {0}")]
    Sync(#[from] SyncError),

    /// The authoritative record store failed
    #[error("record store error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Password hashing failed
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid data discovered while the flow was running
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an agent error from an error envelope
    pub fn agent(code: i64, message: impl Into<String>) -> Self {
        Self::Agent {
            code,
            message: message.into(),
        }
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the root cause is the agent not running
    pub fn is_agent_unavailable(&self) -> bool {
        matches!(self, Self::Transport(t) if t.is_unavailable())
    }
}

/// Uniform failure of a wrapped service flow
///
/// Carries the human-readable context naming the resource and the stage
/// ("Failed to create DNS zone: example.com") plus the underlying cause.
#[derive(Error, Debug)]
pub struct OperationError {
    context: String,
    #[source]
    cause: Error,
}

impl OperationError {
    /// Wrap a cause with its context message
    pub fn new(context: impl Into<String>, cause: Error) -> Self {
        Self {
            context: context.into(),
            cause,
        }
    }

    /// The context message ("Failed to ...: <resource>")
    pub fn context(&self) -> &str {
        &self.context
    }

    /// The underlying cause
    pub fn cause(&self) -> &Error {
        &self.cause
    }

    /// Whether the flow failed because the agent is not running
    pub fn is_agent_unavailable(&self) -> bool {
        self.cause.is_agent_unavailable()
    }

    /// JSON-RPC code if the agent answered with an error envelope
    pub fn agent_error_code(&self) -> Option<i64> {
        match &self.cause {
            Error::Agent { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Operator-facing hint on how to recover
    pub fn recovery_suggestion(&self) -> &'static str {
        match &self.cause {
            Error::Transport(TransportError::Unavailable { .. }) => {
                "The system agent is not running. Try restarting it with: sudo systemctl restart super-daemon"
            }
            Error::Agent { code, .. } if *code == AGENT_METHOD_NOT_FOUND => {
                "The requested method is not implemented by the system agent. Check that the agent is up to date."
            }
            Error::Agent { message, .. } => suggestion_from_message(message),
            Error::Sync(_) => {
                "A protocol-daemon table could not be updated. The next reconciliation pass will retry it."
            }
            _ => "Please check the system logs for more information or contact support.",
        }
    }
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cause.is_agent_unavailable() {
            write!(
                f,
                "{}: the system agent is not running ({})",
                self.context, self.cause
            )
        } else {
            write!(f, "{}: {}", self.context, self.cause)
        }
    }
}

fn suggestion_from_message(message: &str) -> &'static str {
    if message.contains("Permission denied") || message.contains("sudo access") {
        return "The system agent lacks the privileges it needs. Ensure it runs with correct permissions and sudo access.";
    }
    if message.contains("Nginx config") || message.contains("Nginx enabled") {
        return "The Nginx configuration could not be written. Check the Nginx logs for details.";
    }
    if message.contains("PHP-FPM") || message.contains("PHP pool") {
        return "The PHP-FPM pool could not be configured. Ensure the requested PHP version is installed.";
    }
    if message.contains("MySQL") || message.contains("database") || message.contains("mysqldump") {
        return "There was a database error. Ensure MySQL is running and the credentials are correct.";
    }
    if message.contains("certbot") || message.contains("SSL") {
        return "The certificate request failed. Ensure the domain points to this server and port 80 is open.";
    }
    if message.contains("User") && message.contains("does not exist") {
        return "The system user for this resource does not exist on the server.";
    }
    if message.contains("Backup file not found") {
        return "The backup file could not be located on the server.";
    }
    "Please check the system logs for more information or contact support."
}

/// Error returned by public resource-service methods
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Input rejected before any side effect
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The target resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A wrapped flow failed after side effects may have started
    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl ServiceError {
    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// The operation error, if this is one
    pub fn as_operation(&self) -> Option<&OperationError> {
        match self {
            Self::Operation(op) => Some(op),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_alias_defaults_to_the_store_error() {
        fn load() -> Result<u8> {
            Err(Error::not_found("zone #1"))
        }
        fn check(value: u8) -> Result<u8, ValidationError> {
            if value > 0 {
                Ok(value)
            } else {
                Err(ValidationError::new("ttl", "must be positive"))
            }
        }

        assert!(matches!(load(), Err(Error::NotFound(_))));
        assert_eq!(check(3), Ok(3));
        assert_eq!(check(0).unwrap_err().field, "ttl");
    }

    #[test]
    fn unavailable_cause_gets_a_distinct_message() {
        let op = OperationError::new(
            "Failed to create email account: a@example.com",
            Error::from(TransportError::unavailable("/run/agent.sock", "No such file")),
        );

        assert!(op.is_agent_unavailable());
        let msg = op.to_string();
        assert!(msg.starts_with("Failed to create email account: a@example.com"));
        assert!(msg.contains("system agent is not running"));
    }

    #[test]
    fn agent_error_code_drives_suggestion() {
        let op = OperationError::new(
            "Failed to create domain: example.com",
            Error::agent(AGENT_METHOD_NOT_FOUND, "Method not found"),
        );
        assert_eq!(op.agent_error_code(), Some(AGENT_METHOD_NOT_FOUND));
        assert!(op.recovery_suggestion().contains("not implemented"));

        let op = OperationError::new(
            "Failed to request certificate",
            Error::agent(AGENT_HANDLER_ERROR, "certbot exited with status 1"),
        );
        assert!(op.recovery_suggestion().contains("port 80"));
    }
}
