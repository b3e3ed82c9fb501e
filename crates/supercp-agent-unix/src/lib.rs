// # Unix Socket Agent Transport
//
// This crate provides the transport between the SuperCP control plane and
// the privileged system agent: newline-delimited JSON-RPC 2.0 over a Unix
// domain socket.
//
// ## Wire Format
//
// Request (one line, then the connection is read once and dropped):
//
// ```text
// {"jsonrpc":"2.0","method":"update_dns_zone","params":{...},"id":"<uuid v4>"}\n
// ```
//
// Response (one line): `{"result": ...}` or `{"error":{"code":..,"message":..}}`.
// The envelope is interpreted by `supercp_core::agent::AgentClient`; this
// crate only checks that the line is a JSON object.
//
// ## Behaviour
//
// - ✅ One connection per call, closed on every exit path
// - ✅ Bounded connect stage (default 5 seconds)
// - ✅ Fresh UUID v4 request id per call
// - ❌ NO retry logic (failures are surfaced to the failure boundary)
// - ❌ NO connection pooling
// - ❌ NO read timeout (a hung agent blocks only the calling task)
//
// ## Trust Level: Untrusted
//
// **Allowed Capabilities**:
// - ✅ Connect to the configured socket path only
// - ✅ Frame one request and decode one response
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads
// - ❌ Keep state between calls
// - ❌ Interpret result payloads

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use supercp_core::config::AgentConfig;
use supercp_core::error::TransportError;
use supercp_core::traits::{AgentTransport, Params};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use uuid::Uuid;

/// Default bound on the connect stage
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// JSON-RPC transport over a Unix domain socket
///
/// Holds only the endpoint and the connect timeout; cloning is cheap and
/// clones are fully independent.
#[derive(Debug, Clone)]
pub struct UnixSocketTransport {
    socket_path: PathBuf,
    connect_timeout: Duration,
}

impl UnixSocketTransport {
    /// Create a transport for `socket_path` with the default connect timeout
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Create a transport from the agent section of the panel config
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(&config.socket_path).with_connect_timeout(config.connect_timeout())
    }

    /// Override the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    fn endpoint(&self) -> String {
        self.socket_path.display().to_string()
    }

    async fn connect(&self) -> Result<UnixStream, TransportError> {
        match tokio::time::timeout(self.connect_timeout, UnixStream::connect(&self.socket_path)).await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(TransportError::unavailable(self.endpoint(), e.to_string())),
            Err(_) => Err(TransportError::unavailable(
                self.endpoint(),
                format!("connect timed out after {:?}", self.connect_timeout),
            )),
        }
    }
}

/// Serialize one request line, newline included
fn encode_request(method: &str, params: Params, id: &str) -> Result<String, TransportError> {
    let envelope = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": Value::Object(params),
        "id": id,
    });
    let mut line = serde_json::to_string(&envelope)
        .map_err(|e| TransportError::protocol(format!("cannot encode request: {e}")))?;
    line.push('\n');
    Ok(line)
}

/// Decode one response line; anything but a JSON object is a protocol error
fn decode_response(line: &str) -> Result<Value, TransportError> {
    let value: Value = serde_json::from_str(line.trim_end())
        .map_err(|e| TransportError::protocol(format!("response is not JSON: {e}")))?;
    if !value.is_object() {
        return Err(TransportError::protocol(format!(
            "response is not a JSON object: {value}"
        )));
    }
    Ok(value)
}

#[async_trait]
impl AgentTransport for UnixSocketTransport {
    async fn call(&self, method: &str, params: Params) -> Result<Value, TransportError> {
        let id = Uuid::new_v4().to_string();
        let request = encode_request(method, params, &id)?;

        let mut stream = self.connect().await?;
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "system agent closed the connection without a response",
            )));
        }

        tracing::debug!(method = method, id = %id, bytes = read, "System agent replied");
        decode_response(&line)
    }

    fn transport_name(&self) -> &'static str {
        "unix-socket"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    /// Accept one connection, hand the request line to `reply`, write its
    /// answer verbatim and close
    fn fake_agent<F>(dir: &TempDir, reply: F) -> (PathBuf, tokio::task::JoinHandle<Value>)
    where
        F: FnOnce(&Value) -> String + Send + 'static,
    {
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            write_half.write_all(reply(&request).as_bytes()).await.unwrap();
            request
        });
        (path, handle)
    }

    #[tokio::test]
    async fn sends_one_envelope_and_returns_the_reply() {
        let dir = TempDir::new().unwrap();
        let (path, agent) = fake_agent(&dir, |req| {
            format!("{}\n", json!({"jsonrpc": "2.0", "result": "pong", "id": req["id"]}))
        });

        let transport = UnixSocketTransport::new(&path);
        let mut params = Map::new();
        params.insert("domain".into(), json!("example.com"));
        let reply = transport.call("delete_dns_zone", params).await.unwrap();

        assert_eq!(reply["result"], "pong");
        let request = agent.await.unwrap();
        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["method"], "delete_dns_zone");
        assert_eq!(request["params"]["domain"], "example.com");
        let id = request["id"].as_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
        assert_eq!(reply["id"], id);
    }

    #[tokio::test]
    async fn missing_socket_is_unavailable_within_the_timeout() {
        let dir = TempDir::new().unwrap();
        let transport = UnixSocketTransport::new(dir.path().join("absent.sock"))
            .with_connect_timeout(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = transport.call("ping", Map::new()).await.unwrap_err();

        assert!(err.is_unavailable(), "unexpected error: {err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn non_json_reply_is_a_protocol_error() {
        let dir = TempDir::new().unwrap();
        let (path, _agent) = fake_agent(&dir, |_| "not json at all\n".to_string());

        let err = UnixSocketTransport::new(&path)
            .call("ping", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn close_without_reply_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let (path, _agent) = fake_agent(&dir, |_| String::new());

        let err = UnixSocketTransport::new(&path)
            .call("ping", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Io(_)), "unexpected error: {err:?}");
    }

    #[test]
    fn decode_rejects_non_objects() {
        assert!(decode_response("{\"result\": null}\n").is_ok());
        assert!(matches!(decode_response("[1, 2]"), Err(TransportError::Protocol(_))));
        assert!(matches!(decode_response("\"pong\""), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn request_line_is_newline_terminated() {
        let line = encode_request("ping", Map::new(), "abc").unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["params"], json!({}));
    }

    #[test]
    fn from_config_uses_configured_timeout() {
        let config = AgentConfig {
            socket_path: PathBuf::from("/run/test.sock"),
            connect_timeout_secs: 9,
        };
        let transport = UnixSocketTransport::from_config(&config);
        assert_eq!(transport.socket_path(), Path::new("/run/test.sock"));
        assert_eq!(transport.connect_timeout(), Duration::from_secs(9));
    }
}
