//! Runtime control client (JSON IPC).
//!
//! One request per connection: the client opens a fresh socket, writes a
//! single newline-terminated JSON envelope, reads one response line, and
//! tears the connection down. There is no pooling or pipelining; the
//! [`ControlTransport`] trait is the seam where a pooled implementation
//! could be swapped in without touching callers.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;
use tracing::debug;

const POLL_SLICE: Duration = Duration::from_millis(50);
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Control channel endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEndpoint {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl ControlEndpoint {
    /// Parses `tcp://host:port` or `unix:///path`.
    ///
    /// Unix endpoints are rejected on platforms without Unix domain
    /// sockets rather than silently ignored.
    pub fn parse(text: &str) -> Result<Self, ControlClientError> {
        if let Some(rest) = text.strip_prefix("tcp://") {
            if let Ok(addr) = rest.parse::<SocketAddr>() {
                return Ok(Self::Tcp(addr));
            }
            let addr = rest
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next())
                .ok_or_else(|| {
                    ControlClientError::InvalidEndpoint(SmolStr::new(text))
                })?;
            return Ok(Self::Tcp(addr));
        }
        if let Some(rest) = text.strip_prefix("unix://") {
            #[cfg(unix)]
            {
                if rest.is_empty() {
                    return Err(ControlClientError::InvalidEndpoint(SmolStr::new(text)));
                }
                return Ok(Self::Unix(PathBuf::from(rest)));
            }
            #[cfg(not(unix))]
            {
                let _ = rest;
                return Err(ControlClientError::UnixUnsupported);
            }
        }
        Err(ControlClientError::InvalidEndpoint(SmolStr::new(text)))
    }
}

/// Cooperative cancellation signal shared with in-flight requests and
/// journey waits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Control client errors, one distinct value per failure mode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlClientError {
    /// Endpoint string did not parse.
    #[error("invalid control endpoint '{0}'")]
    InvalidEndpoint(SmolStr),

    /// Unix domain sockets are not available on this platform.
    #[error("unix endpoints are not supported on this platform")]
    UnixUnsupported,

    /// Connection could not be established.
    #[error("control connect failed: {0}")]
    Connect(SmolStr),

    /// Socket failed mid-exchange.
    #[error("control transport failed: {0}")]
    Transport(SmolStr),

    /// No complete response arrived within the request timeout.
    #[error("control request timed out after {0} ms")]
    Timeout(u64),

    /// Response line was not a valid protocol object.
    #[error("malformed control response: {0}")]
    MalformedResponse(SmolStr),

    /// Remote side rejected the request.
    #[error("control request rejected: {message}")]
    Rejected {
        message: SmolStr,
        /// Machine-readable rejection code, when the runtime supplies one.
        code: Option<SmolStr>,
    },

    /// Caller cancelled the request.
    #[error("control request cancelled")]
    Cancelled,
}

#[derive(Debug, Serialize)]
struct ControlRequest<'a> {
    id: u64,
    #[serde(rename = "type")]
    r#type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ControlReply {
    ok: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Request/response seam over the control channel.
pub trait ControlTransport {
    /// Issues one request and waits for its response.
    fn request(
        &self,
        request_type: &str,
        params: Option<serde_json::Value>,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, ControlClientError>;
}

/// Per-call socket client: connect, one envelope, one response, close.
#[derive(Debug)]
pub struct OneShotClient {
    endpoint: ControlEndpoint,
    auth_token: Option<String>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl OneShotClient {
    #[must_use]
    pub fn new(endpoint: ControlEndpoint, auth_token: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint,
            auth_token,
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Parses the endpoint string and builds a client.
    pub fn connect_to(
        endpoint: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ControlClientError> {
        Ok(Self::new(ControlEndpoint::parse(endpoint)?, auth_token, timeout))
    }

    #[must_use]
    pub fn endpoint(&self) -> &ControlEndpoint {
        &self.endpoint
    }
}

impl ControlTransport for OneShotClient {
    fn request(
        &self,
        request_type: &str,
        params: Option<serde_json::Value>,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, ControlClientError> {
        if cancel.is_cancelled() {
            return Err(ControlClientError::Cancelled);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = serde_json::to_string(&ControlRequest {
            id,
            r#type: request_type,
            params: params.as_ref(),
            auth: self.auth_token.as_deref(),
        })
        .map_err(|err| ControlClientError::Transport(SmolStr::new(err.to_string())))?;
        let deadline = Instant::now() + self.timeout;
        debug!(request_type, id, "control request");

        let line = match &self.endpoint {
            ControlEndpoint::Tcp(addr) => {
                let stream = TcpStream::connect_timeout(addr, self.timeout)
                    .map_err(|err| ControlClientError::Connect(SmolStr::new(err.to_string())))?;
                exchange_line(stream, &envelope, deadline, self.timeout, cancel)?
            }
            #[cfg(unix)]
            ControlEndpoint::Unix(path) => {
                let stream = std::os::unix::net::UnixStream::connect(path)
                    .map_err(|err| ControlClientError::Connect(SmolStr::new(err.to_string())))?;
                exchange_line(stream, &envelope, deadline, self.timeout, cancel)?
            }
        };

        parse_reply(&line)
    }
}

/// Socket shape shared by TCP and Unix streams: read/write plus a
/// settable read timeout for the cancellation poll loop.
trait ControlStream: Read + Write {
    fn set_poll_timeout(&self, timeout: Duration) -> std::io::Result<()>;
}

impl ControlStream for TcpStream {
    fn set_poll_timeout(&self, timeout: Duration) -> std::io::Result<()> {
        self.set_read_timeout(Some(timeout))?;
        self.set_write_timeout(Some(timeout))
    }
}

#[cfg(unix)]
impl ControlStream for std::os::unix::net::UnixStream {
    fn set_poll_timeout(&self, timeout: Duration) -> std::io::Result<()> {
        self.set_read_timeout(Some(timeout))?;
        self.set_write_timeout(Some(timeout))
    }
}

/// Writes one request line and reads bytes until the first newline.
///
/// Bytes buffered past the delimiter belong to no one and are discarded
/// with the connection. The read loop wakes every poll slice to honor
/// cancellation and the overall deadline.
fn exchange_line<S: ControlStream>(
    mut stream: S,
    envelope: &str,
    deadline: Instant,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<String, ControlClientError> {
    stream
        .set_poll_timeout(POLL_SLICE)
        .map_err(|err| ControlClientError::Transport(SmolStr::new(err.to_string())))?;
    stream
        .write_all(envelope.as_bytes())
        .and_then(|()| stream.write_all(b"\n"))
        .and_then(|()| stream.flush())
        .map_err(|err| ControlClientError::Transport(SmolStr::new(err.to_string())))?;

    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if cancel.is_cancelled() {
            return Err(ControlClientError::Cancelled);
        }
        if Instant::now() >= deadline {
            return Err(ControlClientError::Timeout(timeout.as_millis() as u64));
        }
        match stream.read(&mut chunk) {
            Ok(0) => {
                return Err(ControlClientError::MalformedResponse(SmolStr::new(
                    "connection closed before response line",
                )));
            }
            Ok(read) => {
                buffer.extend_from_slice(&chunk[..read]);
                if let Some(pos) = buffer.iter().position(|byte| *byte == b'\n') {
                    let line = String::from_utf8_lossy(&buffer[..pos]).into_owned();
                    return Ok(line);
                }
                if buffer.len() > MAX_RESPONSE_BYTES {
                    return Err(ControlClientError::MalformedResponse(SmolStr::new(
                        "response line exceeds size limit",
                    )));
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(err) => {
                return Err(ControlClientError::Transport(SmolStr::new(err.to_string())));
            }
        }
    }
}

fn parse_reply(line: &str) -> Result<serde_json::Value, ControlClientError> {
    let reply: ControlReply = serde_json::from_str(line.trim_end()).map_err(|err| {
        ControlClientError::MalformedResponse(SmolStr::new(format!("parse failure: {err}")))
    })?;
    if reply.ok {
        Ok(reply.result.unwrap_or(serde_json::Value::Null))
    } else {
        Err(ControlClientError::Rejected {
            message: SmolStr::new(reply.error.unwrap_or_else(|| "unspecified error".to_string())),
            code: reply.code.map(SmolStr::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{BufRead, BufReader, Write as _};
    use std::net::TcpListener;

    #[test]
    fn endpoint_parses_tcp_and_rejects_garbage() {
        let endpoint = ControlEndpoint::parse("tcp://127.0.0.1:9901").expect("tcp endpoint");
        assert_eq!(
            endpoint,
            ControlEndpoint::Tcp("127.0.0.1:9901".parse().unwrap())
        );
        assert!(matches!(
            ControlEndpoint::parse("mqtt://broker:1883"),
            Err(ControlClientError::InvalidEndpoint(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn endpoint_parses_unix_path() {
        let endpoint = ControlEndpoint::parse("unix:///tmp/wb.sock").expect("unix endpoint");
        assert_eq!(endpoint, ControlEndpoint::Unix(PathBuf::from("/tmp/wb.sock")));
    }

    fn spawn_one_line_server(response: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        std::thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                let mut reader = BufReader::new(stream.try_clone().expect("clone"));
                let mut line = String::new();
                let _ = reader.read_line(&mut line);
                let mut writer = stream;
                let _ = writeln!(writer, "{response}");
            }
        });
        addr
    }

    #[test]
    fn request_round_trips_ok_result() {
        let addr = spawn_one_line_server(r#"{"id":1,"ok":true,"result":{"state":"running"}}"#);
        let client = OneShotClient::new(
            ControlEndpoint::Tcp(addr),
            Some("token".to_string()),
            Duration::from_secs(2),
        );
        let result = client
            .request("status", None, &CancelToken::new())
            .expect("status result");
        assert_eq!(result["state"], "running");
    }

    #[test]
    fn request_surfaces_remote_rejection_with_code() {
        let addr = spawn_one_line_server(
            r#"{"id":1,"ok":false,"error":"write not allowed","code":"HMI_WRITE_DENIED"}"#,
        );
        let client = OneShotClient::new(ControlEndpoint::Tcp(addr), None, Duration::from_secs(2));
        let err = client
            .request("hmi.write", None, &CancelToken::new())
            .expect_err("rejection");
        match err {
            ControlClientError::Rejected { message, code } => {
                assert_eq!(message, "write not allowed");
                assert_eq!(code.as_deref(), Some("HMI_WRITE_DENIED"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn request_reports_malformed_response() {
        let addr = spawn_one_line_server("not json at all");
        let client = OneShotClient::new(ControlEndpoint::Tcp(addr), None, Duration::from_secs(2));
        let err = client
            .request("status", None, &CancelToken::new())
            .expect_err("parse failure");
        assert!(matches!(err, ControlClientError::MalformedResponse(_)));
    }

    #[test]
    fn request_times_out_when_server_stays_silent() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        std::thread::spawn(move || {
            // Accept and hold the socket open without answering.
            let _held = listener.accept();
            std::thread::sleep(Duration::from_secs(2));
        });
        let client = OneShotClient::new(
            ControlEndpoint::Tcp(addr),
            None,
            Duration::from_millis(200),
        );
        let err = client
            .request("status", None, &CancelToken::new())
            .expect_err("timeout");
        assert!(matches!(err, ControlClientError::Timeout(_)));
    }

    #[test]
    fn cancelled_token_aborts_before_connect() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let client = OneShotClient::new(
            ControlEndpoint::Tcp("127.0.0.1:1".parse().unwrap()),
            None,
            Duration::from_millis(100),
        );
        assert!(matches!(
            client.request("status", None, &cancel),
            Err(ControlClientError::Cancelled)
        ));
    }
}
