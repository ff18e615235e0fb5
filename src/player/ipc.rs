//! JSON IPC with a running mpv.
//!
//! Every command opens its own connection, writes one `{"command": [...]}` line,
//! and reads a single reply. There is no long-lived connection to go stale, so
//! a player that restarts its socket between calls is handled by the retry loop.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, timeout};
use tracing::{debug, trace};

const READ_BUFFER: usize = 4096;
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Reply text mpv uses when a property exists but has no value right now.
const PROPERTY_UNAVAILABLE: &str = "property unavailable";

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write command: {0}")]
    Write(#[source] io::Error),
    #[error("failed to read reply: {0}")]
    Read(#[source] io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("player closed the connection without replying")]
    Closed,
    #[error("could not decode reply: {0}")]
    Decode(String),
}

impl ChannelError {
    /// The socket isn't there yet or nobody is listening on it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChannelError::Connect { source, .. }
                if matches!(source.kind(), io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound)
        )
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command failed after {attempts} attempts: {last}")]
    Failed {
        attempts: u32,
        #[source]
        last: ChannelError,
    },
    #[error("property unavailable")]
    PropertyUnavailable,
    #[error("player rejected command: {0}")]
    Rejected(String),
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CommandError {
    fn is_transient(&self) -> bool {
        matches!(self, CommandError::Failed { last, .. } if last.is_transient())
    }
}

/// Fixed number of tries with a fixed pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const COMMAND: RetryPolicy = RetryPolicy {
        attempts: 3,
        delay: Duration::from_millis(100),
    };
    pub const PROBE: RetryPolicy = RetryPolicy {
        attempts: 3,
        delay: Duration::from_millis(200),
    };
}

/// Where a player listens for commands. Unique per launch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelAddress(PathBuf);

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(0);

impl ChannelAddress {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// A fresh address for this process; no two calls return the same one.
    pub fn unique() -> Self {
        let n = NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed);
        let name = format!("anistream-mpv-{}-{}", std::process::id(), n);
        if cfg!(windows) {
            Self(PathBuf::from(format!(r"\\.\pipe\{name}")))
        } else {
            Self(std::env::temp_dir().join(format!("{name}.sock")))
        }
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Opens one connection to a channel address.
pub trait Connector: Clone + Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn connect(
        &self,
        address: &ChannelAddress,
    ) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Unix socket or Windows named pipe, depending on the platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpcConnector;

#[cfg(unix)]
impl Connector for IpcConnector {
    type Stream = tokio::net::UnixStream;

    async fn connect(&self, address: &ChannelAddress) -> io::Result<Self::Stream> {
        tokio::net::UnixStream::connect(address.path()).await
    }
}

#[cfg(windows)]
impl Connector for IpcConnector {
    type Stream = tokio::net::windows::named_pipe::NamedPipeClient;

    async fn connect(&self, address: &ChannelAddress) -> io::Result<Self::Stream> {
        tokio::net::windows::named_pipe::ClientOptions::new().open(address.path())
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    data: Option<Value>,
    error: Option<String>,
    event: Option<String>,
}

/// Picks the command reply out of one read, skipping any event lines mpv
/// pushed onto the fresh connection first.
fn parse_reply(buf: &[u8]) -> Result<Reply, ChannelError> {
    let text = std::str::from_utf8(buf).map_err(|e| ChannelError::Decode(e.to_string()))?;
    let mut last_error = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<Reply>(line) {
            Ok(reply) if reply.event.is_some() => {
                trace!(event = ?reply.event, "skipping event");
            }
            Ok(reply) => return Ok(reply),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    Err(ChannelError::Decode(
        last_error.unwrap_or_else(|| "reply contained no command result".to_string()),
    ))
}

/// Sends commands to one player over short-lived connections.
#[derive(Debug, Clone)]
pub struct ChannelClient<C: Connector> {
    connector: C,
    address: ChannelAddress,
    policy: RetryPolicy,
    probe_policy: RetryPolicy,
    read_timeout: Duration,
}

impl<C: Connector> ChannelClient<C> {
    pub fn new(connector: C, address: ChannelAddress) -> Self {
        Self {
            connector,
            address,
            policy: RetryPolicy::COMMAND,
            probe_policy: RetryPolicy::PROBE,
            read_timeout: READ_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy, probe_policy: RetryPolicy) -> Self {
        self.policy = policy;
        self.probe_policy = probe_policy;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }

    /// Opens a connection and drops it straight away.
    pub async fn probe(&self) -> Result<(), ChannelError> {
        self.connector
            .connect(&self.address)
            .await
            .map(drop)
            .map_err(|source| ChannelError::Connect {
                address: self.address.to_string(),
                source,
            })
    }

    async fn round_trip(&self, request: &[u8]) -> Result<Reply, ChannelError> {
        let mut stream = self
            .connector
            .connect(&self.address)
            .await
            .map_err(|source| ChannelError::Connect {
                address: self.address.to_string(),
                source,
            })?;

        stream.write_all(request).await.map_err(ChannelError::Write)?;
        stream.flush().await.map_err(ChannelError::Write)?;

        let mut buf = vec![0u8; READ_BUFFER];
        let n = timeout(self.read_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| ChannelError::Timeout(self.read_timeout))?
            .map_err(ChannelError::Read)?;
        if n == 0 {
            return Err(ChannelError::Closed);
        }

        parse_reply(&buf[..n])
    }

    /// Sends `command` and returns its `data` field, `Null` when absent.
    ///
    /// Transport failures are retried per the command policy; the last one is
    /// returned once the attempts run out. A reply carrying an error is final.
    pub async fn send_command(&self, command: &[Value]) -> Result<Value, CommandError> {
        let mut request = serde_json::to_vec(&json!({ "command": command }))?;
        request.push(b'\n');

        let mut last = None;
        for attempt in 0..self.policy.attempts {
            if attempt > 0 {
                sleep(self.policy.delay).await;
            }

            match self.round_trip(&request).await {
                Ok(reply) => {
                    return match reply.error.as_deref() {
                        None | Some("success") => Ok(reply.data.unwrap_or(Value::Null)),
                        Some(PROPERTY_UNAVAILABLE) => Err(CommandError::PropertyUnavailable),
                        Some(other) => Err(CommandError::Rejected(other.to_string())),
                    };
                }
                Err(e) => {
                    debug!(attempt = attempt + 1, error = %e, "player command failed");
                    last = Some(e);
                }
            }
        }

        Err(CommandError::Failed {
            attempts: self.policy.attempts,
            last: last.unwrap_or(ChannelError::Closed),
        })
    }

    pub async fn get_property(&self, name: &str) -> Result<Value, CommandError> {
        self.send_command(&[json!("get_property"), json!(name)])
            .await
    }

    /// `None` when the property is unavailable or not a number.
    pub async fn known_number(&self, name: &str) -> Result<Option<f64>, CommandError> {
        match self.get_property(name).await {
            Ok(value) => Ok(value.as_f64()),
            Err(CommandError::PropertyUnavailable) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn number_property(&self, name: &str) -> Result<f64, CommandError> {
        Ok(self.known_number(name).await?.unwrap_or(0.0))
    }

    pub async fn seek(&self, seconds: f64) -> Result<(), CommandError> {
        self.send_command(&[json!("seek"), json!(seconds), json!("absolute")])
            .await
            .map(drop)
    }

    /// `false` also means "unknown".
    pub async fn paused(&self) -> Result<bool, CommandError> {
        match self.get_property("pause").await {
            Ok(value) => Ok(value.as_bool().unwrap_or(false)),
            Err(CommandError::PropertyUnavailable) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Playback speed; 0.0 when unknown.
    pub async fn speed(&self) -> Result<f64, CommandError> {
        self.number_property("speed").await
    }

    /// Seconds into the file; 0.0 when unknown.
    pub async fn time_pos(&self) -> Result<f64, CommandError> {
        self.number_property("time-pos").await
    }

    /// Seconds; 0.0 when unknown.
    pub async fn duration(&self) -> Result<f64, CommandError> {
        self.number_property("duration").await
    }

    /// 0 when unknown.
    pub async fn pid(&self) -> Result<u64, CommandError> {
        match self.get_property("pid").await {
            Ok(value) => Ok(value.as_u64().unwrap_or(0)),
            Err(CommandError::PropertyUnavailable) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Whether a file is actually playing.
    ///
    /// An unavailable `time-pos` is a definite "no". A socket that isn't up
    /// yet is retried per the probe policy. Anything else is returned.
    pub async fn has_active_playback(&self) -> Result<bool, CommandError> {
        let mut last = None;
        for attempt in 0..self.probe_policy.attempts {
            if attempt > 0 {
                sleep(self.probe_policy.delay).await;
            }

            match self.get_property("time-pos").await {
                Ok(Value::Null) => return Ok(false),
                Ok(_) => return Ok(true),
                Err(CommandError::PropertyUnavailable) => return Ok(false),
                Err(e) if e.is_transient() => last = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last.unwrap_or(CommandError::Failed {
            attempts: 0,
            last: ChannelError::Closed,
        }))
    }

    /// Liveness probe: the player answered a `pid` query.
    pub async fn is_running(&self) -> bool {
        for attempt in 0..self.probe_policy.attempts {
            if attempt > 0 {
                sleep(self.probe_policy.delay).await;
            }

            match self.get_property("pid").await {
                Ok(_) | Err(CommandError::PropertyUnavailable) | Err(CommandError::Rejected(_)) => {
                    return true;
                }
                Err(e) => trace!(error = %e, "liveness probe failed"),
            }
        }
        false
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeConnector, Script, client};
    use super::*;

    #[test]
    fn test_unique_addresses_differ() {
        let a = ChannelAddress::unique();
        let b = ChannelAddress::unique();
        assert_ne!(a, b);
        assert!(a.to_string().contains("anistream-mpv-"));
    }

    #[test]
    fn test_parse_reply_skips_events() {
        let buf = b"{\"event\":\"playback-restart\"}\n{\"data\":12.5,\"error\":\"success\"}\n";
        let reply = parse_reply(buf).unwrap();
        assert_eq!(reply.data, Some(json!(12.5)));
    }

    #[test]
    fn test_parse_reply_rejects_garbage() {
        assert!(matches!(parse_reply(b"not json"), Err(ChannelError::Decode(_))));
        assert!(matches!(
            parse_reply(b"{\"event\":\"idle\"}\n"),
            Err(ChannelError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_request_framing() {
        let connector = FakeConnector::replying(r#"{"data":1200.0,"error":"success"}"#);
        let c = client(connector.clone());

        let value = c.get_property("duration").await.unwrap();
        assert_eq!(value, json!(1200.0));

        let requests = connector.requests.lock().unwrap().clone();
        assert_eq!(requests, vec!["{\"command\":[\"get_property\",\"duration\"]}\n"]);
    }

    #[tokio::test]
    async fn test_missing_data_is_null() {
        let c = client(FakeConnector::replying(r#"{"error":"success"}"#));
        assert_eq!(c.send_command(&[json!("stop")]).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_retries_then_returns_last_error() {
        let connector = FakeConnector::new([
            Script::Refuse(io::ErrorKind::NotFound),
            Script::HangUp,
            Script::Refuse(io::ErrorKind::ConnectionRefused),
        ]);
        let c = client(connector.clone());

        let err = c.get_property("pause").await.unwrap_err();
        assert_eq!(connector.connect_count(), 3);
        match err {
            CommandError::Failed { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(
                    last,
                    ChannelError::Connect { ref source, .. }
                        if source.kind() == io::ErrorKind::ConnectionRefused
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let connector = FakeConnector::new([
            Script::Silent,
            Script::Reply(r#"{"data":true,"error":"success"}"#.to_string()),
        ]);
        let c = client(connector.clone());

        assert!(c.paused().await.unwrap());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_property_unavailable_is_not_retried() {
        let connector = FakeConnector::replying(r#"{"error":"property unavailable"}"#);
        let c = client(connector.clone());

        let err = c.get_property("time-pos").await.unwrap_err();
        assert!(matches!(err, CommandError::PropertyUnavailable));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_typed_getters_return_zero_on_mismatch() {
        let c = client(FakeConnector::replying(r#"{"data":"yes","error":"success"}"#));
        assert!(!c.paused().await.unwrap());
        assert_eq!(c.speed().await.unwrap(), 0.0);
        assert_eq!(c.pid().await.unwrap(), 0);

        let c = client(FakeConnector::replying(r#"{"error":"property unavailable"}"#));
        assert_eq!(c.duration().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_known_number_tells_unknown_from_zero() {
        let c = client(FakeConnector::replying(r#"{"data":0.0,"error":"success"}"#));
        assert_eq!(c.known_number("time-pos").await.unwrap(), Some(0.0));

        let c = client(FakeConnector::replying(r#"{"error":"property unavailable"}"#));
        assert_eq!(c.known_number("time-pos").await.unwrap(), None);

        let c = client(FakeConnector::replying(r#"{"data":null,"error":"success"}"#));
        assert_eq!(c.known_number("duration").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_has_active_playback() {
        let c = client(FakeConnector::replying(r#"{"error":"property unavailable"}"#));
        assert!(!c.has_active_playback().await.unwrap());

        let c = client(FakeConnector::replying(r#"{"data":300.0,"error":"success"}"#));
        assert!(c.has_active_playback().await.unwrap());

        let c = client(FakeConnector::replying(r#"{"data":null,"error":"success"}"#));
        assert!(!c.has_active_playback().await.unwrap());
    }

    #[tokio::test]
    async fn test_has_active_playback_retries_refused_socket() {
        let connector = FakeConnector::refusing();
        let c = client(connector.clone());

        let err = c.has_active_playback().await.unwrap_err();
        assert!(matches!(err, CommandError::Failed { .. }));
        // three probes, each one a full command retry budget
        assert_eq!(connector.connect_count(), 9);
    }

    #[tokio::test]
    async fn test_has_active_playback_surfaces_other_errors() {
        let connector = FakeConnector::new([Script::Reply("garbage".to_string())]);
        let c = client(connector.clone());

        let err = c.has_active_playback().await.unwrap_err();
        assert!(matches!(
            err,
            CommandError::Failed {
                last: ChannelError::Decode(_),
                ..
            }
        ));
        assert_eq!(connector.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_is_running() {
        let c = client(FakeConnector::replying(r#"{"data":4242,"error":"success"}"#));
        assert!(c.is_running().await);

        let c = client(FakeConnector::refusing());
        assert!(!c.is_running().await);
    }

    #[tokio::test]
    async fn test_seek_sends_absolute() {
        let connector = FakeConnector::replying(r#"{"error":"success"}"#);
        let c = client(connector.clone());
        c.seek(95.0).await.unwrap();

        let requests = connector.requests.lock().unwrap().clone();
        assert_eq!(requests, vec!["{\"command\":[\"seek\",95.0,\"absolute\"]}\n"]);
    }
}
