//! Protocol session for the MonetDB line protocol
//!
//! Core abstractions:
//! - Session: command / payload / prompt handshake over one connection
//! - SessionFactory: opens sessions for a controller
//! - MapiSession: the line protocol over any tokio byte stream
//!
//! # Wire format
//!
//! ```text
//! client: s<statement>;\n          statement frame
//! client: <line>\n ...             COPY payload, verbatim
//! client: \n                       empty line, forces processing
//! server: !<message>\n             error
//! server: &... %... [... =... ^... result data
//! server: \x01\x01\n               prompt: ready for the next command
//! server: \x01\x02\n               prompt: more input expected
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::encoder::EncodedLine;
use crate::error::{Error, Result};

/// Leading byte of a statement frame
pub const STATEMENT_MARKER: u8 = b's';

/// Prompt sent when the server is ready for the next command
pub const PROMPT_READY: &[u8] = b"\x01\x01";

/// Prompt sent when the server expects more input
pub const PROMPT_MORE: &[u8] = b"\x01\x02";

/// Prompt round trips needed before a streamed batch is committed
pub const ACK_CYCLES: usize = 3;

/// Default MonetDB port
pub const DEFAULT_PORT: u16 = 50000;

// Upper bound for a single response line; a misbehaving server cannot make
// the client buffer without limit.
const MAX_RESPONSE_LINE: usize = 1024 * 1024;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport attached, session not established
    Disconnected,
    /// Establishing the session
    Connecting,
    /// Ready for a command
    Idle,
    /// Command or flush marker sent, prompt outstanding
    AwaitingPrompt,
    /// Last exchange failed
    Faulted,
    /// Closed; no further I/O
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Idle => write!(f, "idle"),
            Self::AwaitingPrompt => write!(f, "awaiting_prompt"),
            Self::Faulted => write!(f, "faulted"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Classified server response to one prompt wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Prompt without data or errors
    Ok,
    /// Prompt preceded by result lines
    ResultData(Vec<String>),
    /// The server reported an error
    Error(String),
}

impl Response {
    /// Turn an error response into `Error::Protocol`
    pub fn into_result(self) -> Result<Response> {
        match self {
            Self::Error(message) => Err(Error::protocol(message)),
            other => Ok(other),
        }
    }

    /// Whether this response reports an error
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// A command/acknowledgement session with the database engine
#[async_trait]
pub trait Session: Send {
    /// Current lifecycle state
    fn state(&self) -> SessionState;

    /// Send a statement frame
    async fn send_command(&mut self, command: &str) -> Result<()>;

    /// Write payload lines verbatim (after a `COPY ... FROM STDIN`)
    async fn stream_payload(&mut self, lines: &[EncodedLine]) -> Result<()>;

    /// Write an empty line and flush, forcing the server to process input
    async fn flush_marker(&mut self) -> Result<()>;

    /// Block until the next prompt and classify what preceded it
    async fn wait_for_prompt(&mut self) -> Result<Response>;

    /// Close the session; calling it again is a no-op
    async fn close(&mut self) -> Result<()>;

    /// Send a statement and wait for its outcome
    async fn execute(&mut self, command: &str) -> Result<Response> {
        self.send_command(command).await?;
        self.wait_for_prompt().await?.into_result()
    }

    /// Run the post-payload acknowledgement: `ACK_CYCLES` rounds of
    /// empty line + prompt wait. Every round must succeed.
    async fn acknowledge_batch(&mut self) -> Result<()> {
        for cycle in 1..=ACK_CYCLES {
            self.flush_marker().await?;
            let response = self.wait_for_prompt().await?;
            trace!(cycle, ?response, "acknowledgement prompt");
            response.into_result()?;
        }
        Ok(())
    }
}

/// Opens sessions for a load
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open and establish a new session
    async fn open(&self) -> Result<Box<dyn Session>>;
}

/// Connection settings for a MonetDB server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// `host:port` of the server
    pub address: String,
    /// Database name (informational)
    #[serde(default)]
    pub database: Option<String>,
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Bound on every prompt wait in milliseconds (none = wait forever)
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    /// Wait for an initial prompt after connecting
    #[serde(default)]
    pub expect_greeting: bool,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: format!("localhost:{}", DEFAULT_PORT),
            database: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: None,
            expect_greeting: false,
        }
    }
}

impl SessionConfig {
    /// Configuration for a `host:port` address
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Parse `monetdb://host[:port][/database]`
    pub fn from_url(raw: &str) -> Result<Self> {
        let parsed = url::Url::parse(raw.trim_start_matches("jdbc:"))
            .map_err(|e| Error::config(format!("invalid session URL: {}", e)))?;
        if parsed.scheme() != "monetdb" && parsed.scheme() != "mapi" {
            return Err(Error::config(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::config("session URL has no host"))?;
        let port = parsed.port().unwrap_or(DEFAULT_PORT);
        let database = parsed
            .path()
            .trim_start_matches('/')
            .split('/')
            .next()
            .filter(|db| !db.is_empty())
            .map(str::to_string);

        Ok(Self {
            address: format!("{}:{}", host, port),
            database,
            ..Default::default()
        })
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set read timeout
    pub fn with_read_timeout(mut self, ms: u64) -> Self {
        self.read_timeout_ms = Some(ms);
        self
    }

    /// Wait for the server's initial prompt after connecting
    pub fn with_greeting(mut self, expect: bool) -> Self {
        self.expect_greeting = expect;
        self
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

/// Session over a byte stream speaking the MonetDB line protocol
pub struct MapiSession<S> {
    stream: Option<BufStream<S>>,
    state: SessionState,
    read_timeout: Option<Duration>,
    transport_failed: bool,
}

impl<S> MapiSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Attach a session to an already connected stream
    pub fn new(stream: S, read_timeout: Option<Duration>) -> Self {
        Self {
            stream: Some(BufStream::new(stream)),
            state: SessionState::Disconnected,
            read_timeout,
            transport_failed: false,
        }
    }

    /// Establish the session, optionally consuming a greeting prompt
    pub async fn handshake(&mut self, expect_greeting: bool) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(Error::internal(format!(
                "handshake in state {}",
                self.state
            )));
        }
        self.state = SessionState::Connecting;
        if expect_greeting {
            self.state = SessionState::AwaitingPrompt;
            match self.wait_for_prompt().await? {
                Response::Error(message) => {
                    return Err(Error::connection(format!("server refused session: {}", message)))
                }
                _ => debug!("greeting prompt received"),
            }
        }
        self.state = SessionState::Idle;
        Ok(())
    }

    fn writable(&mut self) -> Result<&mut BufStream<S>> {
        if self.transport_failed {
            return Err(Error::connection("session unusable after transport failure"));
        }
        match self.state {
            SessionState::Disconnected | SessionState::Connecting => {
                return Err(Error::internal("session not established"))
            }
            SessionState::Closed => return Err(Error::connection("session closed")),
            _ => {}
        }
        self.stream
            .as_mut()
            .ok_or_else(|| Error::connection("session closed"))
    }

    fn fail_transport(&mut self, err: Error) -> Error {
        self.transport_failed = true;
        self.state = SessionState::Faulted;
        err
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let result = self.writable()?.write_all(bytes).await;
        result.map_err(|e| self.fail_transport(Error::connection_with_source("write failed", e)))
    }

    async fn flush_stream(&mut self) -> Result<()> {
        let result = self.writable()?.flush().await;
        result.map_err(|e| self.fail_transport(Error::connection_with_source("flush failed", e)))
    }

    async fn read_response(&mut self) -> Result<Response> {
        let stream = self.writable()?;
        let mut errors: Vec<String> = Vec::new();
        let mut data: Vec<String> = Vec::new();
        let mut line = Vec::with_capacity(256);

        loop {
            line.clear();
            let n = (&mut *stream)
                .take(MAX_RESPONSE_LINE as u64)
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| Error::connection_with_source("read failed", e))?;
            if n == 0 {
                return Err(Error::connection("server closed the connection before prompt"));
            }
            if line.last() != Some(&b'\n') && n >= MAX_RESPONSE_LINE {
                return Err(Error::connection(format!(
                    "response line exceeds {} bytes",
                    MAX_RESPONSE_LINE
                )));
            }

            let content = trim_line_end(&line);
            if content == PROMPT_READY || content == PROMPT_MORE {
                break;
            }

            let text = String::from_utf8_lossy(content);
            match content.first() {
                Some(b'!') => errors.push(text[1..].to_string()),
                Some(b'&' | b'%' | b'[' | b'=' | b'^') => data.push(text.into_owned()),
                Some(_) => trace!(line = %text, "ignoring informational line"),
                None => {}
            }
        }

        Ok(if !errors.is_empty() {
            Response::Error(errors.join("\n"))
        } else if !data.is_empty() {
            Response::ResultData(data)
        } else {
            Response::Ok
        })
    }
}

impl MapiSession<TcpStream> {
    /// Connect to a server and establish a session
    pub async fn connect(config: &SessionConfig) -> Result<Self> {
        info!(address = %config.address, database = ?config.database, "connecting to MonetDB");
        let stream = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            TcpStream::connect(&config.address),
        )
        .await
        .map_err(|_| {
            Error::timeout(format!(
                "connect to {} after {}ms",
                config.address, config.connect_timeout_ms
            ))
        })?
        .map_err(|e| Error::connection_with_source(format!("connect to {}", config.address), e))?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY");
        }

        let mut session = Self::new(stream, config.read_timeout());
        session.handshake(config.expect_greeting).await?;
        Ok(session)
    }
}

#[async_trait]
impl<S> Session for MapiSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn state(&self) -> SessionState {
        self.state
    }

    async fn send_command(&mut self, command: &str) -> Result<()> {
        match self.state {
            SessionState::Idle | SessionState::Faulted => {}
            other => {
                return Err(Error::internal(format!(
                    "cannot send a command while {}",
                    other
                )))
            }
        }

        let command = command.trim_end();
        let mut frame = Vec::with_capacity(command.len() + 3);
        frame.push(STATEMENT_MARKER);
        frame.extend_from_slice(command.as_bytes());
        if !command.ends_with(';') {
            frame.push(b';');
        }
        frame.push(b'\n');

        trace!(statement = %command, "sending statement");
        self.write_all(&frame).await?;
        self.state = SessionState::AwaitingPrompt;
        Ok(())
    }

    async fn stream_payload(&mut self, lines: &[EncodedLine]) -> Result<()> {
        if self.state != SessionState::AwaitingPrompt {
            return Err(Error::internal(format!(
                "payload without a streaming command (state {})",
                self.state
            )));
        }
        for line in lines {
            self.write_all(line.as_bytes()).await?;
        }
        trace!(lines = lines.len(), "payload written");
        Ok(())
    }

    async fn flush_marker(&mut self) -> Result<()> {
        self.write_all(b"\n").await?;
        self.flush_stream().await?;
        self.state = SessionState::AwaitingPrompt;
        Ok(())
    }

    async fn wait_for_prompt(&mut self) -> Result<Response> {
        if self.state != SessionState::AwaitingPrompt {
            return Err(Error::internal(format!(
                "no prompt outstanding (state {})",
                self.state
            )));
        }
        self.flush_stream().await?;

        let response = match self.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.read_response()).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(format!(
                    "no prompt within {}ms",
                    limit.as_millis()
                ))),
            },
            None => self.read_response().await,
        };

        match response {
            Ok(Response::Error(message)) => {
                debug!(error = %message, "server reported error");
                self.state = SessionState::Faulted;
                Ok(Response::Error(message))
            }
            Ok(other) => {
                self.state = SessionState::Idle;
                Ok(other)
            }
            Err(e) => Err(self.fail_transport(e)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;

        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        if self.transport_failed {
            return Ok(());
        }
        stream
            .flush()
            .await
            .map_err(|e| Error::connection_with_source("flush on close failed", e))?;
        stream
            .shutdown()
            .await
            .map_err(|e| Error::connection_with_source("shutdown failed", e))?;
        debug!("session closed");
        Ok(())
    }
}

/// Opens TCP sessions from a `SessionConfig`
#[derive(Debug, Clone)]
pub struct TcpSessionFactory {
    config: SessionConfig,
}

impl TcpSessionFactory {
    /// Create a factory
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for TcpSessionFactory {
    async fn open(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(MapiSession::connect(&self.config).await?))
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}
