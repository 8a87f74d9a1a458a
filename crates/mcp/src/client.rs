//! Client side of a session (spawn or connect, handshake, requests, close).

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::framing::{self, Frame, FrameReader};
use crate::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION, RequestId, Tool, methods,
};
use crate::session::SessionState;

/// Default timeout for MCP operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// How long `close` waits for a spawned host to exit before killing it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Configuration for a tool host launched as a child process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Where to open a session.
#[derive(Debug, Clone)]
pub enum Target {
    /// Launch the host and talk over its stdin/stdout.
    Process(ServerConfig),
    /// Connect to a host listening on a TCP address.
    Tcp { name: String, addr: String },
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Target::Process(config) => &config.name,
            Target::Tcp { name, .. } => name,
        }
    }
}

type Reader = Box<dyn AsyncBufRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// An open session with a tool host.
///
/// Every request takes `&mut self`, so a second request cannot be sent
/// before the previous response has arrived. Any fatal error moves the
/// session to [`SessionState::Closed`] and later calls fail with
/// [`Error::Closed`].
pub struct Client {
    name: String,
    reader: FrameReader<Reader>,
    writer: Option<Writer>,
    process: Option<Child>,
    state: SessionState,
    next_id: i64,
    timeout: Duration,
    client_info: Implementation,
    server_info: Option<InitializeResult>,
}

impl Client {
    /// Open a session to `target` and complete the handshake.
    pub async fn connect(target: &Target) -> Result<Self> {
        let mut client = match target {
            Target::Process(config) => Self::spawn(config).await?,
            Target::Tcp { name, addr } => Self::connect_tcp(name, addr).await?,
        };
        client.initialize().await?;
        Ok(client)
    }

    /// Spawn a host process. The session starts in `Handshaking`.
    pub async fn spawn(config: &ServerConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn().map_err(|e| {
            Error::Connection(format!("failed to spawn {}: {e}", config.command))
        })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Connection("failed to capture stdin".into()))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Connection("failed to capture stdout".into()))?;

        debug!(server = %config.name, command = %config.command, "spawned tool host");
        let mut client = Self::from_streams(&config.name, stdout, stdin);
        client.process = Some(process);
        Ok(client)
    }

    /// Connect to a host listening on `addr`. The session starts in `Handshaking`.
    pub async fn connect_tcp(name: &str, addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Connection(format!("failed to connect to {addr}: {e}")))?;
        let (reader, writer) = stream.into_split();
        Ok(Self::from_streams(name, reader, writer))
    }

    /// Open a session over an arbitrary pair of byte streams.
    pub fn from_streams<R, W>(name: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            name: name.into(),
            reader: FrameReader::new(Box::new(BufReader::new(reader)) as Reader),
            writer: Some(Box::new(writer)),
            process: None,
            state: SessionState::Handshaking,
            next_id: 1,
            timeout: DEFAULT_TIMEOUT,
            client_info: Implementation::new("mcp-client", env!("CARGO_PKG_VERSION")),
            server_info: None,
        }
    }

    /// Per-request timeout (default [`DEFAULT_TIMEOUT`]).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Identity announced during the handshake.
    pub fn with_client_info(mut self, info: Implementation) -> Self {
        self.client_info = info;
        self
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get server info (after initialization).
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    /// Run the initialize exchange. Must be the first request on a session.
    pub async fn initialize(&mut self) -> Result<&InitializeResult> {
        let params = InitializeParams::new(self.client_info.clone());
        let result: InitializeResult = self.request(methods::INITIALIZE, Some(params)).await?;

        if result.protocol_version != PROTOCOL_VERSION {
            self.mark_closed();
            return Err(Error::ProtocolViolation(format!(
                "unsupported protocol version: {}",
                result.protocol_version
            )));
        }

        self.state = SessionState::Ready;
        self.notify(methods::INITIALIZED).await?;

        info!(
            server = %self.name,
            server_name = %result.server_info.name,
            server_version = %result.server_info.version,
            "session ready"
        );
        Ok(self.server_info.insert(result))
    }

    /// Fetch the host's tools, in the host's registration order.
    pub async fn list_tools(&mut self) -> Result<Vec<Tool>> {
        let result: ListToolsResult = self.request(methods::TOOLS_LIST, None::<()>).await?;
        Ok(result.tools)
    }

    /// Call a tool by name.
    pub async fn call_tool(&mut self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };

        let result: CallToolResult = self.request(methods::TOOLS_CALL, Some(params)).await?;

        // Some hosts report handler failures in-band instead of as an error response.
        if result.is_error {
            return Err(Error::ToolExecution {
                tool: name.to_string(),
                message: result.text(),
            });
        }

        Ok(result)
    }

    /// Liveness check.
    pub async fn ping(&mut self) -> Result<()> {
        let _: Value = self.request(methods::PING, None::<()>).await?;
        Ok(())
    }

    /// End the session.
    ///
    /// Closing stdin lets a spawned host exit on its own; it is killed if it
    /// is still running after a short grace period.
    pub async fn close(mut self) -> Result<()> {
        self.mark_closed();

        if let Some(mut process) = self.process.take() {
            match timeout(CLOSE_GRACE, process.wait()).await {
                Ok(Ok(status)) => debug!(server = %self.name, %status, "tool host exited"),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!(server = %self.name, "tool host did not exit, killing it");
                    process.kill().await?;
                }
            }
        }

        info!(server = %self.name, "session closed");
        Ok(())
    }

    // --- Internal methods ---

    fn next_request_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        RequestId::Number(id)
    }

    fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
        self.writer = None;
    }

    async fn request<P, R>(&mut self, method: &str, params: Option<P>) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        match self.state {
            SessionState::Closed => return Err(Error::Closed),
            state if !state.permits(method) => {
                self.mark_closed();
                return Err(Error::ProtocolViolation(format!(
                    "{method} is not allowed while the session is {state}"
                )));
            }
            _ => {}
        }

        let result = self.round_trip(method, params).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(server = %self.name, method, error = %e, "session failed");
                self.mark_closed();
            }
        }
        result
    }

    async fn round_trip<P, R>(&mut self, method: &str, params: Option<P>) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        let writer = self.writer.as_mut().ok_or(Error::Closed)?;
        framing::write_frame(writer, &request).await?;

        // Read response with timeout
        let response = timeout(self.timeout, self.read_response())
            .await
            .map_err(|_| Error::Timeout)??;

        // Verify response ID matches
        if response.id.as_ref() != Some(&id) {
            if let (None, Some(error)) = (&response.id, response.error) {
                return Err(Error::from_jsonrpc(error));
            }
            return Err(Error::ProtocolViolation(format!(
                "response ID mismatch: expected {id:?}, got {:?}",
                response.id
            )));
        }

        let value = response.into_result().map_err(Error::from_jsonrpc)?;
        serde_json::from_value(value)
            .map_err(|e| Error::ProtocolViolation(format!("unexpected {method} result: {e}")))
    }

    async fn notify(&mut self, method: &str) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::Closed)?;
        if let Err(e) = framing::write_frame(writer, &JsonRpcRequest::notification(method)).await {
            self.mark_closed();
            return Err(e);
        }
        Ok(())
    }

    async fn read_response(&mut self) -> Result<JsonRpcResponse> {
        loop {
            let line = match self.reader.next_frame().await? {
                Frame::Line(line) => line,
                Frame::Eof => return Err(Error::Cancelled),
            };

            // Host-initiated notifications carry a method and no id.
            let message: Value = framing::decode(&line)?;
            if message.get("method").is_some() && message.get("id").is_none() {
                debug!(server = %self.name, "skipping host notification");
                continue;
            }

            return framing::decode(&line);
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("spawned", &self.process.is_some())
            .finish()
    }
}
