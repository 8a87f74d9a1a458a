//! Tool host: serves a [`ToolRegistry`] to MCP clients.
//!
//! Each session runs the handshake, then answers `tools/list` and
//! `tools/call` in arrival order until the peer closes the channel.
//! Out-of-sequence or unparseable messages end the session; invocation
//! errors are reported to the client and the session carries on.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::framing::{self, Frame, FrameReader};
use crate::protocol::{
    CallToolParams, ErrorEnvelope, ErrorKind, INVALID_PARAMS, INVALID_REQUEST, Implementation,
    InitializeParams, InitializeResult, JSONRPC_VERSION, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION, RequestId,
    SERVER_NOT_INITIALIZED, ServerCapabilities, ToolsCapability, methods,
};
use crate::registry::ToolRegistry;
use crate::session::SessionState;

/// What the session loop does after handling one message.
enum Step {
    Continue(Option<JsonRpcResponse>),
    /// End the session, answering first if the message had an id.
    Close(Option<JsonRpcResponse>, Error),
}

/// Serves tools from a shared registry. Holds no per-session state.
#[derive(Debug)]
pub struct Host {
    registry: Arc<ToolRegistry>,
    info: Implementation,
    instructions: Option<String>,
}

impl Host {
    pub fn new(registry: Arc<ToolRegistry>, info: Implementation) -> Self {
        Self {
            registry,
            info,
            instructions: None,
        }
    }

    /// Free-form usage hint returned in the initialize result.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Serve a single session on this process's stdin/stdout.
    pub async fn serve_stdio(&self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Accept TCP connections and serve each on its own task.
    pub async fn serve_tcp(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let host = Arc::clone(&self);
            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                if let Err(e) = host.serve(reader, writer).await {
                    warn!(%peer, error = %e, "session ended with error");
                }
            });
        }
    }

    /// Bind `addr` and serve until the listener fails.
    pub async fn listen(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "listening for sessions");
        self.serve_tcp(listener).await
    }

    /// Serve one session until the peer closes the channel.
    ///
    /// Returns `Ok(())` on a clean close and the fatal error otherwise.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let span = info_span!("session", id = %Uuid::new_v4());
        async move {
            let mut frames = FrameReader::new(BufReader::new(reader));
            let mut state = SessionState::Handshaking;
            // A frame that arrived while a call was still running.
            let mut pending: Option<Result<Frame>> = None;
            info!("session opened");

            loop {
                let frame = match pending.take() {
                    Some(frame) => frame,
                    None => frames.next_frame().await,
                };
                let line = match frame {
                    Ok(Frame::Line(line)) => line,
                    Ok(Frame::Eof) => {
                        info!(%state, "session closed by peer");
                        return Ok(());
                    }
                    Err(e @ (Error::OutputTooLarge { .. } | Error::ProtocolViolation(_))) => {
                        let _ = framing::write_frame(&mut writer, &malformed(&e)).await;
                        warn!(error = %e, "closing session");
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                };

                let request = match parse_request(&line) {
                    Ok(request) => request,
                    Err(e) => {
                        framing::write_frame(&mut writer, &malformed(&e)).await?;
                        warn!(error = %e, "closing session");
                        return Err(e);
                    }
                };

                // Keep reading while the request runs: a closed channel
                // drops the request, and with it any running handler.
                let step = {
                    let handling = self.handle(&mut state, request);
                    tokio::pin!(handling);
                    loop {
                        if pending.is_some() {
                            break (&mut handling).await;
                        }
                        tokio::select! {
                            biased;
                            step = &mut handling => break step,
                            frame = frames.next_frame() => match frame {
                                Ok(Frame::Eof) => {
                                    info!("channel closed mid-request, cancelling it");
                                    return Ok(());
                                }
                                Err(e @ Error::Io(_)) => return Err(e),
                                other => pending = Some(other),
                            },
                        }
                    }
                };

                match step {
                    Step::Continue(Some(response)) => {
                        framing::write_frame(&mut writer, &response).await?;
                    }
                    Step::Continue(None) => {}
                    Step::Close(response, e) => {
                        state = SessionState::Closed;
                        if let Some(response) = response {
                            framing::write_frame(&mut writer, &response).await?;
                        }
                        warn!(%state, error = %e, "closing session");
                        return Err(e);
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn handle(&self, state: &mut SessionState, request: JsonRpcRequest) -> Step {
        let method = request.method.as_str();

        let Some(id) = request.id.clone() else {
            return match *state {
                SessionState::Handshaking => {
                    let message = format!("{method} notification before initialize");
                    Step::Close(None, Error::ProtocolViolation(message))
                }
                _ if method == methods::INITIALIZED => {
                    debug!("client confirmed initialization");
                    Step::Continue(None)
                }
                _ => {
                    debug!(method, %state, "ignoring notification");
                    Step::Continue(None)
                }
            };
        };

        if !state.permits(method) {
            let (code, message) = match *state {
                SessionState::Ready => (INVALID_REQUEST, "session already initialized".to_string()),
                _ => (SERVER_NOT_INITIALIZED, format!("{method} before initialize")),
            };
            return violation(id, code, message);
        }

        debug!(method, "handling request");
        match method {
            methods::INITIALIZE => {
                let params: InitializeParams = match decode_params(request.params) {
                    Ok(params) => params,
                    Err(e) => return violation(id, INVALID_PARAMS, e),
                };
                info!(
                    client = %params.client_info.name,
                    version = %params.protocol_version,
                    "initialize"
                );
                *state = SessionState::Ready;
                respond(id, &self.initialize_result())
            }
            methods::PING => respond(id, &json!({})),
            methods::TOOLS_LIST => respond(
                id,
                &ListToolsResult {
                    tools: self.registry.tools(),
                },
            ),
            methods::TOOLS_CALL => {
                let params: CallToolParams = match decode_params(request.params) {
                    Ok(params) => params,
                    Err(e) => {
                        return Step::Continue(Some(JsonRpcResponse::failure(
                            Some(id),
                            JsonRpcError::new(INVALID_PARAMS, e),
                        )));
                    }
                };
                match self.registry.invoke(&params.name, params.arguments).await {
                    Ok(result) => respond(id, &result),
                    Err(e) => {
                        warn!(tool = %params.name, error = %e, "tool call failed");
                        Step::Continue(Some(JsonRpcResponse::failure(
                            Some(id),
                            e.to_jsonrpc_error(),
                        )))
                    }
                }
            }
            other => Step::Continue(Some(JsonRpcResponse::failure(
                Some(id),
                JsonRpcError::new(METHOD_NOT_FOUND, format!("method not found: {other}")),
            ))),
        }
    }

    /// Only one revision is spoken; a client asking for another gets ours
    /// back and decides whether to continue.
    fn initialize_result(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
            },
            server_info: self.info.clone(),
            instructions: self.instructions.clone(),
        }
    }
}

fn parse_request(line: &str) -> Result<JsonRpcRequest> {
    let request: JsonRpcRequest = framing::decode(line)?;
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(Error::ProtocolViolation(format!(
            "unsupported jsonrpc version: {}",
            request.jsonrpc
        )));
    }
    Ok(request)
}

fn decode_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, String> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| format!("invalid params: {e}"))
}

fn respond(id: RequestId, result: &impl serde::Serialize) -> Step {
    match serde_json::to_value(result) {
        Ok(value) => Step::Continue(Some(JsonRpcResponse::success(Some(id), value))),
        Err(e) => Step::Continue(Some(JsonRpcResponse::failure(
            Some(id),
            Error::Serialize(e).to_jsonrpc_error(),
        ))),
    }
}

fn violation(id: RequestId, code: i32, message: impl Into<String>) -> Step {
    let message = message.into();
    let envelope = ErrorEnvelope::new(ErrorKind::ProtocolViolation, message.clone());
    let error = JsonRpcError::new(code, message.clone()).with_envelope(&envelope);
    Step::Close(
        Some(JsonRpcResponse::failure(Some(id), error)),
        Error::ProtocolViolation(message),
    )
}

fn malformed(error: &Error) -> JsonRpcResponse {
    let envelope = ErrorEnvelope::new(ErrorKind::Malformed, error.to_string());
    JsonRpcResponse::failure(
        None,
        JsonRpcError::new(PARSE_ERROR, "Parse error").with_envelope(&envelope),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ToolContent;
    use crate::registry::{Arguments, HandlerError, ToolDescriptor};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    fn host() -> Host {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDescriptor::new("hello", "Say hello"), |_args: Arguments| async {
                Ok::<_, HandlerError>(vec![ToolContent::text("hello")])
            })
            .unwrap();
        Host::new(Arc::new(registry), Implementation::new("test-host", "0.1.0"))
    }

    /// Feed raw lines to a host, read `expected` replies, then close the
    /// channel and collect anything else it wrote.
    async fn exchange(lines: &[&str], expected: usize) -> (Result<()>, Vec<JsonRpcResponse>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);
        let task = tokio::spawn(async move { host().serve(server_read, server_write).await });

        for line in lines {
            client_write.write_all(line.as_bytes()).await.unwrap();
            client_write.write_all(b"\n").await.unwrap();
        }

        let mut responses = Vec::new();
        let mut reader = tokio::io::BufReader::new(client_read).lines();
        while responses.len() < expected {
            match reader.next_line().await {
                Ok(Some(line)) => responses.push(serde_json::from_str(&line).unwrap()),
                _ => break,
            }
        }
        client_write.shutdown().await.unwrap();
        let outcome = task.await.unwrap();

        while let Ok(Some(line)) = reader.next_line().await {
            responses.push(serde_json::from_str(&line).unwrap());
        }
        (outcome, responses)
    }

    const INIT: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"t","version":"0"}}}"#;

    #[tokio::test]
    async fn handshake_then_list() {
        let (outcome, responses) = exchange(
            &[
                INIT,
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            ],
            2,
        )
        .await;

        assert!(outcome.is_ok());
        assert_eq!(responses.len(), 2);
        let init = responses[0].clone().into_result().unwrap();
        assert_eq!(init["serverInfo"]["name"], "test-host");
        assert_eq!(init["protocolVersion"], PROTOCOL_VERSION);
        let list = responses[1].clone().into_result().unwrap();
        assert_eq!(list["tools"][0]["name"], "hello");
    }

    #[tokio::test]
    async fn list_before_initialize_closes_session() {
        let (outcome, responses) = exchange(
            &[r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#, INIT],
            1,
        )
        .await;

        assert!(matches!(outcome, Err(Error::ProtocolViolation(_))));
        // The initialize after the violation is never answered.
        assert_eq!(responses.len(), 1);
        let error = responses[0].error.clone().unwrap();
        assert_eq!(error.code, SERVER_NOT_INITIALIZED);
        assert_eq!(error.envelope().unwrap().kind, ErrorKind::ProtocolViolation);
    }

    #[tokio::test]
    async fn second_initialize_is_a_violation() {
        let (outcome, responses) = exchange(&[INIT, INIT], 2).await;
        assert!(matches!(outcome, Err(Error::ProtocolViolation(_))));
        assert_eq!(responses.len(), 2);
        assert!(responses[1].error.is_some());
    }

    #[tokio::test]
    async fn garbage_gets_parse_error_with_null_id() {
        let (outcome, responses) = exchange(&["this is not json"], 1).await;
        assert!(matches!(outcome, Err(Error::ProtocolViolation(_))));
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, None);
        assert_eq!(responses[0].error.as_ref().unwrap().code, PARSE_ERROR);
    }

    #[tokio::test]
    async fn unknown_method_keeps_session_open() {
        let (outcome, responses) = exchange(
            &[
                INIT,
                r#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#,
                r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#,
            ],
            3,
        )
        .await;

        assert!(outcome.is_ok());
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[1].error.as_ref().unwrap().code, METHOD_NOT_FOUND);
        assert!(responses[2].error.is_none());
    }

    #[tokio::test]
    async fn call_errors_are_not_fatal() {
        let (outcome, responses) = exchange(
            &[
                INIT,
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"nope"}}"#,
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"hello"}}"#,
            ],
            3,
        )
        .await;

        assert!(outcome.is_ok());
        let envelope = responses[1].error.as_ref().unwrap().envelope().unwrap();
        assert_eq!(envelope.kind, ErrorKind::UnknownTool);
        let result = responses[2].clone().into_result().unwrap();
        assert_eq!(result["content"][0]["text"], "hello");
    }

    #[tokio::test]
    async fn invalid_utf8_gets_parse_error() {
        let mut line = b"\xff\xfe".to_vec();
        line.extend_from_slice(INIT.as_bytes());
        line.push(b'\n');

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(&line).await.unwrap();

        let outcome = host().serve(server_read, server_write).await;
        assert!(matches!(outcome, Err(Error::ProtocolViolation(_))));

        let mut reader = tokio::io::BufReader::new(client_read).lines();
        let reply: JsonRpcResponse =
            serde_json::from_str(&reader.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply.id, None);
        let error = reply.error.unwrap();
        assert_eq!(error.code, PARSE_ERROR);
        assert_eq!(error.envelope().unwrap().kind, ErrorKind::Malformed);
    }

    #[tokio::test]
    async fn notification_before_initialize_closes_session() {
        let (outcome, responses) = exchange(
            &[r#"{"jsonrpc":"2.0","method":"tools/list"}"#, INIT],
            0,
        )
        .await;
        assert!(matches!(outcome, Err(Error::ProtocolViolation(ref m)) if m.contains("before initialize")));
        assert!(responses.is_empty());
    }
}
