//! MCP (Model Context Protocol) over line-delimited JSON-RPC.
//!
//! Both ends of a tool session live here: a [`Host`] that serves a
//! [`ToolRegistry`], and a [`Client`] that spawns or connects to a host,
//! performs the handshake, discovers tools, and calls them.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{Client, ServerConfig, Target};
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ServerConfig::new("weather", "weather-server");
//! let mut client = Client::connect(&Target::Process(config)).await?;
//!
//! for tool in client.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let result = client.call_tool("get_daily_forecast", Some(serde_json::json!({
//!     "location": "Hangzhou"
//! }))).await?;
//! println!("{}", result.text());
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod framing;
mod host;
mod protocol;
mod registry;
mod session;

pub use client::{Client, DEFAULT_TIMEOUT, ServerConfig, Target};
pub use error::{Error, Result};
pub use framing::MAX_FRAME_SIZE;
pub use host::Host;
pub use protocol::{
    CallToolParams, CallToolResult, ErrorEnvelope, ErrorKind, Implementation, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    PROTOCOL_VERSION, RequestId, ServerCapabilities, Tool, ToolContent, methods,
};
pub use registry::{
    Arguments, HandlerError, HandlerFuture, ParamSpec, ParamType, ToolDescriptor, ToolHandler,
    ToolRegistry,
};
pub use session::SessionState;
