//! MCP error types.

use crate::protocol::{
    ErrorEnvelope, ErrorKind, INTERNAL_ERROR, INVALID_PARAMS, JsonRpcError, TOOL_EXECUTION_ERROR,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open session: {0}")]
    Connection(String),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session closed")]
    Closed,

    #[error("channel closed before the response arrived")]
    Cancelled,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("timeout waiting for response")]
    Timeout,

    #[error("output too large: {size} bytes (max {max})")]
    OutputTooLarge { size: usize, max: usize },

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("tool not found: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: parameter '{parameter}' {reason}")]
    InvalidArguments {
        tool: String,
        parameter: String,
        reason: String,
    },

    #[error("tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },
}

impl Error {
    /// Whether this error ends the session it occurred on.
    ///
    /// Invocation-level failures leave the session usable; everything on the
    /// transport or sequencing level does not.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::JsonRpc(_)
                | Error::DuplicateTool(_)
                | Error::UnknownTool(_)
                | Error::InvalidArguments { .. }
                | Error::ToolExecution { .. }
        )
    }
}

impl Error {
    /// Wire form of an invocation error, with its envelope in `data`.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Error::UnknownTool(name) => {
                let mut envelope = ErrorEnvelope::new(ErrorKind::UnknownTool, self.to_string());
                envelope.tool = Some(name.clone());
                JsonRpcError::new(INVALID_PARAMS, self.to_string()).with_envelope(&envelope)
            }
            Error::InvalidArguments {
                tool,
                parameter,
                reason,
            } => {
                let mut envelope = ErrorEnvelope::new(ErrorKind::InvalidArguments, reason.clone());
                envelope.tool = Some(tool.clone());
                envelope.parameter = Some(parameter.clone());
                JsonRpcError::new(INVALID_PARAMS, self.to_string()).with_envelope(&envelope)
            }
            Error::ToolExecution { tool, message } => {
                let mut envelope = ErrorEnvelope::new(ErrorKind::ToolExecution, message.clone());
                envelope.tool = Some(tool.clone());
                JsonRpcError::new(TOOL_EXECUTION_ERROR, self.to_string()).with_envelope(&envelope)
            }
            Error::JsonRpc(e) => e.clone(),
            _ => JsonRpcError::new(INTERNAL_ERROR, self.to_string()),
        }
    }

    /// Recover a typed error from a JSON-RPC error sent by the host.
    pub fn from_jsonrpc(error: JsonRpcError) -> Self {
        let Some(envelope) = error.envelope() else {
            return Error::JsonRpc(error);
        };
        let tool = envelope.tool.unwrap_or_default();
        match envelope.kind {
            ErrorKind::UnknownTool => Error::UnknownTool(tool),
            ErrorKind::InvalidArguments => Error::InvalidArguments {
                tool,
                parameter: envelope.parameter.unwrap_or_default(),
                reason: envelope.message,
            },
            ErrorKind::ToolExecution => Error::ToolExecution {
                tool,
                message: envelope.message,
            },
            ErrorKind::ProtocolViolation | ErrorKind::Malformed => {
                Error::ProtocolViolation(envelope.message)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_errors_are_not_fatal() {
        assert!(!Error::UnknownTool("x".into()).is_fatal());
        assert!(
            !Error::InvalidArguments {
                tool: "t".into(),
                parameter: "p".into(),
                reason: "is required".into(),
            }
            .is_fatal()
        );
        assert!(
            !Error::ToolExecution {
                tool: "t".into(),
                message: "boom".into(),
            }
            .is_fatal()
        );
    }

    #[test]
    fn transport_errors_are_fatal() {
        assert!(Error::Cancelled.is_fatal());
        assert!(Error::Timeout.is_fatal());
        assert!(Error::ProtocolViolation("early tools/list".into()).is_fatal());
    }

    #[test]
    fn invocation_errors_survive_the_wire() {
        let original = Error::InvalidArguments {
            tool: "get_daily_forecast".into(),
            parameter: "location".into(),
            reason: "is required".into(),
        };
        let wire = original.to_jsonrpc_error();
        assert_eq!(wire.code, INVALID_PARAMS);

        match Error::from_jsonrpc(wire) {
            Error::InvalidArguments {
                tool,
                parameter,
                reason,
            } => {
                assert_eq!(tool, "get_daily_forecast");
                assert_eq!(parameter, "location");
                assert_eq!(reason, "is required");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let wire = Error::UnknownTool("get_rain_radar".into()).to_jsonrpc_error();
        assert!(matches!(Error::from_jsonrpc(wire), Error::UnknownTool(name) if name == "get_rain_radar"));
    }

    #[test]
    fn plain_jsonrpc_error_stays_generic() {
        let err = Error::from_jsonrpc(JsonRpcError::new(-32601, "Method not found"));
        assert!(matches!(err, Error::JsonRpc(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn invalid_arguments_names_parameter() {
        let err = Error::InvalidArguments {
            tool: "get_daily_forecast".into(),
            parameter: "location".into(),
            reason: "is required".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid arguments for get_daily_forecast: parameter 'location' is required"
        );
    }
}
