use thiserror::Error;

/// Errors from the text-generation service.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("network: {0}")]
    Network(String),
    #[error("api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
