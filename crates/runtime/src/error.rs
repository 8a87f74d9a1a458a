use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Mcp(#[from] mcp::Error),

    #[error("no tool selected (discovered: {})", .0.join(", "))]
    NoToolSelected(Vec<String>),
}

pub type Result<T> = std::result::Result<T, Error>;
