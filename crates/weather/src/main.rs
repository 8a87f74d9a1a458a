//! weather-server: serves the weather tools over stdio or TCP.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use weather::{FixedSource, OpenMeteo, SourceError};

#[derive(Parser)]
#[command(name = "weather-server")]
#[command(about = "MCP tool host with weather forecast and warning tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Where weather data comes from
    #[arg(long, value_enum, default_value_t = Source::Fixed)]
    source: Source,

    /// Accept TCP sessions on this address instead of serving stdin/stdout
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Source {
    /// Deterministic sunny placeholder
    Fixed,
    /// Live data from open-meteo.com
    OpenMeteo,
}

#[derive(Debug, Error)]
enum Error {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Mcp(#[from] mcp::Error),
}

#[tokio::main]
async fn main() {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let host = match cli.source {
        Source::Fixed => weather::host(FixedSource)?,
        Source::OpenMeteo => weather::host(OpenMeteo::new()?)?,
    };
    tracing::info!(source = ?cli.source, tools = host.registry().len(), "weather host starting");

    match cli.listen {
        Some(addr) => Arc::new(host).listen(addr).await?,
        None => host.serve_stdio().await?,
    }
    Ok(())
}
