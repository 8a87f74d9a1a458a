mod config;
mod error;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mcp::{ServerConfig, Target};
use runtime::{Agent, Answer, OpenAiComposer, Progress, StaticSelector, ToolCallRequest};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use config::{
    CONFIG_FILE, Config, Credentials, DEFAULT_LOCATION, DEFAULT_MODEL, DEFAULT_QUESTION,
    DEFAULT_TOOL,
};
use error::Result;

const SERVER_BINARY: &str = "weather-server";

#[derive(Parser)]
#[command(name = "weather-agent")]
#[command(about = "Ask a weather question: call a tool host, then let a language model answer", long_about = None)]
#[command(version)]
struct Cli {
    /// Question to answer
    question: Option<String>,

    /// Config file (default: ./weather-agent.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Chat model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Location passed to the forecast tool
    #[arg(short, long)]
    location: Option<String>,

    /// Tool host executable (default: weather-server next to this binary)
    #[arg(long, value_name = "PATH")]
    server: Option<String>,

    /// Extra argument for the tool host, repeatable
    #[arg(long = "server-arg", value_name = "ARG", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Connect to a host listening on this address instead of launching one
    #[arg(long, value_name = "ADDR", conflicts_with = "server")]
    connect: Option<String>,

    /// Per-request timeout for the tool session, in seconds
    #[arg(long, default_value_t = mcp::DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Credentials first: nothing is launched without them.
    let credentials = Credentials::from_env()?;
    let config = load_config(cli.config.as_deref())?;

    let model = cli
        .model
        .or(config.model)
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let question = cli
        .question
        .or(config.question)
        .unwrap_or_else(|| DEFAULT_QUESTION.to_string());
    let request = tool_request(config.tool, cli.location);
    let target = target(
        cli.connect.or(config.server.connect),
        cli.server.or(config.server.command),
        if cli.server_args.is_empty() {
            config.server.args
        } else {
            cli.server_args
        },
    )?;

    let composer = OpenAiComposer::builder(credentials.base_url, credentials.api_key, &model).build()?;
    tracing::debug!(%composer, "composer ready");

    let shown_question = question.clone();
    let agent = Agent::new(StaticSelector::new(request), composer)
        .with_timeout(Duration::from_secs(cli.timeout))
        .with_observer(move |progress| print_progress(progress, &shown_question));

    let outcome = agent.run(&target, &question).await?;

    match &outcome.answer {
        Answer::Composed(text) => println!("\nAnswer:\n{text}"),
        Answer::Degraded { reason } => {
            println!("\nCould not compose an answer ({reason}).");
            println!("Tool output:\n{}", outcome.result.text());
        }
    }
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None if std::path::Path::new(CONFIG_FILE).exists() => Ok(Config::load(CONFIG_FILE)?),
        None => Ok(Config::default()),
    }
}

fn tool_request(configured: Option<ToolCallRequest>, location: Option<String>) -> ToolCallRequest {
    let mut request = configured.unwrap_or_else(|| {
        let mut arguments = Map::new();
        arguments.insert("location".into(), Value::String(DEFAULT_LOCATION.into()));
        ToolCallRequest::new(DEFAULT_TOOL, arguments)
    });
    if let Some(location) = location {
        request.arguments.insert("location".into(), Value::String(location));
    }
    request
}

fn target(connect: Option<String>, command: Option<String>, args: Vec<String>) -> Result<Target> {
    if let Some(addr) = connect {
        return Ok(Target::Tcp {
            name: "weather".into(),
            addr,
        });
    }
    let command = match command {
        Some(command) => command,
        None => default_server_command()?,
    };
    Ok(Target::Process(ServerConfig::new("weather", command).with_args(args)))
}

/// The host binary installed alongside this one, else whatever is on `PATH`.
fn default_server_command() -> Result<String> {
    let exe = std::env::current_exe()?;
    let sibling = exe.with_file_name(format!("{SERVER_BINARY}{}", std::env::consts::EXE_SUFFIX));
    if sibling.exists() {
        Ok(sibling.to_string_lossy().into_owned())
    } else {
        Ok(SERVER_BINARY.to_string())
    }
}

fn print_progress(progress: &Progress<'_>, question: &str) {
    match progress {
        Progress::Connected { server, tools } => {
            let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
            println!("Connected to {server}. Available tools: {}", names.join(", "));
            println!("\nQuestion: {question}");
        }
        Progress::ToolSelected(request) => {
            println!("Calling tool {} with {}", request.name, request.arguments_value());
        }
        Progress::ToolResult(result) => println!("Tool result: {}", result.text()),
        Progress::Composing => println!("Composing answer..."),
    }
}
