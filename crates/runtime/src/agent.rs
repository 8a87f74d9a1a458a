//! Agent client: one question, one tool call, one composed answer.

use std::time::Duration;

use mcp::{CallToolResult, Client, Implementation, Target, Tool};
use tracing::{info, warn};

use crate::composer::{Composer, synthesis_turns};
use crate::selector::{ToolCallRequest, ToolSelector};
use crate::{Error, Result};

/// Milestones of a run, reported to the observer as they happen.
#[derive(Debug, Clone, Copy)]
pub enum Progress<'a> {
    Connected { server: &'a str, tools: &'a [Tool] },
    ToolSelected(&'a ToolCallRequest),
    ToolResult(&'a CallToolResult),
    Composing,
}

/// The final answer, or why there is none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Composed(String),
    /// The tool call succeeded but composition failed; the tool output is
    /// still available on the [`Outcome`].
    Degraded { reason: String },
}

impl Answer {
    pub fn text(&self) -> Option<&str> {
        match self {
            Answer::Composed(text) => Some(text),
            Answer::Degraded { .. } => None,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub tools: Vec<Tool>,
    pub request: ToolCallRequest,
    pub result: CallToolResult,
    pub answer: Answer,
}

type Observer = Box<dyn Fn(&Progress<'_>) + Send + Sync>;

/// Drives a session against a tool host and composes the answer.
pub struct Agent<S, C> {
    selector: S,
    composer: C,
    timeout: Duration,
    observer: Option<Observer>,
}

impl<S: ToolSelector, C: Composer> Agent<S, C> {
    pub fn new(selector: S, composer: C) -> Self {
        Self {
            selector,
            composer,
            timeout: mcp::DEFAULT_TIMEOUT,
            observer: None,
        }
    }

    /// Per-request timeout for the tool session.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: impl Fn(&Progress<'_>) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Open a session to `target` and answer `question`.
    pub async fn run(&self, target: &Target, question: &str) -> Result<Outcome> {
        let client = match target {
            Target::Process(config) => Client::spawn(config).await?,
            Target::Tcp { name, addr } => Client::connect_tcp(name, addr).await?,
        };
        self.run_with_client(client, question).await
    }

    /// Answer `question` over an already open, not yet initialized session.
    ///
    /// The session is closed before this returns, whatever the outcome.
    pub async fn run_with_client(&self, client: Client, question: &str) -> Result<Outcome> {
        let mut client = client
            .with_timeout(self.timeout)
            .with_client_info(Implementation::new("weather-agent", env!("CARGO_PKG_VERSION")));

        let exchange = self.exchange(&mut client, question).await;
        if let Err(e) = client.close().await {
            warn!(error = %e, "failed to close session cleanly");
        }
        let (tools, request, result) = exchange?;

        self.notify(&Progress::Composing);
        let turns = synthesis_turns(question, &result);
        let answer = match self.composer.compose(&turns).await {
            Ok(text) => Answer::Composed(text),
            Err(e) => {
                warn!(error = %e, "composition failed, returning tool output only");
                Answer::Degraded {
                    reason: e.to_string(),
                }
            }
        };

        Ok(Outcome {
            tools,
            request,
            result,
            answer,
        })
    }

    async fn exchange(
        &self,
        client: &mut Client,
        question: &str,
    ) -> Result<(Vec<Tool>, ToolCallRequest, CallToolResult)> {
        client.initialize().await?;
        let tools = client.list_tools().await?;
        self.notify(&Progress::Connected {
            server: client.name(),
            tools: &tools,
        });

        let request = self
            .selector
            .decide(question, &tools)
            .ok_or_else(|| Error::NoToolSelected(tools.iter().map(|t| t.name.clone()).collect()))?;
        info!(tool = %request.name, "tool selected");
        self.notify(&Progress::ToolSelected(&request));

        let result = client
            .call_tool(&request.name, Some(request.arguments_value()))
            .await?;
        self.notify(&Progress::ToolResult(&result));

        Ok((tools, request, result))
    }

    fn notify(&self, progress: &Progress<'_>) {
        if let Some(observer) = &self.observer {
            observer(progress);
        }
    }
}
