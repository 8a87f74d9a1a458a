//! Agent runtime: drive a tool session and compose the answer.
//!
//! An [`Agent`] opens a session with a tool host, discovers its tools, lets a
//! [`ToolSelector`] pick one call, makes it, and hands the result to a
//! [`Composer`] for a natural-language answer.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{ServerConfig, Target};
//! use runtime::{Agent, OpenAiComposer, StaticSelector, ToolCallRequest};
//!
//! # async fn example() -> runtime::Result<()> {
//! let mut arguments = serde_json::Map::new();
//! arguments.insert("location".into(), "Hangzhou".into());
//! let selector = StaticSelector::new(ToolCallRequest::new("get_daily_forecast", arguments));
//!
//! let composer = OpenAiComposer::builder(
//!     "https://dashscope.aliyuncs.com/compatible-mode/v1",
//!     "sk-...",
//!     "qwen-max",
//! )
//! .build()?;
//!
//! let target = Target::Process(ServerConfig::new("weather", "weather-server"));
//! let outcome = Agent::new(selector, composer)
//!     .run(&target, "What's the weather in Hangzhou today?")
//!     .await?;
//! println!("{:?}", outcome.answer);
//! # Ok(())
//! # }
//! ```

mod agent;
pub mod composer;
mod error;
mod selector;

pub use agent::{Agent, Answer, Outcome, Progress};
pub use composer::{
    ComposeError, Composer, ConversationTurn, OpenAiComposer, OpenAiComposerBuilder, Role,
    synthesis_turns,
};
pub use error::{Error, Result};
pub use selector::{StaticSelector, ToolCallRequest, ToolSelector};
