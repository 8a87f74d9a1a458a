//! Answer composition: hand a tool result to a language model and get
//! back a natural-language answer.

mod errors;
mod openai;

pub use errors::ComposeError;
pub use openai::{OpenAiComposer, OpenAiComposerBuilder};

use std::future::Future;

use mcp::CallToolResult;

/// Instruction sent ahead of the user's question.
pub const SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer the user's question using the provided tool data.";

/// Who a turn is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    ToolResult,
}

/// One message of the conversation sent for composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn tool_result(content: impl Into<String>) -> Self {
        Self {
            role: Role::ToolResult,
            content: content.into(),
        }
    }
}

/// Turns for answering `question` from a tool's output: the system
/// instruction, then one user prompt carrying both the question and the data.
pub fn synthesis_turns(question: &str, result: &CallToolResult) -> Vec<ConversationTurn> {
    let prompt = format!(
        "The user asked: {question}\nThe tool returned this data:\n{}\nPlease answer the user based on the data.",
        result.text()
    );
    vec![
        ConversationTurn::system(SYSTEM_PROMPT),
        ConversationTurn::user(prompt),
    ]
}

/// A text-generation service.
pub trait Composer: Send + Sync {
    fn compose(
        &self,
        turns: &[ConversationTurn],
    ) -> impl Future<Output = Result<String, ComposeError>> + Send;
}
