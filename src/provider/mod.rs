//! Translation between [`Conversation`] and LLM provider wire formats.
//!
//! Each provider is one [`ProviderDelegate`] implementation. The agent loop
//! only ever talks to the trait.

mod claude;
mod openai;

pub use claude::{
    ANTHROPIC_API_URL, ANTHROPIC_VERSION, ClaudeDelegate, claude_messages_to_conversation,
    parse_claude_response, to_claude_messages, to_claude_tools,
};
pub use openai::{OPENAI_API_URL, OpenAiDelegate, parse_openai_response, to_openai_messages};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::config::{Config, ProviderKind};
use crate::conversation::{Conversation, ToolCall, ToolDescriptor, ToolResult, done_result};
use crate::error::ProviderError;

pub const SYSTEM_PROMPT: &str = "You are a browser automation agent. You control a real browser \
through the tools you are given. Every tool result ends with the current page state; element \
references such as [ref=e3] in that snapshot are what the tools expect as `ref`. Keep steps \
minimal and do not over-navigate. If a tool reports an error, try an alternative approach.";

const DONE_INSTRUCTION: &str = "When the task is accomplished, call the `done` tool with a short \
summary of the result.";

pub(crate) fn system_prompt(one_shot: bool) -> String {
    if one_shot {
        SYSTEM_PROMPT.to_string()
    } else {
        format!("{} {}", SYSTEM_PROMPT, DONE_INSTRUCTION)
    }
}

#[async_trait]
pub trait ProviderDelegate: Send + Sync {
    fn name(&self) -> &str;

    fn create_conversation(
        &self,
        task: &str,
        tools: Vec<ToolDescriptor>,
        one_shot: bool,
    ) -> Conversation {
        Conversation::new(task, tools, one_shot)
    }

    /// Performs one model call and appends the assistant message to the
    /// conversation. Returns the tool calls it requested, in order.
    async fn make_api_call(
        &self,
        conversation: &mut Conversation,
    ) -> Result<Vec<ToolCall>, ProviderError>;

    fn add_tool_results(&self, conversation: &mut Conversation, results: Vec<ToolResult>) {
        for result in results {
            conversation.push_tool_result(result);
        }
    }

    fn check_done(&self, call: &ToolCall) -> Option<String> {
        done_result(call)
    }
}

pub fn delegate_from_config(config: &Config) -> anyhow::Result<Arc<dyn ProviderDelegate>> {
    let delegate: Arc<dyn ProviderDelegate> = match config.provider {
        ProviderKind::Claude => Arc::new(ClaudeDelegate::from_config(config)?),
        ProviderKind::OpenAi => Arc::new(OpenAiDelegate::from_config(config)?),
    };
    Ok(delegate)
}

/// Reads a provider response body, turning non-2xx statuses into
/// [`ProviderError::Api`] with the provider's own message when it has one.
pub(crate) async fn read_json(
    provider: &str,
    response: reqwest::Response,
) -> Result<Value, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    let parsed: Option<Value> = serde_json::from_str(&body).ok();

    if !status.is_success() {
        let message = parsed
            .as_ref()
            .and_then(|v| v["error"]["message"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.clone());
        warn!(provider, status = status.as_u16(), "API error: {}", message);
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        });
    }

    parsed.ok_or_else(|| {
        ProviderError::MalformedResponse(format!("{} returned a non-JSON body", provider))
    })
}
