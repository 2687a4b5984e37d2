use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{ProviderDelegate, read_json, system_prompt};
use crate::config::{Config, DEFAULT_MAX_OUTPUT_TOKENS};
use crate::conversation::{Conversation, Message, ToolCall};
use crate::error::ProviderError;

pub const OPENAI_API_URL: &str = "https://api.openai.com";

/// Delegate for the OpenAI chat-completions API. Tool results travel as
/// individual `tool` messages there, so no batching is involved.
pub struct OpenAiDelegate {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiDelegate {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut delegate = Self::new(config.require_api_key()?, config.model.clone());
        delegate.max_tokens = config.max_output_tokens;
        if let Some(base_url) = &config.base_url {
            delegate = delegate.with_base_url(base_url.clone());
        }
        Ok(delegate)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request(&self, conversation: &Conversation) -> Value {
        let mut messages = vec![json!({
            "role": "system",
            "content": system_prompt(conversation.is_one_shot()),
        })];
        messages.extend(to_openai_messages(conversation.messages()));

        let mut request = json!({
            "model": self.model,
            "messages": messages,
            "max_completion_tokens": self.max_tokens,
            "temperature": 0.2,
        });
        if !conversation.tools().is_empty() {
            let tools: Vec<Value> = conversation
                .tools()
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema,
                        }
                    })
                })
                .collect();
            request["tools"] = Value::Array(tools);
        }
        request
    }
}

#[async_trait]
impl ProviderDelegate for OpenAiDelegate {
    fn name(&self) -> &str {
        "openai"
    }

    async fn make_api_call(
        &self,
        conversation: &mut Conversation,
    ) -> Result<Vec<ToolCall>, ProviderError> {
        let request = self.build_request(conversation);
        debug!(
            model = %self.model,
            messages = conversation.messages().len(),
            "sending OpenAI request"
        );

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;
        let body = read_json(self.name(), response).await?;

        let (text, tool_calls) = parse_openai_response(&body)?;
        info!(tool_calls = tool_calls.len(), "OpenAI replied");
        conversation.push_assistant(text, tool_calls.clone());
        Ok(tool_calls)
    }
}

pub fn to_openai_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message {
            Message::User { text } => json!({"role": "user", "content": text}),
            Message::Assistant { text, tool_calls } => {
                let mut value = json!({"role": "assistant", "content": text});
                if !tool_calls.is_empty() {
                    let calls: Vec<Value> = tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    value["tool_calls"] = Value::Array(calls);
                }
                value
            }
            Message::ToolResult(result) => json!({
                "role": "tool",
                "tool_call_id": result.tool_call_id,
                "content": result.content,
            }),
        })
        .collect()
}

pub fn parse_openai_response(body: &Value) -> Result<(String, Vec<ToolCall>), ProviderError> {
    let message = body["choices"][0]
        .get("message")
        .ok_or_else(|| {
            ProviderError::MalformedResponse(format!("no message in response: {}", body))
        })?;

    let text = message["content"].as_str().unwrap_or_default().to_string();
    let mut tool_calls = Vec::new();
    for call in message["tool_calls"].as_array().into_iter().flatten() {
        let id = call["id"].as_str().unwrap_or_default();
        let name = call["function"]["name"].as_str().unwrap_or_default();
        if id.is_empty() || name.is_empty() {
            return Err(ProviderError::MalformedResponse(format!(
                "tool call without id or name: {}",
                call
            )));
        }
        let raw_arguments = call["function"]["arguments"].as_str().unwrap_or("{}");
        let arguments: Value = serde_json::from_str(raw_arguments).map_err(|e| {
            ProviderError::MalformedResponse(format!(
                "arguments for {} are not valid JSON: {}",
                name, e
            ))
        })?;
        tool_calls.push(ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        });
    }

    Ok((text, tool_calls))
}
