use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{ProviderDelegate, read_json, system_prompt};
use crate::config::{Config, DEFAULT_MAX_OUTPUT_TOKENS};
use crate::conversation::{
    Conversation, Message, ToolCall, ToolDescriptor, ToolResult, last_tool_calling_index,
};
use crate::error::ProviderError;

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Delegate for the Anthropic Messages API.
pub struct ClaudeDelegate {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeDelegate {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut delegate = Self::new(config.require_api_key()?, config.model.clone())
            .with_max_tokens(config.max_output_tokens);
        if let Some(base_url) = &config.base_url {
            delegate = delegate.with_base_url(base_url.clone());
        }
        Ok(delegate)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(&self, conversation: &Conversation) -> Value {
        let mut request = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system_prompt(conversation.is_one_shot()),
            "messages": to_claude_messages(conversation.messages()),
        });
        if !conversation.tools().is_empty() {
            request["tools"] = Value::Array(to_claude_tools(conversation.tools()));
        }
        request
    }
}

#[async_trait]
impl ProviderDelegate for ClaudeDelegate {
    fn name(&self) -> &str {
        "claude"
    }

    async fn make_api_call(
        &self,
        conversation: &mut Conversation,
    ) -> Result<Vec<ToolCall>, ProviderError> {
        let request = self.build_request(conversation);
        debug!(
            model = %self.model,
            messages = conversation.messages().len(),
            "sending Claude request"
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;
        let body = read_json(self.name(), response).await?;

        let (text, tool_calls) = parse_claude_response(&body)?;
        info!(tool_calls = tool_calls.len(), "Claude replied");
        conversation.push_assistant(text, tool_calls.clone());
        Ok(tool_calls)
    }
}

pub fn to_claude_tools(tools: &[ToolDescriptor]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })
        })
        .collect()
}

/// Converts the message log into Claude messages.
///
/// Claude wants every result for one assistant turn in a single user message.
/// Results are buffered and flushed once they cover every call ID of the most
/// recent tool-calling assistant message; partial coverage keeps buffering.
/// Anything still buffered at the end of the log is flushed as is.
pub fn to_claude_messages(messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    let mut pending: Vec<&ToolResult> = Vec::new();

    for (idx, message) in messages.iter().enumerate() {
        match message {
            Message::User { text } => out.push(json!({"role": "user", "content": text})),
            Message::Assistant { text, tool_calls } => {
                out.push(assistant_message(text, tool_calls))
            }
            Message::ToolResult(result) => {
                pending.push(result);
                if batch_complete(&messages[..idx], &pending) {
                    out.push(tool_result_batch(&pending));
                    pending.clear();
                }
            }
        }
    }

    if !pending.is_empty() {
        out.push(tool_result_batch(&pending));
    }
    out
}

fn batch_complete(preceding: &[Message], pending: &[&ToolResult]) -> bool {
    let Some(idx) = last_tool_calling_index(preceding) else {
        return false;
    };
    let Message::Assistant { tool_calls, .. } = &preceding[idx] else {
        return false;
    };
    let buffered: HashSet<&str> = pending.iter().map(|r| r.tool_call_id.as_str()).collect();
    tool_calls.iter().all(|call| buffered.contains(call.id.as_str()))
}

fn assistant_message(text: &str, tool_calls: &[ToolCall]) -> Value {
    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(json!({"type": "text", "text": text}));
    }
    for call in tool_calls {
        content.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.arguments,
        }));
    }
    if content.is_empty() {
        content.push(json!({"type": "text", "text": ""}));
    }
    json!({"role": "assistant", "content": content})
}

fn tool_result_batch(results: &[&ToolResult]) -> Value {
    let content: Vec<Value> = results
        .iter()
        .map(|result| {
            let mut block = json!({
                "type": "tool_result",
                "tool_use_id": result.tool_call_id,
                "content": result.content,
            });
            if result.is_error {
                block["is_error"] = json!(true);
            }
            block
        })
        .collect();
    json!({"role": "user", "content": content})
}

/// Splits a Claude response into its text and requested tool calls.
pub fn parse_claude_response(body: &Value) -> Result<(String, Vec<ToolCall>), ProviderError> {
    let content = body["content"].as_array().ok_or_else(|| {
        ProviderError::MalformedResponse(format!("missing content array: {}", body))
    })?;

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in content {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(text) = block["text"].as_str() {
                    text_parts.push(text.to_string());
                }
            }
            Some("tool_use") => tool_calls.push(parse_tool_use(block)?),
            _ => {}
        }
    }

    Ok((text_parts.join("\n"), tool_calls))
}

fn parse_tool_use(block: &Value) -> Result<ToolCall, ProviderError> {
    let id = block["id"].as_str().filter(|s| !s.is_empty());
    let name = block["name"].as_str().filter(|s| !s.is_empty());
    match (id, name) {
        (Some(id), Some(name)) => Ok(ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
        }),
        _ => Err(ProviderError::MalformedResponse(format!(
            "tool_use block without id or name: {}",
            block
        ))),
    }
}

/// Inverse of [`to_claude_messages`]: splits batched tool results back into
/// one [`Message::ToolResult`] per result, keeping log order.
pub fn claude_messages_to_conversation(
    messages: &[Value],
) -> Result<Vec<Message>, ProviderError> {
    let mut out = Vec::new();
    for message in messages {
        let role = message["role"].as_str().unwrap_or_default();
        let content = &message["content"];
        match role {
            "user" => {
                if let Some(text) = content.as_str() {
                    out.push(Message::User {
                        text: text.to_string(),
                    });
                    continue;
                }
                for block in content.as_array().into_iter().flatten() {
                    match block["type"].as_str() {
                        Some("tool_result") => out.push(Message::ToolResult(ToolResult {
                            tool_call_id: block["tool_use_id"]
                                .as_str()
                                .unwrap_or_default()
                                .to_string(),
                            content: flatten_tool_result_content(&block["content"]),
                            is_error: block["is_error"].as_bool().unwrap_or(false),
                        })),
                        Some("text") => out.push(Message::User {
                            text: block["text"].as_str().unwrap_or_default().to_string(),
                        }),
                        _ => {}
                    }
                }
            }
            "assistant" => {
                let (text, tool_calls) = parse_claude_response(message)?;
                out.push(Message::Assistant { text, tool_calls });
            }
            other => {
                return Err(ProviderError::MalformedResponse(format!(
                    "unexpected Claude message role '{}'",
                    other
                )));
            }
        }
    }
    Ok(out)
}

fn flatten_tool_result_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "browser_click".into(),
            arguments: json!({"ref": id}),
        }
    }

    fn result(id: &str) -> Message {
        Message::ToolResult(ToolResult {
            tool_call_id: id.into(),
            content: format!("clicked {}", id),
            is_error: false,
        })
    }

    fn batch_ids(message: &Value) -> Vec<String> {
        message["content"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["tool_use_id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn results_for_one_turn_are_batched_into_one_message() {
        let messages = vec![
            Message::User {
                text: "task".into(),
            },
            Message::Assistant {
                text: "clicking".into(),
                tool_calls: vec![call("a"), call("b")],
            },
            result("a"),
            result("b"),
        ];
        let claude = to_claude_messages(&messages);
        assert_eq!(claude.len(), 3);
        assert_eq!(claude[0], json!({"role": "user", "content": "task"}));
        assert_eq!(claude[1]["content"][0]["type"], "text");
        assert_eq!(claude[1]["content"][1]["type"], "tool_use");
        assert_eq!(claude[1]["content"][2]["id"], "b");
        assert_eq!(claude[2]["role"], "user");
        assert_eq!(batch_ids(&claude[2]), vec!["a", "b"]);
    }

    #[test]
    fn results_in_any_order_flush_on_full_coverage() {
        let messages = vec![
            Message::Assistant {
                text: String::new(),
                tool_calls: vec![call("a"), call("b")],
            },
            result("b"),
            result("a"),
            Message::Assistant {
                text: String::new(),
                tool_calls: vec![call("c")],
            },
            result("c"),
        ];
        let claude = to_claude_messages(&messages);
        assert_eq!(claude.len(), 4);
        assert_eq!(batch_ids(&claude[1]), vec!["b", "a"]);
        assert_eq!(batch_ids(&claude[3]), vec!["c"]);
    }

    #[test]
    fn partial_coverage_is_flushed_only_at_end() {
        let messages = vec![
            Message::Assistant {
                text: String::new(),
                tool_calls: vec![call("a"), call("b")],
            },
            result("a"),
        ];
        let claude = to_claude_messages(&messages);
        assert_eq!(claude.len(), 2);
        assert_eq!(batch_ids(&claude[1]), vec!["a"]);
    }

    #[test]
    fn error_results_are_marked() {
        let messages = vec![
            Message::Assistant {
                text: String::new(),
                tool_calls: vec![call("a")],
            },
            Message::ToolResult(ToolResult {
                tool_call_id: "a".into(),
                content: "Element not found".into(),
                is_error: true,
            }),
        ];
        let claude = to_claude_messages(&messages);
        assert_eq!(claude[1]["content"][0]["is_error"], true);
    }

    #[test]
    fn empty_assistant_turn_gets_placeholder_text() {
        let claude = to_claude_messages(&[Message::Assistant {
            text: String::new(),
            tool_calls: Vec::new(),
        }]);
        assert_eq!(claude[0]["content"], json!([{"type": "text", "text": ""}]));
    }

    #[test]
    fn round_trip_preserves_order_and_pairing() {
        let messages = vec![
            Message::User {
                text: "open the docs".into(),
            },
            Message::Assistant {
                text: "navigating".into(),
                tool_calls: vec![call("t1")],
            },
            result("t1"),
            Message::Assistant {
                text: String::new(),
                tool_calls: vec![call("t2"), call("t3"), call("t4")],
            },
            result("t2"),
            result("t3"),
            result("t4"),
            Message::Assistant {
                text: "done".into(),
                tool_calls: vec![ToolCall {
                    id: "t5".into(),
                    name: "done".into(),
                    arguments: json!({"result": "ok"}),
                }],
            },
            result("t5"),
        ];

        let claude = to_claude_messages(&messages);
        let batches: Vec<Vec<String>> = claude
            .iter()
            .filter(|m| m["content"][0]["type"] == "tool_result")
            .map(batch_ids)
            .collect();
        assert_eq!(
            batches,
            vec![vec!["t1"], vec!["t2", "t3", "t4"], vec!["t5"]]
        );

        let back = claude_messages_to_conversation(&claude).unwrap();
        assert_eq!(back, messages);
    }

    #[test]
    fn parses_text_and_tool_use_blocks() {
        let body = json!({
            "content": [
                {"type": "text", "text": "Let me click."},
                {"type": "tool_use", "id": "toolu_1", "name": "browser_click", "input": {"ref": "e3"}}
            ],
            "stop_reason": "tool_use"
        });
        let (text, calls) = parse_claude_response(&body).unwrap();
        assert_eq!(text, "Let me click.");
        assert_eq!(
            calls,
            vec![ToolCall {
                id: "toolu_1".into(),
                name: "browser_click".into(),
                arguments: json!({"ref": "e3"}),
            }]
        );
    }

    #[test]
    fn missing_content_is_malformed() {
        let err = parse_claude_response(&json!({"type": "error"})).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[test]
    fn tool_use_without_id_is_malformed() {
        let body = json!({"content": [{"type": "tool_use", "name": "browser_click", "input": {}}]});
        assert!(parse_claude_response(&body).is_err());
    }

    #[test]
    fn request_includes_done_tool_unless_one_shot() {
        let delegate = ClaudeDelegate::new("key", "model");
        let conversation = Conversation::new("task", Vec::new(), false);
        let request = delegate.build_request(&conversation);
        assert_eq!(request["tools"][0]["name"], "done");
        assert_eq!(request["max_tokens"], DEFAULT_MAX_OUTPUT_TOKENS);

        let conversation = Conversation::new("task", Vec::new(), true);
        let request = delegate.build_request(&conversation);
        assert!(request.get("tools").is_none());
    }
}
