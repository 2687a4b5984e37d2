//! Provider-independent model of a tool-calling conversation.
//!
//! The message log is append-only. Which tool results answer which calls is
//! never stored separately; it is derived from the log by looking back to
//! the most recent assistant message that requested tools.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const DONE_TOOL_NAME: &str = "done";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Synthetic tool the agent calls to report that the task is finished.
pub fn done_tool() -> ToolDescriptor {
    ToolDescriptor {
        name: DONE_TOOL_NAME.to_string(),
        description: "Call this tool when the task is complete, passing the final result."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": "string",
                    "description": "The result of the task"
                }
            },
            "required": ["result"]
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        text: String,
    },
    Assistant {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult(ToolResult),
}

/// Completion value of a `done` call, or `None` for any other tool.
pub fn done_result(call: &ToolCall) -> Option<String> {
    if call.name != DONE_TOOL_NAME {
        return None;
    }
    Some(
        call.arguments
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
    tools: Vec<ToolDescriptor>,
    one_shot: bool,
}

impl Conversation {
    /// Seeds a conversation with the task as its first user message. The
    /// `done` tool is appended unless the conversation is one-shot.
    pub fn new(task: &str, mut tools: Vec<ToolDescriptor>, one_shot: bool) -> Self {
        if !one_shot && !tools.iter().any(|t| t.name == DONE_TOOL_NAME) {
            tools.push(done_tool());
        }
        Self {
            messages: vec![Message::User {
                text: task.to_string(),
            }],
            tools,
            one_shot,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::User { text: text.into() });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>, tool_calls: Vec<ToolCall>) {
        self.messages.push(Message::Assistant {
            text: text.into(),
            tool_calls,
        });
    }

    pub fn push_tool_result(&mut self, result: ToolResult) {
        self.messages.push(Message::ToolResult(result));
    }

    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Assistant { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn tool_result_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m, Message::ToolResult(_)))
            .count()
    }

    /// IDs requested by the most recent assistant message with tool calls
    /// that have no result after it yet, in call order.
    pub fn pending_tool_call_ids(&self) -> Vec<String> {
        let Some(idx) = last_tool_calling_index(&self.messages) else {
            return Vec::new();
        };
        let answered: HashSet<&str> = self.messages[idx + 1..]
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult(r) => Some(r.tool_call_id.as_str()),
                _ => None,
            })
            .collect();
        match &self.messages[idx] {
            Message::Assistant { tool_calls, .. } => tool_calls
                .iter()
                .filter(|c| !answered.contains(c.id.as_str()))
                .map(|c| c.id.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create transcript {}", path.display()))?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)
            .with_context(|| format!("failed to write transcript {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open transcript {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let conversation = serde_json::from_reader(reader)
            .with_context(|| format!("failed to parse transcript {}", path.display()))?;
        Ok(conversation)
    }
}

/// Index of the last assistant message in `messages` that requested tools.
pub(crate) fn last_tool_calling_index(messages: &[Message]) -> Option<usize> {
    messages.iter().rposition(|m| {
        matches!(m, Message::Assistant { tool_calls, .. } if !tool_calls.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    fn result(id: &str) -> ToolResult {
        ToolResult {
            tool_call_id: id.into(),
            content: format!("result {}", id),
            is_error: false,
        }
    }

    #[test]
    fn done_tool_only_when_not_one_shot() {
        let conversation = Conversation::new("task", Vec::new(), false);
        assert_eq!(conversation.tools().len(), 1);
        assert_eq!(conversation.tools()[0].name, DONE_TOOL_NAME);

        let conversation = Conversation::new("task", Vec::new(), true);
        assert!(conversation.tools().is_empty());
        assert_eq!(
            conversation.messages(),
            &[Message::User {
                text: "task".into()
            }]
        );
    }

    #[test]
    fn done_result_extracts_declared_value() {
        let done = call("1", "done", json!({"result": "X"}));
        assert_eq!(done_result(&done), Some("X".to_string()));

        let other = call("2", "browser_click", json!({"result": "X"}));
        assert_eq!(done_result(&other), None);

        let bare = call("3", "done", json!({}));
        assert_eq!(done_result(&bare), Some(String::new()));
    }

    #[test]
    fn pending_ids_track_latest_tool_calling_turn() {
        let mut conversation = Conversation::new("task", Vec::new(), false);
        assert!(conversation.pending_tool_call_ids().is_empty());

        conversation.push_assistant(
            "",
            vec![
                call("a", "browser_click", json!({})),
                call("b", "browser_type", json!({})),
            ],
        );
        assert_eq!(conversation.pending_tool_call_ids(), vec!["a", "b"]);

        conversation.push_tool_result(result("b"));
        assert_eq!(conversation.pending_tool_call_ids(), vec!["a"]);

        conversation.push_tool_result(result("a"));
        assert!(conversation.pending_tool_call_ids().is_empty());

        conversation.push_assistant("thinking", Vec::new());
        assert!(conversation.pending_tool_call_ids().is_empty());
    }

    #[test]
    fn transcript_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.json");

        let mut conversation = Conversation::new("find the docs", Vec::new(), false);
        conversation.push_assistant("", vec![call("a", "browser_navigate", json!({"url": "x"}))]);
        conversation.push_tool_result(result("a"));
        conversation.save(&path).unwrap();

        let loaded = Conversation::load(&path).unwrap();
        assert_eq!(loaded, conversation);
    }

    #[test]
    fn message_serializes_with_role_tag() {
        let value = serde_json::to_value(Message::ToolResult(result("a"))).unwrap();
        assert_eq!(value["role"], "tool_result");
        assert_eq!(value["tool_call_id"], "a");
    }
}
