use serde_json::{Value, json};
use tabwright::conversation::Message;
use tabwright::provider::{
    ANTHROPIC_VERSION, ClaudeDelegate, OpenAiDelegate, ProviderDelegate,
    claude_messages_to_conversation,
};
use tabwright::{Conversation, ProviderError, ToolCall, ToolRegistry, ToolResult};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn conversation_with_two_results() -> Conversation {
    let mut conversation = Conversation::new(
        "sign in",
        ToolRegistry::with_browser_tools().descriptors(),
        false,
    );
    conversation.push_assistant(
        "Filling the form",
        vec![
            ToolCall {
                id: "toolu_1".into(),
                name: "browser_type".into(),
                arguments: json!({"element": "User", "ref": "e1", "text": "ada"}),
            },
            ToolCall {
                id: "toolu_2".into(),
                name: "browser_click".into(),
                arguments: json!({"element": "Go", "ref": "e2"}),
            },
        ],
    );
    for (id, is_error) in [("toolu_1", false), ("toolu_2", true)] {
        conversation.push_tool_result(ToolResult {
            tool_call_id: id.into(),
            content: format!("result for {}", id),
            is_error,
        });
    }
    conversation
}

async fn last_request_body(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap();
    requests.last().unwrap().body_json().unwrap()
}

#[tokio::test]
async fn claude_call_batches_results_and_appends_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", ANTHROPIC_VERSION))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Submitted"},
                {"type": "tool_use", "id": "toolu_3", "name": "done", "input": {"result": "signed in"}}
            ],
            "stop_reason": "tool_use"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let delegate = ClaudeDelegate::new("test-key", "claude-test").with_base_url(server.uri());
    let mut conversation = conversation_with_two_results();

    let calls = delegate.make_api_call(&mut conversation).await.unwrap();

    assert_eq!(calls.len(), 1);
    assert_eq!(delegate.check_done(&calls[0]), Some("signed in".to_string()));
    assert_eq!(conversation.last_assistant_text(), Some("Submitted"));
    assert_eq!(conversation.pending_tool_call_ids(), vec!["toolu_3"]);

    let body = last_request_body(&server).await;
    assert_eq!(body["model"], "claude-test");
    assert!(body["system"].as_str().unwrap().contains("`done`"));
    let tools = body["tools"].as_array().unwrap();
    assert!(tools.iter().any(|t| t["name"] == "done"));
    assert!(tools.iter().all(|t| t.get("input_schema").is_some()));

    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1]["content"][0]["text"], "Filling the form");
    assert_eq!(messages[1]["content"][2]["type"], "tool_use");
    let batch = messages[2]["content"].as_array().unwrap();
    assert_eq!(messages[2]["role"], "user");
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0]["tool_use_id"], "toolu_1");
    assert!(batch[0].get("is_error").is_none());
    assert_eq!(batch[1]["is_error"], true);

    // The batched wire messages split back into the original log.
    let restored = claude_messages_to_conversation(messages).unwrap();
    assert_eq!(restored, conversation_with_two_results().messages());
}

#[tokio::test]
async fn claude_api_error_keeps_status_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_json(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .mount(&server)
        .await;

    let delegate = ClaudeDelegate::new("test-key", "claude-test").with_base_url(server.uri());
    let mut conversation = Conversation::new("task", Vec::new(), false);

    let err = delegate.make_api_call(&mut conversation).await.unwrap_err();

    match err {
        ProviderError::Api { status, message } => {
            assert_eq!(status, 529);
            assert_eq!(message, "Overloaded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(conversation.messages().len(), 1);
}

#[tokio::test]
async fn claude_reply_without_content_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_1"})))
        .mount(&server)
        .await;

    let delegate = ClaudeDelegate::new("k", "m").with_base_url(server.uri());
    let mut conversation = Conversation::new("task", Vec::new(), true);

    let err = delegate.make_api_call(&mut conversation).await.unwrap_err();
    assert!(matches!(err, ProviderError::MalformedResponse(_)));
}

#[tokio::test]
async fn openai_call_sends_individual_tool_messages() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "browser_snapshot", "arguments": "{}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let delegate = OpenAiDelegate::new("sk-test", "gpt-test").with_base_url(server.uri());
    let mut conversation = conversation_with_two_results();

    let calls = delegate.make_api_call(&mut conversation).await.unwrap();

    assert_eq!(calls[0].name, "browser_snapshot");
    assert!(matches!(
        conversation.messages().last(),
        Some(Message::Assistant { tool_calls, .. }) if tool_calls.len() == 1
    ));

    let body = last_request_body(&server).await;
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "system");
    let tool_messages: Vec<&Value> = messages.iter().filter(|m| m["role"] == "tool").collect();
    assert_eq!(tool_messages.len(), 2);
    assert_eq!(tool_messages[1]["tool_call_id"], "toolu_2");
}
