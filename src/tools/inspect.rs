use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{Tool, parse_arguments, quote_js};
use crate::budget::{self, char_prefix, check_budget};
use crate::conversation::ToolDescriptor;
use crate::engine::Context;
use crate::paginate::{PageRequest, paginate};
use crate::response::Response;
use crate::types::{ConsoleMessage, NetworkRequest};

fn pagination_properties() -> Value {
    json!({
        "limit": {"type": "integer", "minimum": 1, "description": "Maximum number of items to return"},
        "offset": {"type": "integer", "minimum": 0, "description": "Number of items to skip"}
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateArgs {
    function: String,
    max_length: Option<usize>,
}

pub struct EvaluateTool;

#[async_trait]
impl Tool for EvaluateTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "browser_evaluate".into(),
            description: "Evaluate JavaScript expression on page".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "function": {"type": "string", "description": "() => { /* code */ } when no element is provided"},
                    "maxLength": {"type": "integer", "minimum": 1, "description": "Maximum characters of the result to return"}
                },
                "required": ["function"]
            }),
        }
    }

    async fn handle(&self, ctx: &Context, arguments: Value, response: &mut Response) {
        let Some(args) = parse_arguments::<EvaluateArgs>(arguments, response) else {
            return;
        };
        response.add_code(format!("await page.evaluate({});", quote_js(&args.function)));

        let value = match ctx.engine().evaluate(&args.function).await {
            Ok(value) => value,
            Err(e) => {
                response.add_error(format!("Evaluation failed: {:#}", e));
                return;
            }
        };
        let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        let total_chars = text.chars().count();

        // The budget is the hard ceiling, so it is checked before maxLength.
        let check = check_budget(&text);
        if check.over_limit {
            let limit = args
                .max_length
                .unwrap_or(usize::MAX)
                .min(budget::snapshot_char_limit());
            debug!(
                estimated_tokens = check.estimated_tokens,
                limit, "evaluate result over budget"
            );
            response.add_result(char_prefix(&text, limit).to_string());
            response.add_result(format!(
                "\n[Result truncated: ~{} tokens exceeds the {} token limit. Showing {} of {} characters; \
                 return a smaller value or pass a smaller maxLength.]",
                check.estimated_tokens,
                budget::MAX_RESPONSE_TOKENS,
                limit.min(total_chars),
                total_chars
            ));
        } else if let Some(max_length) = args.max_length.filter(|max| total_chars > *max) {
            response.add_result(char_prefix(&text, max_length).to_string());
            response.add_result(format!(
                "\n[Result truncated to maxLength={} of {} characters.]",
                max_length, total_chars
            ));
        } else {
            response.add_result(text);
        }
        response.set_include_snapshot();
    }
}

pub struct ScreenshotTool;

#[async_trait]
impl Tool for ScreenshotTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "browser_take_screenshot".into(),
            description: "Take a screenshot of the current page. You can't perform actions based on the screenshot, use browser_snapshot for actions.".into(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn handle(&self, ctx: &Context, _arguments: Value, response: &mut Response) {
        response.add_code("await page.screenshot({ type: 'png' });");
        match ctx.engine().screenshot().await {
            Ok(png) => {
                response.add_result(format!(
                    "Took a screenshot of the current page ({} bytes)",
                    png.len()
                ));
                response.add_image("image/png", png);
            }
            Err(e) => response.add_error(format!("Failed to take screenshot: {:#}", e)),
        }
    }
}

pub struct ConsoleMessagesTool;

#[async_trait]
impl Tool for ConsoleMessagesTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "browser_console_messages".into(),
            description: "Returns all console messages".into(),
            input_schema: json!({"type": "object", "properties": pagination_properties()}),
        }
    }

    async fn handle(&self, ctx: &Context, arguments: Value, response: &mut Response) {
        let Some(request) = parse_arguments::<PageRequest>(arguments, response) else {
            return;
        };
        match ctx.engine().console_messages().await {
            Ok(messages) => response.add_result(paginate(
                &messages,
                "console messages",
                ConsoleMessage::render,
                request,
            )),
            Err(e) => response.add_error(format!("Failed to read console messages: {:#}", e)),
        }
    }
}

pub struct NetworkRequestsTool;

#[async_trait]
impl Tool for NetworkRequestsTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "browser_network_requests".into(),
            description: "Returns all network requests since loading the page".into(),
            input_schema: json!({"type": "object", "properties": pagination_properties()}),
        }
    }

    async fn handle(&self, ctx: &Context, arguments: Value, response: &mut Response) {
        let Some(request) = parse_arguments::<PageRequest>(arguments, response) else {
            return;
        };
        match ctx.engine().network_requests().await {
            Ok(requests) => response.add_result(paginate(
                &requests,
                "network requests",
                NetworkRequest::render,
                request,
            )),
            Err(e) => response.add_error(format!("Failed to read network requests: {:#}", e)),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum TabAction {
    List,
    New,
    Select,
    Close,
}

#[derive(Deserialize)]
struct TabsArgs {
    action: TabAction,
    index: Option<usize>,
    url: Option<String>,
}

pub struct TabsTool;

#[async_trait]
impl Tool for TabsTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "browser_tabs".into(),
            description: "List, create, close, or select a browser tab.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["list", "new", "select", "close"]},
                    "index": {"type": "integer", "minimum": 0, "description": "Tab index, used for select and close"},
                    "url": {"type": "string", "description": "URL to open in the new tab"}
                },
                "required": ["action"]
            }),
        }
    }

    async fn handle(&self, ctx: &Context, arguments: Value, response: &mut Response) {
        let Some(args) = parse_arguments::<TabsArgs>(arguments, response) else {
            return;
        };
        let engine = ctx.engine();
        response.set_include_tabs();

        let outcome = match args.action {
            TabAction::List => return,
            TabAction::New => {
                response.add_code("await context.newPage();");
                engine.new_tab(args.url.as_deref()).await
            }
            TabAction::Select => {
                let Some(index) = args.index else {
                    response.add_error("Tab index is required to select a tab");
                    return;
                };
                response.add_code(format!("await context.pages()[{}].bringToFront();", index));
                engine.select_tab(index).await
            }
            TabAction::Close => {
                response.add_code("await page.close();");
                engine.close_tab(args.index).await
            }
        };

        match outcome {
            Ok(()) => response.set_include_snapshot(),
            Err(e) => response.add_error(format!("Tab operation failed: {:#}", e)),
        }
    }
}
