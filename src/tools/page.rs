use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Tool, parse_arguments, quote_js};
use crate::conversation::ToolDescriptor;
use crate::engine::Context;
use crate::response::{Response, SnapshotFilter};

const MAX_WAIT: Duration = Duration::from_secs(30);

fn element_schema(extra: Value) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": {
            "element": {
                "type": "string",
                "description": "Human-readable element description used to obtain permission to interact with the element"
            },
            "ref": {
                "type": "string",
                "description": "Exact target element reference from the page snapshot"
            }
        },
        "required": ["element", "ref"]
    });
    if let (Some(props), Value::Object(extra)) = (schema["properties"].as_object_mut(), extra) {
        props.extend(extra);
    }
    schema
}

#[derive(Deserialize)]
struct NavigateArgs {
    url: String,
}

pub struct NavigateTool;

#[async_trait]
impl Tool for NavigateTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "browser_navigate".into(),
            description: "Navigate to a URL".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"url": {"type": "string", "description": "The URL to navigate to"}},
                "required": ["url"]
            }),
        }
    }

    async fn handle(&self, ctx: &Context, arguments: Value, response: &mut Response) {
        let Some(args) = parse_arguments::<NavigateArgs>(arguments, response) else {
            return;
        };
        response.add_code(format!("await page.goto({});", quote_js(&args.url)));
        match ctx.engine().navigate(&args.url).await {
            Ok(()) => response.set_include_snapshot(),
            Err(e) => response.add_error(format!("Failed to navigate to {}: {:#}", args.url, e)),
        }
    }
}

pub struct NavigateBackTool;

#[async_trait]
impl Tool for NavigateBackTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "browser_navigate_back".into(),
            description: "Go back to the previous page".into(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn handle(&self, ctx: &Context, _arguments: Value, response: &mut Response) {
        response.add_code("await page.goBack();");
        match ctx.engine().go_back().await {
            Ok(()) => response.set_include_snapshot(),
            Err(e) => response.add_error(format!("Failed to go back: {:#}", e)),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SnapshotArgs {
    max_elements: Option<usize>,
    element_types: Option<Vec<String>>,
    #[serde(default)]
    skip_long_text: bool,
}

pub struct SnapshotTool;

#[async_trait]
impl Tool for SnapshotTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "browser_snapshot".into(),
            description: "Capture accessibility snapshot of the current page, this is better than screenshot".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "maxElements": {"type": "integer", "minimum": 1, "description": "Maximum number of elements to include"},
                    "elementTypes": {"type": "array", "items": {"type": "string"}, "description": "Only include elements with these roles, e.g. button, link, textbox"},
                    "skipLongText": {"type": "boolean", "description": "Skip text nodes longer than 200 characters"}
                }
            }),
        }
    }

    async fn handle(&self, _ctx: &Context, arguments: Value, response: &mut Response) {
        let Some(args) = parse_arguments::<SnapshotArgs>(arguments, response) else {
            return;
        };
        response.set_snapshot_filter(SnapshotFilter {
            max_elements: args.max_elements,
            element_types: args.element_types,
            skip_long_text: args.skip_long_text,
        });
        response.set_include_snapshot();
    }
}

#[derive(Deserialize)]
struct ElementArgs {
    element: String,
    #[serde(rename = "ref")]
    element_ref: String,
}

pub struct ClickTool;

#[async_trait]
impl Tool for ClickTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "browser_click".into(),
            description: "Perform click on a web page".into(),
            input_schema: element_schema(json!({})),
        }
    }

    async fn handle(&self, ctx: &Context, arguments: Value, response: &mut Response) {
        let Some(args) = parse_arguments::<ElementArgs>(arguments, response) else {
            return;
        };
        response.add_code(format!(
            "await page.locator({}).click();",
            quote_js(&format!("aria-ref={}", args.element_ref))
        ));
        match ctx.engine().click(&args.element_ref).await {
            Ok(()) => response.set_include_snapshot(),
            Err(e) => response.add_error(format!("Failed to click {}: {:#}", args.element, e)),
        }
    }
}

#[derive(Deserialize)]
struct TypeArgs {
    element: String,
    #[serde(rename = "ref")]
    element_ref: String,
    text: String,
    #[serde(default)]
    submit: bool,
}

pub struct TypeTool;

#[async_trait]
impl Tool for TypeTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "browser_type".into(),
            description: "Type text into editable element".into(),
            input_schema: element_schema(json!({
                "text": {"type": "string", "description": "Text to type into the element"},
                "submit": {"type": "boolean", "description": "Whether to press Enter after typing"}
            })),
        }
    }

    async fn handle(&self, ctx: &Context, arguments: Value, response: &mut Response) {
        let Some(args) = parse_arguments::<TypeArgs>(arguments, response) else {
            return;
        };
        let locator = quote_js(&format!("aria-ref={}", args.element_ref));
        response.add_code(format!(
            "await page.locator({}).fill({});",
            locator,
            quote_js(&args.text)
        ));
        if args.submit {
            response.add_code(format!("await page.locator({}).press('Enter');", locator));
        }
        match ctx
            .engine()
            .type_text(&args.element_ref, &args.text, args.submit)
            .await
        {
            Ok(()) => response.set_include_snapshot(),
            Err(e) => response.add_error(format!("Failed to type into {}: {:#}", args.element, e)),
        }
    }
}

#[derive(Deserialize)]
struct PressKeyArgs {
    key: String,
}

pub struct PressKeyTool;

#[async_trait]
impl Tool for PressKeyTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "browser_press_key".into(),
            description: "Press a key on the keyboard".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"key": {"type": "string", "description": "Name of the key to press, such as `ArrowLeft` or `a`"}},
                "required": ["key"]
            }),
        }
    }

    async fn handle(&self, ctx: &Context, arguments: Value, response: &mut Response) {
        let Some(args) = parse_arguments::<PressKeyArgs>(arguments, response) else {
            return;
        };
        response.add_code(format!("await page.keyboard.press({});", quote_js(&args.key)));
        match ctx.engine().press_key(&args.key).await {
            Ok(()) => response.set_include_snapshot(),
            Err(e) => response.add_error(format!("Failed to press {}: {:#}", args.key, e)),
        }
    }
}

/// Seconds to a sleep duration, capped at [`MAX_WAIT`]. Never panics on
/// negative or huge inputs.
fn wait_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.max(0.0))
        .map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT))
}

#[derive(Deserialize)]
struct WaitForArgs {
    text: Option<String>,
    time: Option<f64>,
}

pub struct WaitForTool;

#[async_trait]
impl Tool for WaitForTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "browser_wait_for".into(),
            description: "Wait for text to appear or for a number of seconds to pass".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "The text to wait for"},
                    "time": {"type": "number", "description": "The time to wait in seconds"}
                }
            }),
        }
    }

    async fn handle(&self, ctx: &Context, arguments: Value, response: &mut Response) {
        let Some(args) = parse_arguments::<WaitForArgs>(arguments, response) else {
            return;
        };
        if args.text.is_none() && args.time.is_none() {
            response.add_error("Either text or time must be provided");
            return;
        }

        let wait = args.time.map(wait_duration);
        if let Some(wait) = wait {
            response.add_code(format!(
                "await new Promise(f => setTimeout(f, {}));",
                wait.as_millis()
            ));
            tokio::time::sleep(wait).await;
        }

        if let Some(text) = &args.text {
            response.add_code(format!(
                "await page.getByText({}).first().waitFor({{ state: 'visible' }});",
                quote_js(text)
            ));
            if let Err(e) = ctx.engine().wait_for_text(text, MAX_WAIT).await {
                response.add_error(format!("Text \"{}\" did not appear: {:#}", text, e));
                return;
            }
            response.add_result(format!("Waited for {}", text));
        } else {
            let waited = wait.unwrap_or_default().as_secs_f64();
            response.add_result(format!("Waited for {} seconds", waited));
        }
        response.set_include_snapshot();
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandleDialogArgs {
    accept: bool,
    prompt_text: Option<String>,
}

pub struct HandleDialogTool;

#[async_trait]
impl Tool for HandleDialogTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "browser_handle_dialog".into(),
            description: "Handle a dialog".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "accept": {"type": "boolean", "description": "Whether to accept the dialog"},
                    "promptText": {"type": "string", "description": "The text of the prompt in case of a prompt dialog"}
                },
                "required": ["accept"]
            }),
        }
    }

    async fn handle(&self, ctx: &Context, arguments: Value, response: &mut Response) {
        let Some(args) = parse_arguments::<HandleDialogArgs>(arguments, response) else {
            return;
        };
        match ctx.engine().modal_states().await {
            Ok(modals) if modals.is_empty() => {
                response.add_error("No dialog visible");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                response.add_error(format!("Failed to read dialog state: {:#}", e));
                return;
            }
        }

        match ctx
            .engine()
            .handle_dialog(args.accept, args.prompt_text.as_deref())
            .await
        {
            Ok(()) => {
                let verb = if args.accept { "Accepted" } else { "Dismissed" };
                response.add_result(format!("{} the dialog", verb));
                response.set_include_snapshot();
            }
            Err(e) => response.add_error(format!("Failed to handle dialog: {:#}", e)),
        }
    }
}
