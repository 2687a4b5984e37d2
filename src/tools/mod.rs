//! Tool registry and the built-in browser tools.
//!
//! A tool never fails across this boundary: problems are recorded on the
//! [`Response`] and come back as flagged text.

mod inspect;
mod page;

pub use inspect::{
    ConsoleMessagesTool, EvaluateTool, NetworkRequestsTool, ScreenshotTool, TabsTool,
};
pub use page::{
    ClickTool, HandleDialogTool, NavigateBackTool, NavigateTool, PressKeyTool, SnapshotTool,
    TypeTool, WaitForTool,
};

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::conversation::ToolDescriptor;
use crate::engine::Context;
use crate::response::{Response, ToolOutput};

#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn handle(&self, ctx: &Context, arguments: Value, response: &mut Response);
}

/// Deserializes tool arguments, recording a failure on the response.
pub(crate) fn parse_arguments<T: DeserializeOwned>(
    arguments: Value,
    response: &mut Response,
) -> Option<T> {
    // Providers send `null` for tools without parameters.
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    match serde_json::from_value(arguments) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            response.add_error(format!(
                "Invalid arguments for {}: {}",
                response.tool_name(),
                e
            ));
            None
        }
    }
}

/// Escapes a value for a single-quoted JavaScript string in generated code.
pub(crate) fn quote_js(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_browser_tools() -> Self {
        let mut registry = Self::new();
        registry.register(NavigateTool);
        registry.register(NavigateBackTool);
        registry.register(SnapshotTool);
        registry.register(ClickTool);
        registry.register(TypeTool);
        registry.register(PressKeyTool);
        registry.register(WaitForTool);
        registry.register(HandleDialogTool);
        registry.register(EvaluateTool);
        registry.register(ScreenshotTool);
        registry.register(ConsoleMessagesTool);
        registry.register(NetworkRequestsTool);
        registry.register(TabsTool);
        registry
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.push(Arc::new(tool));
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|t| t.descriptor().name == name)
            .cloned()
    }

    /// Runs one tool call end to end: handler, finish, serialize.
    ///
    /// The tab lock is held from the handler through snapshot capture, so
    /// concurrent calls against one context run one at a time.
    pub async fn execute(&self, ctx: &Context, name: &str, arguments: Value) -> ToolOutput {
        let mut response = Response::new(name);

        let Some(tool) = self.get(name) else {
            response.add_error(format!("Tool \"{}\" not found", name));
            return response.serialize(ctx.image_responses);
        };

        {
            let _tab = ctx.lock_tab().await;
            debug!(tool = name, "handling tool call");
            tool.handle(ctx, arguments, &mut response).await;
            response.finish(ctx).await;
        }

        let output = response.serialize(ctx.image_responses);
        info!(tool = name, is_error = output.is_error, "tool call finished");
        output
    }
}
