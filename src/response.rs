//! Per-invocation response assembly.
//!
//! A [`Response`] is created for every tool call, filled by the tool handler,
//! finished once (which may capture a fresh page snapshot) and then consumed by
//! [`Response::serialize`]. Oversized output is never an error: snapshots are
//! cut back when captured, and the assembled text is cut back again as a last
//! resort before it leaves this module.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::budget::{self, MAX_RESPONSE_TOKENS, char_prefix, check_budget};
use crate::config::ImageResponses;
use crate::engine::Context;
use crate::types::{PageSnapshot, TabInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// Serialized outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolOutput {
    /// Text blocks joined with blank lines; images are left out.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Narrowing applied to the accessibility snapshot captured by `finish`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    pub max_elements: Option<usize>,
    pub element_types: Option<Vec<String>>,
    pub skip_long_text: bool,
}

const LONG_TEXT_CHARS: usize = 200;

impl SnapshotFilter {
    pub fn is_empty(&self) -> bool {
        self.max_elements.is_none() && self.element_types.is_none() && !self.skip_long_text
    }

    pub fn apply(&self, aria_snapshot: &str) -> String {
        let lines = aria_snapshot.lines().filter(|line| {
            if self.skip_long_text && line.chars().count() > LONG_TEXT_CHARS {
                return false;
            }
            match &self.element_types {
                Some(types) => element_role(line)
                    .map(|role| types.iter().any(|t| t.eq_ignore_ascii_case(role)))
                    .unwrap_or(false),
                None => true,
            }
        });
        match self.max_elements {
            Some(max) => lines.take(max).collect::<Vec<_>>().join("\n"),
            None => lines.collect::<Vec<_>>().join("\n"),
        }
    }
}

/// Role of a snapshot line such as `  - button "Submit" [ref=e3]`.
fn element_role(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("- ")?;
    rest.split(|c: char| c.is_whitespace() || c == ':')
        .next()
        .filter(|role| !role.is_empty())
}

pub const SNAPSHOT_TRUNCATION_WARNING: &str = "\
[Snapshot truncated: the accessibility snapshot exceeded the response budget.]
To get a complete view, call browser_snapshot again with narrower parameters:
- {\"maxElements\": 200} to cap the number of elements returned
- {\"elementTypes\": [\"button\", \"link\", \"textbox\"]} to keep only interactive element types
- {\"skipLongText\": true} to skip long text nodes";

pub const RESPONSE_TRUNCATION_NOTICE: &str = "\n\n\
[Response truncated: output exceeded the response token budget. \
Use pagination parameters (limit/offset) or narrower queries to retrieve the rest.]";

/// Builder for a single tool invocation's response.
pub struct Response {
    tool_name: String,
    result_lines: Vec<String>,
    code_lines: Vec<String>,
    images: Vec<Image>,
    include_snapshot: bool,
    include_tabs: bool,
    snapshot_filter: SnapshotFilter,
    snapshot: Option<PageSnapshot>,
    tabs: Vec<TabInfo>,
    is_error: bool,
}

impl Response {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            result_lines: Vec::new(),
            code_lines: Vec::new(),
            images: Vec::new(),
            include_snapshot: false,
            include_tabs: false,
            snapshot_filter: SnapshotFilter::default(),
            snapshot: None,
            tabs: Vec::new(),
            is_error: false,
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn add_result(&mut self, text: impl Into<String>) {
        self.result_lines.push(text.into());
    }

    /// Records a tool-domain error. The error flag is sticky.
    pub fn add_error(&mut self, text: impl Into<String>) {
        self.result_lines.push(text.into());
        self.is_error = true;
    }

    pub fn add_code(&mut self, line: impl Into<String>) {
        self.code_lines.push(line.into());
    }

    pub fn add_image(&mut self, content_type: impl Into<String>, data: Vec<u8>) {
        self.images.push(Image {
            content_type: content_type.into(),
            data,
        });
    }

    pub fn set_include_snapshot(&mut self) {
        self.include_snapshot = true;
    }

    pub fn set_include_tabs(&mut self) {
        self.include_tabs = true;
    }

    pub fn set_snapshot_filter(&mut self, filter: SnapshotFilter) {
        self.snapshot_filter = filter;
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn snapshot(&self) -> Option<&PageSnapshot> {
        self.snapshot.as_ref()
    }

    /// Stores the snapshot unless one was already stored.
    fn set_snapshot(&mut self, snapshot: PageSnapshot) {
        if self.snapshot.is_some() {
            warn!(tool = %self.tool_name, "page snapshot already set, ignoring second capture");
            return;
        }
        self.snapshot = Some(snapshot);
    }

    /// Captures tab list and page state requested by the handler.
    ///
    /// Snapshot capture races against a modal opening; a modal that is open
    /// already, or opens first, is reported instead of the page content.
    pub async fn finish(&mut self, ctx: &Context) {
        let engine = ctx.engine();

        // Multiple open tabs are listed even when no tool asked for them.
        match engine.tabs().await {
            Ok(tabs) => self.tabs = tabs,
            Err(e) => warn!(tool = %self.tool_name, "failed to list tabs: {:#}", e),
        }

        if !self.include_snapshot || self.snapshot.is_some() {
            return;
        }

        let open_modals = match engine.modal_states().await {
            Ok(modals) => modals,
            Err(e) => {
                warn!(tool = %self.tool_name, "failed to read modal state: {:#}", e);
                Vec::new()
            }
        };

        let captured = if !open_modals.is_empty() {
            Ok(PageSnapshot {
                modal_states: open_modals,
                ..PageSnapshot::default()
            })
        } else {
            tokio::select! {
                biased;
                modal = engine.wait_for_modal() => Ok(PageSnapshot {
                    modal_states: vec![modal],
                    ..PageSnapshot::default()
                }),
                snapshot = engine.capture_snapshot() => snapshot,
            }
        };

        match captured {
            Ok(mut snapshot) => {
                if !self.snapshot_filter.is_empty() {
                    snapshot.aria_snapshot = self.snapshot_filter.apply(&snapshot.aria_snapshot);
                }
                self.set_snapshot(truncate_snapshot(snapshot));
            }
            Err(e) => {
                warn!(tool = %self.tool_name, "failed to capture page snapshot: {:#}", e);
                self.add_result(format!("(page snapshot unavailable: {:#})", e));
            }
        }
    }

    fn render_text(&self) -> String {
        let mut sections: Vec<String> = Vec::new();

        if !self.result_lines.is_empty() {
            sections.push(format!("### Result\n{}", self.result_lines.join("\n")));
        }

        if !self.code_lines.is_empty() {
            sections.push(format!(
                "### Ran automation code\n```js\n{}\n```",
                self.code_lines.join("\n")
            ));
        }

        if self.tabs.len() > 1 || (self.include_tabs && !self.tabs.is_empty()) {
            let listing: Vec<String> = self.tabs.iter().map(TabInfo::render).collect();
            sections.push(format!("### Open tabs\n{}", listing.join("\n")));
        }

        if let Some(snapshot) = &self.snapshot {
            if !snapshot.modal_states.is_empty() {
                let modals: Vec<String> =
                    snapshot.modal_states.iter().map(|m| m.render()).collect();
                sections.push(format!("### Modal state\n{}", modals.join("\n")));
            } else {
                sections.push(render_page_state(snapshot));
            }
        }

        sections.join("\n\n")
    }

    /// Consumes the builder and produces the content blocks for the caller.
    pub fn serialize(self, image_responses: ImageResponses) -> ToolOutput {
        let text = truncate_response(self.render_text());

        let mut content = vec![ContentBlock::Text { text }];
        if image_responses == ImageResponses::Allow {
            content.extend(self.images.into_iter().map(|image| ContentBlock::Image {
                data: STANDARD.encode(&image.data),
                mime_type: image.content_type,
            }));
        }

        ToolOutput {
            content,
            is_error: self.is_error,
        }
    }
}

fn render_page_state(snapshot: &PageSnapshot) -> String {
    let mut lines = vec![
        "### Page state".to_string(),
        format!("- Page URL: {}", snapshot.url),
        format!("- Page Title: {}", snapshot.title),
    ];
    if !snapshot.console_messages.is_empty() {
        lines.push("- Console messages:".to_string());
        lines.extend(
            snapshot
                .console_messages
                .iter()
                .map(|m| format!("  - {}", m.render())),
        );
    }
    if !snapshot.downloads.is_empty() {
        lines.push("- Downloads:".to_string());
        lines.extend(snapshot.downloads.iter().map(|d| format!("  {}", d.render())));
    }
    lines.push(format!(
        "- Page Snapshot:\n```yaml\n{}\n```",
        snapshot.aria_snapshot
    ));
    lines.join("\n")
}

/// Cuts the accessibility text of an over-budget snapshot and appends the
/// remediation warning. Every other field passes through unchanged.
pub(crate) fn truncate_snapshot(snapshot: PageSnapshot) -> PageSnapshot {
    let check = check_budget(&snapshot.aria_snapshot);
    if !check.over_limit {
        return snapshot;
    }

    let limit = budget::snapshot_char_limit();
    debug!(
        estimated_tokens = check.estimated_tokens,
        limit_chars = limit,
        "truncating page snapshot"
    );
    let kept = char_prefix(&snapshot.aria_snapshot, limit);
    let aria_snapshot = format!("{}\n\n{}", kept, SNAPSHOT_TRUNCATION_WARNING);
    PageSnapshot {
        aria_snapshot,
        ..snapshot
    }
}

/// Last-resort cut applied to the fully assembled response text.
pub(crate) fn truncate_response(text: String) -> String {
    let check = check_budget(&text);
    if !check.over_limit {
        return text;
    }

    warn!(
        estimated_tokens = check.estimated_tokens,
        limit = MAX_RESPONSE_TOKENS,
        "response over budget, applying emergency truncation"
    );
    let kept = char_prefix(&text, budget::emergency_char_limit());
    let kept = match kept.rfind('\n') {
        Some(idx) if idx > 0 => &kept[..idx],
        _ => kept,
    };
    format!("{}{}", kept, RESPONSE_TRUNCATION_NOTICE)
}
