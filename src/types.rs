use serde::{Deserialize, Serialize};

/// Point-in-time state of one browser tab, as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    /// Accessibility-tree-like text, one element per line with `[ref=eN]` ids.
    pub aria_snapshot: String,
    pub console_messages: Vec<ConsoleMessage>,
    pub downloads: Vec<Download>,
    pub modal_states: Vec<ModalState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub level: String,
    pub text: String,
}

impl ConsoleMessage {
    pub fn render(&self) -> String {
        format!("[{}] {}", self.level.to_uppercase(), self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    pub url: String,
    pub suggested_filename: String,
    pub output_path: String,
    pub finished: bool,
}

impl Download {
    pub fn render(&self) -> String {
        if self.finished {
            format!(
                "- Downloaded file {} to {}",
                self.suggested_filename, self.output_path
            )
        } else {
            format!("- Downloading file {} ...", self.suggested_filename)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogKind {
    Alert,
    Confirm,
    Prompt,
    BeforeUnload,
}

impl DialogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogKind::Alert => "alert",
            DialogKind::Confirm => "confirm",
            DialogKind::Prompt => "prompt",
            DialogKind::BeforeUnload => "beforeunload",
        }
    }
}

/// A modal that blocks further page interaction until a tool clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModalState {
    Dialog { dialog: DialogKind, message: String },
}

impl ModalState {
    pub fn clearing_tool(&self) -> &'static str {
        match self {
            ModalState::Dialog { .. } => "browser_handle_dialog",
        }
    }

    pub fn render(&self) -> String {
        let description = match self {
            ModalState::Dialog { dialog, message } => {
                format!("\"{}\" dialog with message \"{}\"", dialog.as_str(), message)
            }
        };
        format!(
            "- [{}]: can be handled by the \"{}\" tool",
            description,
            self.clearing_tool()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub index: usize,
    pub title: String,
    pub url: String,
    pub current: bool,
}

impl TabInfo {
    pub fn render(&self) -> String {
        let marker = if self.current { " (current)" } else { "" };
        format!("- {}:{} [{}] ({})", self.index, marker, self.title, self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    pub resource_type: String,
}

impl NetworkRequest {
    pub fn render(&self) -> String {
        match self.status {
            Some(status) => format!(
                "[{}] {} => [{}] ({})",
                self.method, self.url, status, self.resource_type
            ),
            None => format!("[{}] {} ({})", self.method, self.url, self.resource_type),
        }
    }
}
