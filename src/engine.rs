//! Seam between the tool layer and the browser-automation engine.
//!
//! The engine owns page and tab state. Tools only talk to it through
//! [`BrowserEngine`], and every tool invocation holds the [`Context`] tab lock
//! for its whole duration, so at most one invocation touches a tab at a time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::ImageResponses;
use crate::types::{ConsoleMessage, ModalState, NetworkRequest, PageSnapshot, TabInfo};

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn go_back(&self) -> Result<()>;

    /// Full capture of the current tab: URL, title, accessibility text,
    /// console log, downloads and open modals.
    async fn capture_snapshot(&self) -> Result<PageSnapshot>;

    /// Modals currently open on the current tab.
    async fn modal_states(&self) -> Result<Vec<ModalState>>;

    /// Resolves when a modal opens. Engines that cannot observe modals
    /// asynchronously keep the default, which never resolves.
    async fn wait_for_modal(&self) -> ModalState {
        std::future::pending().await
    }

    async fn tabs(&self) -> Result<Vec<TabInfo>>;

    async fn new_tab(&self, url: Option<&str>) -> Result<()>;

    async fn select_tab(&self, index: usize) -> Result<()>;

    async fn close_tab(&self, index: Option<usize>) -> Result<()>;

    /// `element_ref` is a `ref` taken from the accessibility snapshot.
    async fn click(&self, element_ref: &str) -> Result<()>;

    async fn type_text(&self, element_ref: &str, text: &str, submit: bool) -> Result<()>;

    async fn press_key(&self, key: &str) -> Result<()>;

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;

    /// PNG bytes of the visible viewport.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn console_messages(&self) -> Result<Vec<ConsoleMessage>>;

    async fn network_requests(&self) -> Result<Vec<NetworkRequest>>;

    async fn handle_dialog(&self, accept: bool, prompt_text: Option<&str>) -> Result<()>;

    async fn wait_for_text(&self, text: &str, timeout: Duration) -> Result<()>;
}

/// Shared state handed to every tool invocation.
pub struct Context {
    engine: Arc<dyn BrowserEngine>,
    tab_lock: Mutex<()>,
    pub image_responses: ImageResponses,
}

impl Context {
    pub fn new(engine: Arc<dyn BrowserEngine>, image_responses: ImageResponses) -> Self {
        Self {
            engine,
            tab_lock: Mutex::new(()),
            image_responses,
        }
    }

    pub fn engine(&self) -> &dyn BrowserEngine {
        self.engine.as_ref()
    }

    /// Serializes tool execution against the current tab.
    pub async fn lock_tab(&self) -> MutexGuard<'_, ()> {
        self.tab_lock.lock().await
    }
}
