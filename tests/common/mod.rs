#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use tabwright::config::ImageResponses;
use tabwright::types::{ConsoleMessage, ModalState, NetworkRequest, PageSnapshot, TabInfo};
use tabwright::{BrowserEngine, Context};
use tokio::sync::Notify;

pub struct FakeState {
    pub url: String,
    pub title: String,
    pub aria_snapshot: String,
    pub console: Vec<ConsoleMessage>,
    pub requests: Vec<NetworkRequest>,
    pub tabs: Vec<(String, String)>,
    pub current: usize,
    pub modals: Vec<ModalState>,
    pub pending_modal: Option<ModalState>,
    pub evaluate_result: Value,
    pub capture_delay: Duration,
    pub action_delay: Duration,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            url: "about:blank".into(),
            title: String::new(),
            aria_snapshot: "- button \"Submit\" [ref=e1]".into(),
            console: Vec::new(),
            requests: Vec::new(),
            tabs: vec![("".into(), "about:blank".into())],
            current: 0,
            modals: Vec::new(),
            pending_modal: None,
            evaluate_result: Value::Null,
            capture_delay: Duration::ZERO,
            action_delay: Duration::ZERO,
        }
    }
}

/// Scriptable in-memory browser.
#[derive(Default)]
pub struct FakeEngine {
    pub state: Mutex<FakeState>,
    pub calls: Mutex<Vec<String>>,
    modal_opened: Notify,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_state(f: impl FnOnce(&mut FakeState)) -> Arc<Self> {
        let engine = Self::default();
        f(&mut engine.state.lock().unwrap());
        Arc::new(engine)
    }

    pub fn context(self: &Arc<Self>) -> Context {
        Context::new(self.clone(), ImageResponses::Allow)
    }

    pub fn context_with(self: &Arc<Self>, image_responses: ImageResponses) -> Context {
        Context::new(self.clone(), image_responses)
    }

    /// Opens a modal while a snapshot capture may be in flight.
    pub fn open_modal(&self, modal: ModalState) {
        self.state.lock().unwrap().pending_modal = Some(modal);
        self.modal_opened.notify_one();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of actions that were in flight at once.
    pub fn max_concurrent_actions(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    async fn tracked_action(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let delay = self.state.lock().unwrap().action_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserEngine for FakeEngine {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.record(format!("navigate {}", url));
        if url.starts_with("bad://") {
            bail!("net::ERR_NAME_NOT_RESOLVED");
        }
        self.tracked_action().await;
        let mut state = self.state.lock().unwrap();
        state.url = url.to_string();
        state.title = format!("Title of {}", url);
        let current = state.current;
        state.tabs[current] = (state.title.clone(), url.to_string());
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        self.record("go_back");
        Ok(())
    }

    async fn capture_snapshot(&self) -> Result<PageSnapshot> {
        let delay = self.state.lock().unwrap().capture_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.record("capture_snapshot");
        let state = self.state.lock().unwrap();
        Ok(PageSnapshot {
            url: state.url.clone(),
            title: state.title.clone(),
            aria_snapshot: state.aria_snapshot.clone(),
            console_messages: state.console.clone(),
            downloads: Vec::new(),
            modal_states: state.modals.clone(),
        })
    }

    async fn modal_states(&self) -> Result<Vec<ModalState>> {
        Ok(self.state.lock().unwrap().modals.clone())
    }

    async fn wait_for_modal(&self) -> ModalState {
        loop {
            let notified = self.modal_opened.notified();
            let pending = self.state.lock().unwrap().pending_modal.take();
            if let Some(modal) = pending {
                return modal;
            }
            notified.await;
        }
    }

    async fn tabs(&self) -> Result<Vec<TabInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tabs
            .iter()
            .enumerate()
            .map(|(index, (title, url))| TabInfo {
                index,
                title: title.clone(),
                url: url.clone(),
                current: index == state.current,
            })
            .collect())
    }

    async fn new_tab(&self, url: Option<&str>) -> Result<()> {
        self.record("new_tab");
        let mut state = self.state.lock().unwrap();
        let url = url.unwrap_or("about:blank").to_string();
        state.tabs.push((String::new(), url));
        state.current = state.tabs.len() - 1;
        Ok(())
    }

    async fn select_tab(&self, index: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if index >= state.tabs.len() {
            bail!("no tab at index {}", index);
        }
        state.current = index;
        Ok(())
    }

    async fn close_tab(&self, index: Option<usize>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let index = index.unwrap_or(state.current);
        if index >= state.tabs.len() {
            bail!("no tab at index {}", index);
        }
        state.tabs.remove(index);
        state.current = 0;
        Ok(())
    }

    async fn click(&self, element_ref: &str) -> Result<()> {
        self.record(format!("click {}", element_ref));
        let known = self
            .state
            .lock()
            .unwrap()
            .aria_snapshot
            .contains(&format!("[ref={}]", element_ref));
        if !known {
            bail!("element {} not found", element_ref);
        }
        self.tracked_action().await;
        Ok(())
    }

    async fn type_text(&self, element_ref: &str, text: &str, submit: bool) -> Result<()> {
        self.record(format!("type {} {} {}", element_ref, text, submit));
        self.tracked_action().await;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.record(format!("press {}", key));
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.record(format!("evaluate {}", expression));
        Ok(self.state.lock().unwrap().evaluate_result.clone())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn console_messages(&self) -> Result<Vec<ConsoleMessage>> {
        Ok(self.state.lock().unwrap().console.clone())
    }

    async fn network_requests(&self) -> Result<Vec<NetworkRequest>> {
        Ok(self.state.lock().unwrap().requests.clone())
    }

    async fn handle_dialog(&self, accept: bool, _prompt_text: Option<&str>) -> Result<()> {
        self.record(format!("handle_dialog {}", accept));
        let mut state = self.state.lock().unwrap();
        if !state.modals.is_empty() {
            state.modals.remove(0);
        }
        Ok(())
    }

    async fn wait_for_text(&self, text: &str, _timeout: Duration) -> Result<()> {
        if self.state.lock().unwrap().aria_snapshot.contains(text) {
            Ok(())
        } else {
            bail!("timed out")
        }
    }
}

pub fn console(count: usize) -> Vec<ConsoleMessage> {
    (0..count)
        .map(|i| ConsoleMessage {
            level: "log".into(),
            text: format!("message {}", i),
        })
        .collect()
}
