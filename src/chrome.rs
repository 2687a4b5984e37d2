//! [`BrowserEngine`] backed by a real Chrome through `headless_chrome`.
//!
//! `headless_chrome` is blocking, so every call runs on the blocking pool.
//! Console output and dialogs are observed through a small instrumentation
//! script injected into each page; dialogs are recorded and auto-resolved
//! instead of blocking the page, and reported as modal state until a
//! `browser_handle_dialog` call clears them.

use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result, anyhow, bail};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::BrowserEngine;
use crate::types::{
    ConsoleMessage, DialogKind, ModalState, NetworkRequest, PageSnapshot, TabInfo,
};

/// Walks the visible DOM and prints one accessibility-style line per element.
/// Interactive elements get a `data-tw-ref` attribute matching their `[ref=eN]`.
const SNAPSHOT_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','SVG','LINK','META']);
  let id = 0;
  const lines = [];
  const seen = new Set();
  const clip = (s, n) => (s || '').replace(/\s+/g, ' ').trim().slice(0, n);

  function isVisible(el) {
    if (el.offsetParent === null && el.tagName !== 'BODY' && el.tagName !== 'HTML') return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';
  }

  function ref(el) {
    const r = 'e' + (id++);
    el.setAttribute('data-tw-ref', r);
    return '[ref=' + r + ']';
  }

  function describe(el, tag) {
    switch (tag) {
      case 'a': return 'link "' + clip(el.textContent, 80) + '" ' + ref(el);
      case 'button': return 'button "' + clip(el.textContent, 80) + '" ' + ref(el);
      case 'input': {
        const type = (el.type || 'text').toLowerCase();
        if (type === 'checkbox' || type === 'radio') {
          return type + ' "' + clip(el.name || el.id, 40) + '"' + (el.checked ? ' [checked]' : '') + ' ' + ref(el);
        }
        if (type === 'submit' || type === 'button') return 'button "' + clip(el.value, 80) + '" ' + ref(el);
        let d = 'textbox "' + clip(el.placeholder || el.name || el.getAttribute('aria-label'), 60) + '" ' + ref(el);
        if (el.value) d += ': ' + clip(el.value, 40);
        return d;
      }
      case 'textarea': return 'textbox "' + clip(el.placeholder || el.name, 60) + '" ' + ref(el);
      case 'select': {
        const opts = [...el.options].map(o => clip(o.text, 20)).join(' | ');
        return 'combobox [' + opts + '] ' + ref(el);
      }
    }
    if (/^h[1-6]$/.test(tag)) return 'heading "' + clip(el.textContent, 120) + '" [level=' + tag[1] + ']';
    return null;
  }

  function walk(node, depth) {
    if (depth > 20) return;
    for (const child of node.children) {
      if (SKIP.has(child.tagName)) continue;
      if (!isVisible(child)) continue;
      const tag = child.tagName.toLowerCase();
      const indent = '  '.repeat(Math.min(depth, 8));
      const desc = describe(child, tag);
      if (desc) {
        lines.push(indent + '- ' + desc);
        if (tag !== 'select') walk(child, depth + 1);
        continue;
      }
      if (child.children.length === 0) {
        const text = clip(child.textContent, 1000);
        if (text.length > 2 && !seen.has(text)) {
          seen.add(text);
          lines.push(indent + '- text: ' + text);
        }
      }
      walk(child, depth + 1);
    }
  }

  walk(document.body, 0);
  return lines.join('\n');
})()
"#;

/// Records console output and dialogs. Safe to inject more than once.
const INSTRUMENT_JS: &str = r#"
(() => {
  if (window.__tw) return true;
  window.__tw = { console: [], dialogs: [] };
  for (const level of ['log', 'info', 'warn', 'error', 'debug']) {
    const original = console[level].bind(console);
    console[level] = (...args) => {
      window.__tw.console.push({ level, text: args.map(a => {
        try { return typeof a === 'string' ? a : JSON.stringify(a); } catch (e) { return String(a); }
      }).join(' ') });
      original(...args);
    };
  }
  window.addEventListener('error', e => window.__tw.console.push({ level: 'error', text: String(e.message) }));
  window.alert = (message) => { window.__tw.dialogs.push({ dialog: 'alert', message: String(message ?? '') }); };
  window.confirm = (message) => { window.__tw.dialogs.push({ dialog: 'confirm', message: String(message ?? '') }); return false; };
  window.prompt = (message) => { window.__tw.dialogs.push({ dialog: 'prompt', message: String(message ?? '') }); return null; };
  return true;
})()
"#;

const NETWORK_JS: &str = r#"
JSON.stringify(performance.getEntriesByType('navigation').concat(performance.getEntriesByType('resource')).map(e => ({
  method: 'GET',
  url: e.name,
  status: e.responseStatus || null,
  resource_type: e.initiatorType || e.entryType
})))
"#;

const SETTLE: Duration = Duration::from_millis(500);

#[derive(Deserialize)]
struct RecordedDialog {
    dialog: String,
    message: String,
}

pub struct ChromeEngine {
    browser: Arc<Browser>,
    current: Mutex<Arc<Tab>>,
}

impl ChromeEngine {
    /// Attaches to a running Chrome when `attach_url` answers, otherwise
    /// launches one with a dedicated profile directory. Blocking.
    pub fn launch(config: &Config) -> Result<Self> {
        if let Some(url) = &config.attach_url {
            info!("attempting to attach to existing Chrome at {}", url);
            match Browser::connect(url.clone()) {
                Ok(browser) => {
                    let existing = {
                        let tabs = browser
                            .get_tabs()
                            .lock()
                            .map_err(|_| anyhow!("tab list lock poisoned"))?;
                        tabs.first().cloned()
                    };
                    let tab = match existing {
                        Some(tab) => tab,
                        None => browser.new_tab()?,
                    };
                    info!("attached to existing Chrome");
                    return Ok(Self::from_parts(browser, tab));
                }
                Err(e) => debug!("could not attach: {:#}", e),
            }
        }

        if let Some(profile) = &config.profile_dir {
            std::fs::create_dir_all(profile)
                .with_context(|| format!("failed to create profile dir {}", profile.display()))?;
        }

        let options = LaunchOptions {
            headless: config.headless,
            path: config.chrome_path.clone(),
            user_data_dir: config.profile_dir.clone(),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        info!(headless = config.headless, "launching Chrome");
        let browser = Browser::new(options).context("browser launch failed")?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");
        Ok(Self::from_parts(browser, tab))
    }

    fn from_parts(browser: Browser, tab: Arc<Tab>) -> Self {
        Self {
            browser: Arc::new(browser),
            current: Mutex::new(tab),
        }
    }

    fn current_tab(&self) -> Result<Arc<Tab>> {
        self.current
            .lock()
            .map(|tab| tab.clone())
            .map_err(|_| anyhow!("current tab lock poisoned"))
    }

    fn set_current(&self, tab: Arc<Tab>) -> Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow!("current tab lock poisoned"))?;
        *current = tab;
        Ok(())
    }

    fn all_tabs(browser: &Browser) -> Result<Vec<Arc<Tab>>> {
        let tabs = browser
            .get_tabs()
            .lock()
            .map_err(|_| anyhow!("tab list lock poisoned"))?;
        Ok(tabs.clone())
    }

    async fn with_tab<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Arc<Tab>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.current_tab()?;
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| anyhow!("browser task panicked: {}", e))?
    }

    async fn with_browser<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Browser) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let browser = self.browser.clone();
        tokio::task::spawn_blocking(move || f(&browser))
            .await
            .map_err(|e| anyhow!("browser task panicked: {}", e))?
    }
}

fn evaluate_string(tab: &Tab, expression: &str) -> Result<String> {
    let result = tab.evaluate(expression, false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default())
}

fn instrument(tab: &Tab) -> Result<()> {
    tab.evaluate(INSTRUMENT_JS, false)?;
    Ok(())
}

fn element_selector(element_ref: &str) -> String {
    format!("[data-tw-ref=\"{}\"]", element_ref.replace('"', ""))
}

fn read_console(tab: &Tab) -> Result<Vec<ConsoleMessage>> {
    instrument(tab)?;
    let raw = evaluate_string(tab, "JSON.stringify(window.__tw.console)")?;
    let messages: Vec<ConsoleMessage> = serde_json::from_str(&raw).unwrap_or_default();
    Ok(messages)
}

fn read_dialogs(tab: &Tab) -> Result<Vec<ModalState>> {
    instrument(tab)?;
    let raw = evaluate_string(tab, "JSON.stringify(window.__tw.dialogs)")?;
    let recorded: Vec<RecordedDialog> = serde_json::from_str(&raw).unwrap_or_default();
    Ok(recorded
        .into_iter()
        .map(|d| ModalState::Dialog {
            dialog: match d.dialog.as_str() {
                "confirm" => DialogKind::Confirm,
                "prompt" => DialogKind::Prompt,
                "beforeunload" => DialogKind::BeforeUnload,
                _ => DialogKind::Alert,
            },
            message: d.message,
        })
        .collect())
}

#[async_trait]
impl BrowserEngine for ChromeEngine {
    async fn navigate(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.with_tab(move |tab| {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            instrument(tab)
        })
        .await
    }

    async fn go_back(&self) -> Result<()> {
        self.with_tab(|tab| {
            tab.evaluate("history.back()", false)?;
            std::thread::sleep(SETTLE);
            tab.wait_until_navigated()?;
            instrument(tab)
        })
        .await
    }

    async fn capture_snapshot(&self) -> Result<PageSnapshot> {
        self.with_tab(|tab| {
            let aria_snapshot = evaluate_string(tab, SNAPSHOT_JS)?;
            Ok(PageSnapshot {
                url: tab.get_url(),
                title: tab.get_title().unwrap_or_else(|_| "untitled".into()),
                aria_snapshot,
                console_messages: read_console(tab)?,
                downloads: Vec::new(),
                modal_states: read_dialogs(tab)?,
            })
        })
        .await
    }

    async fn modal_states(&self) -> Result<Vec<ModalState>> {
        self.with_tab(|tab| read_dialogs(tab)).await
    }

    async fn tabs(&self) -> Result<Vec<TabInfo>> {
        let current = self.current_tab()?;
        self.with_browser(move |browser| {
            let tabs = Self::all_tabs(browser)?;
            Ok(tabs
                .iter()
                .enumerate()
                .map(|(index, tab)| TabInfo {
                    index,
                    title: tab.get_title().unwrap_or_default(),
                    url: tab.get_url(),
                    current: Arc::ptr_eq(tab, &current),
                })
                .collect())
        })
        .await
    }

    async fn new_tab(&self, url: Option<&str>) -> Result<()> {
        let url = url.map(str::to_string);
        let tab = self
            .with_browser(move |browser| {
                let tab = browser.new_tab()?;
                if let Some(url) = url {
                    tab.navigate_to(&url)?;
                    tab.wait_until_navigated()?;
                    instrument(&tab)?;
                }
                Ok(tab)
            })
            .await?;
        self.set_current(tab)
    }

    async fn select_tab(&self, index: usize) -> Result<()> {
        let tab = self
            .with_browser(move |browser| {
                let tabs = Self::all_tabs(browser)?;
                let Some(tab) = tabs.get(index).cloned() else {
                    bail!("no tab at index {} ({} open)", index, tabs.len());
                };
                tab.activate()?;
                Ok(tab)
            })
            .await?;
        self.set_current(tab)
    }

    async fn close_tab(&self, index: Option<usize>) -> Result<()> {
        let current = self.current_tab()?;
        let next = self
            .with_browser(move |browser| {
                let tabs = Self::all_tabs(browser)?;
                let target = match index {
                    Some(index) => tabs
                        .get(index)
                        .cloned()
                        .ok_or_else(|| anyhow!("no tab at index {}", index))?,
                    None => current.clone(),
                };
                target.close(true)?;
                if !Arc::ptr_eq(&target, &current) {
                    return Ok(current);
                }
                match tabs.into_iter().find(|t| !Arc::ptr_eq(t, &target)) {
                    Some(tab) => Ok(tab),
                    None => Ok(browser.new_tab()?),
                }
            })
            .await?;
        self.set_current(next)
    }

    async fn click(&self, element_ref: &str) -> Result<()> {
        let selector = element_selector(element_ref);
        self.with_tab(move |tab| {
            tab.find_element(&selector)
                .with_context(|| format!("element {} not found", selector))?
                .click()?;
            std::thread::sleep(SETTLE);
            Ok(())
        })
        .await
    }

    async fn type_text(&self, element_ref: &str, text: &str, submit: bool) -> Result<()> {
        let selector = element_selector(element_ref);
        let text = text.to_string();
        self.with_tab(move |tab| {
            let element = tab
                .find_element(&selector)
                .with_context(|| format!("element {} not found", selector))?;
            element.click()?;
            let js_selector = selector.replace('\'', "\\'");
            tab.evaluate(
                &format!("document.querySelector('{}').value = ''", js_selector),
                false,
            )?;
            tab.type_str(&text)?;
            if submit {
                tab.press_key("Enter")?;
                std::thread::sleep(SETTLE);
            }
            Ok(())
        })
        .await
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_tab(move |tab| {
            tab.press_key(&key)?;
            std::thread::sleep(SETTLE);
            Ok(())
        })
        .await
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let script = format!(
            "(async () => {{ const f = ({}); const v = typeof f === 'function' ? await f() : f; \
             return JSON.stringify(v === undefined ? null : v); }})()",
            expression
        );
        self.with_tab(move |tab| {
            let result = tab.evaluate(&script, true)?;
            let raw = result
                .value
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| "null".to_string());
            serde_json::from_str(&raw).context("evaluation result was not JSON")
        })
        .await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.with_tab(|tab| {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
        })
        .await
    }

    async fn console_messages(&self) -> Result<Vec<ConsoleMessage>> {
        self.with_tab(|tab| read_console(tab)).await
    }

    async fn network_requests(&self) -> Result<Vec<NetworkRequest>> {
        self.with_tab(|tab| {
            let raw = evaluate_string(tab, NETWORK_JS)?;
            let requests: Vec<NetworkRequest> =
                serde_json::from_str(&raw).context("unexpected network entry format")?;
            Ok(requests)
        })
        .await
    }

    async fn handle_dialog(&self, accept: bool, prompt_text: Option<&str>) -> Result<()> {
        if prompt_text.is_some() {
            warn!("prompt text ignored: dialogs are resolved when they open");
        }
        debug!(accept, "clearing recorded dialog");
        self.with_tab(|tab| {
            instrument(tab)?;
            tab.evaluate("window.__tw.dialogs.shift(); true", false)?;
            Ok(())
        })
        .await
    }

    async fn wait_for_text(&self, text: &str, timeout: Duration) -> Result<()> {
        let needle = serde_json::to_string(text)?;
        self.with_tab(move |tab| {
            let started = Instant::now();
            let check = format!("document.body && document.body.innerText.includes({})", needle);
            loop {
                let found = tab
                    .evaluate(&check, false)?
                    .value
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if found {
                    return Ok(());
                }
                if started.elapsed() >= timeout {
                    bail!("timed out after {:?}", timeout);
                }
                std::thread::sleep(Duration::from_millis(250));
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_targets_snapshot_ref() {
        assert_eq!(element_selector("e12"), "[data-tw-ref=\"e12\"]");
        assert_eq!(element_selector("e1\"]"), "[data-tw-ref=\"e1]\"]");
    }
}
