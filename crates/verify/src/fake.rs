//! In-memory browser for exercising the executor without a real browser
//!
//! Every condition resolves immediately unless marked missing (the provider
//! reports a timeout) or hanging (the call never returns, so only the
//! executor's own deadline ends it). All calls are recorded in order.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ProviderError;
use crate::provider::{BrowserLauncher, BrowserSession, LaunchOptions, ProviderResult};
use crate::scenario::Locator;

/// A recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Launch,
    Navigate(String),
    Wait(Locator, Duration),
    Click(Locator),
    Fill(String, String),
    Title,
    Content,
    Visible(String),
    Screenshot(PathBuf, bool),
    Close,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    missing: HashSet<Locator>,
    hanging: HashSet<Locator>,
    broken: HashSet<Locator>,
    hanging_clicks: HashSet<Locator>,
    broken_navigation: HashSet<String>,
    visible: HashSet<String>,
    title: String,
    content: String,
    launch_error: Option<String>,
    driver_missing: bool,
    screenshot_error: Option<String>,
    launched: usize,
    closed: usize,
    close_attempts: HashMap<usize, usize>,
}

/// Fake launcher. Clones share state, so a test keeps one handle for setup
/// and inspection and passes another to the runner.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits on `locator` report a provider timeout
    pub fn missing(self, locator: Locator) -> Self {
        self.state.lock().missing.insert(locator);
        self
    }

    /// Waits on `locator` never return
    pub fn hanging(self, locator: Locator) -> Self {
        self.state.lock().hanging.insert(locator);
        self
    }

    /// Clicks on `target` fail as not interactable
    pub fn broken_click(self, target: Locator) -> Self {
        self.state.lock().broken.insert(target);
        self
    }

    /// Clicks on `target` never return
    pub fn hanging_click(self, target: Locator) -> Self {
        self.state.lock().hanging_clicks.insert(target);
        self
    }

    /// Navigation to `url` fails
    pub fn broken_navigation(self, url: impl Into<String>) -> Self {
        self.state.lock().broken_navigation.insert(url.into());
        self
    }

    pub fn with_title(self, title: impl Into<String>) -> Self {
        self.state.lock().title = title.into();
        self
    }

    pub fn with_content(self, content: impl Into<String>) -> Self {
        self.state.lock().content = content.into();
        self
    }

    pub fn with_visible(self, selector: impl Into<String>) -> Self {
        self.state.lock().visible.insert(selector.into());
        self
    }

    pub fn failing_launch(self, reason: impl Into<String>) -> Self {
        self.state.lock().launch_error = Some(reason.into());
        self
    }

    /// Launch fails as if the driver program were not installed
    pub fn missing_driver(self) -> Self {
        self.state.lock().driver_missing = true;
        self
    }

    pub fn failing_screenshot(self, reason: impl Into<String>) -> Self {
        self.state.lock().screenshot_error = Some(reason.into());
        self
    }

    /// Every call made so far, across all sessions
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn launched(&self) -> usize {
        self.state.lock().launched
    }

    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }

    /// Sessions that saw `close` more than once
    pub fn double_closed(&self) -> usize {
        self.state.lock().close_attempts.values().filter(|n| **n > 1).count()
    }

    /// Open a session directly, bypassing the launcher trait
    pub fn session(&self) -> FakeSession {
        let mut state = self.state.lock();
        state.launched += 1;
        state.calls.push(Call::Launch);
        FakeSession {
            id: state.launched,
            state: Arc::clone(&self.state),
            closed: false,
        }
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn launch(&self, _options: &LaunchOptions) -> ProviderResult<Box<dyn BrowserSession>> {
        {
            let state = self.state.lock();
            if state.driver_missing {
                return Err(ProviderError::DriverNotFound("node".to_string()));
            }
            if let Some(reason) = state.launch_error.clone() {
                return Err(ProviderError::Failed(reason));
            }
        }
        Ok(Box::new(self.session()))
    }
}

pub struct FakeSession {
    id: usize,
    state: Arc<Mutex<FakeState>>,
    closed: bool,
}

impl FakeSession {
    fn record(&self, call: Call) -> ProviderResult<()> {
        self.state.lock().calls.push(call);
        if self.closed {
            return Err(ProviderError::Closed);
        }
        Ok(())
    }

    async fn wait(&mut self, locator: Locator, timeout: Duration) -> ProviderResult<()> {
        self.record(Call::Wait(locator.clone(), timeout))?;
        let (missing, hanging) = {
            let state = self.state.lock();
            (state.missing.contains(&locator), state.hanging.contains(&locator))
        };
        if hanging {
            std::future::pending::<()>().await;
        }
        if missing {
            return Err(ProviderError::Timeout(format!(
                "{} not found within {} ms",
                locator,
                timeout.as_millis()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> ProviderResult<()> {
        self.record(Call::Navigate(url.to_string()))?;
        if self.state.lock().broken_navigation.contains(url) {
            return Err(ProviderError::Failed(format!("net::ERR_CONNECTION_REFUSED at {}", url)));
        }
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> ProviderResult<()> {
        self.wait(Locator::selector(selector), timeout).await
    }

    async fn wait_for_text(&mut self, text: &str, timeout: Duration) -> ProviderResult<()> {
        self.wait(Locator::text(text), timeout).await
    }

    async fn click(&mut self, target: &Locator, _timeout: Duration) -> ProviderResult<()> {
        self.record(Call::Click(target.clone()))?;
        let (broken, hanging) = {
            let state = self.state.lock();
            (state.broken.contains(target), state.hanging_clicks.contains(target))
        };
        if hanging {
            std::future::pending::<()>().await;
        }
        if broken {
            return Err(ProviderError::Failed(format!("{} is not interactable", target)));
        }
        Ok(())
    }

    async fn fill(
        &mut self,
        selector: &str,
        value: &str,
        _timeout: Duration,
    ) -> ProviderResult<()> {
        self.record(Call::Fill(selector.to_string(), value.to_string()))
    }

    async fn title(&mut self) -> ProviderResult<String> {
        self.record(Call::Title)?;
        Ok(self.state.lock().title.clone())
    }

    async fn content(&mut self) -> ProviderResult<String> {
        self.record(Call::Content)?;
        Ok(self.state.lock().content.clone())
    }

    async fn is_visible(&mut self, selector: &str) -> ProviderResult<bool> {
        self.record(Call::Visible(selector.to_string()))?;
        Ok(self.state.lock().visible.contains(selector))
    }

    async fn screenshot(&mut self, path: &Path, full_page: bool) -> ProviderResult<()> {
        self.record(Call::Screenshot(path.to_path_buf(), full_page))?;
        if let Some(reason) = self.state.lock().screenshot_error.clone() {
            return Err(ProviderError::Failed(reason));
        }
        std::fs::write(path, b"\x89PNG fake screenshot")
            .map_err(|e| ProviderError::Failed(e.to_string()))
    }

    async fn close(&mut self) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Close);
        *state.close_attempts.entry(self.id).or_insert(0) += 1;
        if self.closed {
            return Err(ProviderError::Closed);
        }
        self.closed = true;
        state.closed += 1;
        Ok(())
    }
}
