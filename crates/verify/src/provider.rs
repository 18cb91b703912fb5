//! Browser capability provider seam
//!
//! The executor only ever talks to these traits. `playwright` implements them
//! against a real browser and `fake` implements them in memory for tests.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::scenario::{Locator, Viewport};

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(format!("unknown browser: {}", other)),
        }
    }
}

/// Options for opening a browser session
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub browser: Browser,
    pub headless: bool,
    pub viewport: Viewport,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport: Viewport::default(),
        }
    }
}

/// Starts browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a browser and open one page in it
    async fn launch(&self, options: &LaunchOptions) -> ProviderResult<Box<dyn BrowserSession>>;
}

/// One launched browser with a single open page.
///
/// Every wait and action resolves only once the browser has finished it, so
/// callers can rely on strict ordering between calls.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> ProviderResult<()>;

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> ProviderResult<()>;

    async fn wait_for_text(&mut self, text: &str, timeout: Duration) -> ProviderResult<()>;

    async fn click(&mut self, target: &Locator, timeout: Duration) -> ProviderResult<()>;

    async fn fill(&mut self, selector: &str, value: &str, timeout: Duration) -> ProviderResult<()>;

    async fn title(&mut self) -> ProviderResult<String>;

    async fn content(&mut self) -> ProviderResult<String>;

    async fn is_visible(&mut self, selector: &str) -> ProviderResult<bool>;

    async fn screenshot(&mut self, path: &Path, full_page: bool) -> ProviderResult<()>;

    /// Close the browser. Called exactly once per session.
    async fn close(&mut self) -> ProviderResult<()>;

    /// Block until `locator` is present on the page
    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> ProviderResult<()> {
        match locator {
            Locator::Selector(s) => self.wait_for_selector(s, timeout).await,
            Locator::Text(t) => self.wait_for_text(t, timeout).await,
        }
    }
}
