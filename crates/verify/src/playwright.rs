//! Playwright browser automation
//!
//! One Node.js process per session runs `driver.mjs` and keeps the browser and
//! page alive between calls. Requests and responses are single JSON lines.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::provider::{BrowserLauncher, BrowserSession, LaunchOptions, ProviderResult};
use crate::scenario::{Locator, Viewport};

const DRIVER: &str = include_str!("driver.mjs");

/// Extra time the driver gets past a Playwright-side timeout before the
/// request itself is abandoned
const RESPONSE_GRACE: Duration = Duration::from_secs(5);

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Node.js executable
    pub node: PathBuf,

    /// Directory where `import('playwright')` resolves
    pub project_dir: PathBuf,

    /// Time allowed for the browser to start
    pub launch_timeout: Duration,

    /// Time allowed for calls without their own timeout (title, content, ...)
    pub command_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node: PathBuf::from("node"),
            project_dir: PathBuf::from("."),
            launch_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum DriverCommand<'a> {
    Launch {
        browser: &'a str,
        headless: bool,
        viewport: Viewport,
    },
    Goto {
        url: &'a str,
    },
    WaitSelector {
        selector: &'a str,
        timeout_ms: u64,
    },
    WaitText {
        text: &'a str,
        timeout_ms: u64,
    },
    ClickSelector {
        selector: &'a str,
        timeout_ms: u64,
    },
    ClickText {
        text: &'a str,
        timeout_ms: u64,
    },
    Fill {
        selector: &'a str,
        value: &'a str,
        timeout_ms: u64,
    },
    Title,
    Content,
    Visible {
        selector: &'a str,
    },
    Screenshot {
        path: &'a str,
        full_page: bool,
    },
    Close,
}

#[derive(Debug, Serialize)]
struct DriverRequest<'a> {
    id: u64,
    #[serde(flatten)]
    command: DriverCommand<'a>,
}

#[derive(Debug, Deserialize)]
struct DriverResponse {
    id: Option<u64>,
    ok: bool,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    timeout: bool,
}

/// Launches Playwright-driven browsers
#[derive(Debug, Clone, Default)]
pub struct PlaywrightLauncher {
    config: PlaywrightConfig,
}

impl PlaywrightLauncher {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    /// Check that Node.js can be executed
    async fn check_node_installed(&self) -> ProviderResult<()> {
        let status = Command::new(&self.config.node)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(ProviderError::DriverNotFound(self.config.node.display().to_string())),
        }
    }

    fn spawn_driver(&self) -> ProviderResult<PlaywrightSession> {
        let mut child = Command::new(&self.config.node)
            .args(["--input-type=module", "-e", DRIVER])
            .current_dir(&self.config.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProviderError::Failed(format!(
                    "failed to spawn {}: {}",
                    self.config.node.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::Failed("failed to get driver stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Failed("failed to get driver stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "ui_verify::driver", "{}", line);
                }
            });
        }

        Ok(PlaywrightSession {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
            closed: false,
            command_timeout: self.config.command_timeout,
        })
    }
}

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    async fn launch(&self, options: &LaunchOptions) -> ProviderResult<Box<dyn BrowserSession>> {
        self.check_node_installed().await?;

        info!(
            "Launching {} ({})",
            options.browser.as_str(),
            if options.headless { "headless" } else { "headed" }
        );

        let mut session = self.spawn_driver()?;
        session
            .request(
                DriverCommand::Launch {
                    browser: options.browser.as_str(),
                    headless: options.headless,
                    viewport: options.viewport,
                },
                self.config.launch_timeout,
            )
            .await?;

        Ok(Box::new(session))
    }
}

/// A browser owned by one driver process. Dropping it kills the process.
pub struct PlaywrightSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    closed: bool,
    command_timeout: Duration,
}

impl PlaywrightSession {
    async fn request(
        &mut self,
        command: DriverCommand<'_>,
        deadline: Duration,
    ) -> ProviderResult<serde_json::Value> {
        if self.closed {
            return Err(ProviderError::Closed);
        }

        let id = self.next_id;
        self.next_id += 1;

        let mut line = serde_json::to_string(&DriverRequest { id, command })
            .map_err(|e| ProviderError::Failed(e.to_string()))?;
        line.push('\n');

        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ProviderError::Failed(format!("driver write failed: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ProviderError::Failed(format!("driver write failed: {}", e)))?;

        let response = timeout(deadline, self.read_response(id))
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "driver did not answer within {} ms",
                    deadline.as_millis()
                ))
            })??;

        if response.ok {
            return Ok(response.value);
        }
        let message = response.error.unwrap_or_else(|| "unknown driver error".to_string());
        if response.timeout {
            Err(ProviderError::Timeout(message))
        } else {
            Err(ProviderError::Failed(message))
        }
    }

    /// Read lines until the response for `id`. Answers to abandoned requests
    /// are discarded.
    async fn read_response(&mut self, id: u64) -> ProviderResult<DriverResponse> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|e| ProviderError::Failed(format!("driver read failed: {}", e)))?
                .ok_or_else(|| ProviderError::Failed("driver exited unexpectedly".to_string()))?;

            let response: DriverResponse = match serde_json::from_str(&line) {
                Ok(response) => response,
                Err(_) => {
                    debug!(target: "ui_verify::driver", "{}", line);
                    continue;
                }
            };

            match response.id {
                Some(got) if got == id => return Ok(response),
                None if !response.ok => {
                    return Err(ProviderError::Failed(
                        response.error.unwrap_or_else(|| "driver error".to_string()),
                    ))
                }
                other => debug!("Discarding stale driver response {:?}", other),
            }
        }
    }

    fn timed(step_timeout: Duration) -> Duration {
        step_timeout + RESPONSE_GRACE
    }
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    async fn navigate(&mut self, url: &str) -> ProviderResult<()> {
        let deadline = self.command_timeout;
        self.request(DriverCommand::Goto { url }, deadline).await?;
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> ProviderResult<()> {
        let command = DriverCommand::WaitSelector {
            selector,
            timeout_ms: timeout.as_millis() as u64,
        };
        self.request(command, Self::timed(timeout)).await?;
        Ok(())
    }

    async fn wait_for_text(&mut self, text: &str, timeout: Duration) -> ProviderResult<()> {
        let command = DriverCommand::WaitText {
            text,
            timeout_ms: timeout.as_millis() as u64,
        };
        self.request(command, Self::timed(timeout)).await?;
        Ok(())
    }

    async fn click(&mut self, target: &Locator, timeout: Duration) -> ProviderResult<()> {
        let timeout_ms = timeout.as_millis() as u64;
        let command = match target {
            Locator::Selector(selector) => DriverCommand::ClickSelector { selector, timeout_ms },
            Locator::Text(text) => DriverCommand::ClickText { text, timeout_ms },
        };
        self.request(command, Self::timed(timeout)).await?;
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str, timeout: Duration) -> ProviderResult<()> {
        let command = DriverCommand::Fill {
            selector,
            value,
            timeout_ms: timeout.as_millis() as u64,
        };
        self.request(command, Self::timed(timeout)).await?;
        Ok(())
    }

    async fn title(&mut self) -> ProviderResult<String> {
        let deadline = self.command_timeout;
        let value = self.request(DriverCommand::Title, deadline).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn content(&mut self) -> ProviderResult<String> {
        let deadline = self.command_timeout;
        let value = self.request(DriverCommand::Content, deadline).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn is_visible(&mut self, selector: &str) -> ProviderResult<bool> {
        let deadline = self.command_timeout;
        let value = self.request(DriverCommand::Visible { selector }, deadline).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn screenshot(&mut self, path: &Path, full_page: bool) -> ProviderResult<()> {
        // The driver runs in the Node project directory, so relative paths
        // must be anchored to ours first.
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| ProviderError::Failed(e.to_string()))?
                .join(path)
        };
        let path = path.to_string_lossy();
        let deadline = self.command_timeout;
        self.request(DriverCommand::Screenshot { path: &path, full_page }, deadline)
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> ProviderResult<()> {
        let deadline = self.command_timeout;
        let result = self.request(DriverCommand::Close, deadline).await;
        self.closed = true;

        match timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => debug!("Driver exited with {}", status),
            Ok(Err(e)) => warn!("Failed to reap driver: {}", e),
            Err(_) => {
                warn!("Driver did not exit after close, killing it");
                let _ = self.child.kill().await;
            }
        }

        result.map(|_| ())
    }
}
