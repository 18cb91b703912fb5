//! Runs one scenario inside one browser session
//!
//! The runner owns the session for the duration of the run and releases it
//! exactly once, whether the run completed or failed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::app::AppEndpoint;
use crate::error::{VerifyError, VerifyResult};
use crate::evidence::EvidenceRecorder;
use crate::executor::{Executor, RunResult, DEFAULT_STEP_TIMEOUT};
use crate::provider::{Browser, BrowserLauncher, LaunchOptions};
use crate::scenario::Scenario;

/// Configuration for the runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub app: AppEndpoint,
    pub browser: Browser,
    pub headless: bool,
    pub default_timeout: Duration,

    /// Poll the application for this long before launching the browser
    pub wait_for_app: Option<Duration>,

    /// Overrides the scenario's evidence screenshot path
    pub screenshot: Option<PathBuf>,

    /// Where to put a screenshot when the run fails
    pub failure_screenshot: Option<PathBuf>,

    /// Where to write the JSON run result
    pub results: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            app: AppEndpoint::default(),
            browser: Browser::Chromium,
            headless: true,
            default_timeout: DEFAULT_STEP_TIMEOUT,
            wait_for_app: None,
            screenshot: None,
            failure_screenshot: None,
            results: None,
        }
    }
}

/// Main scenario runner
pub struct Runner {
    config: RunnerConfig,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Run `scenario` with a browser from `launcher`.
    ///
    /// `Err` means the run could not happen at all; a run that happened and
    /// failed comes back as `Ok` with a failed outcome.
    pub async fn run(
        &self,
        scenario: &Scenario,
        launcher: &dyn BrowserLauncher,
    ) -> VerifyResult<RunResult> {
        scenario.validate()?;
        if self.config.default_timeout.is_zero() {
            return Err(VerifyError::InvalidConfig(
                "default step timeout must be greater than zero".to_string(),
            ));
        }

        if let Some(wait) = self.config.wait_for_app {
            self.config.app.wait_until_ready(wait).await?;
        }

        let options = LaunchOptions {
            browser: self.config.browser,
            headless: self.config.headless,
            viewport: scenario.viewport,
        };
        let mut session = launcher.launch(&options).await?;

        let executor = Executor::new(self.config.app.clone())
            .default_timeout(self.config.default_timeout)
            .failure_screenshot(self.config.failure_screenshot.clone());

        let mut recorder = EvidenceRecorder::new(&scenario.evidence);
        if let Some(path) = &self.config.screenshot {
            recorder = recorder.with_screenshot_path(path);
        }

        let result = executor.run(scenario, &recorder, session.as_mut()).await;

        if let Err(e) = session.close().await {
            warn!("Browser did not close cleanly: {}", e);
        }
        let result = result?;

        if let Some(path) = &self.config.results {
            self.write_result(&result, path)?;
        }

        Ok(result)
    }

    /// Write the run result to a JSON file
    pub fn write_result(&self, result: &RunResult, path: &Path) -> VerifyResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(result)?;
        std::fs::write(path, json)?;

        info!("Result written to: {}", path.display());
        Ok(())
    }
}
