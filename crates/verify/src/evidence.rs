//! Evidence capture at the terminal step: screenshot plus final assertions

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::RunFailure;
use crate::provider::BrowserSession;
use crate::scenario::{Assertion, Evidence};

/// A screenshot written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedScreenshot {
    pub path: PathBuf,

    /// SHA256 of the file contents
    pub sha256: String,

    pub bytes: u64,
}

/// What the recorder confirmed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceReport {
    pub screenshot: Option<CapturedScreenshot>,

    /// Descriptions of the assertions that held
    pub assertions: Vec<String>,
}

/// Captures proof that the terminal step was reached
#[derive(Debug, Clone)]
pub struct EvidenceRecorder {
    screenshot: Option<PathBuf>,
    full_page: bool,
    assertions: Vec<Assertion>,
}

impl EvidenceRecorder {
    pub fn new(evidence: &Evidence) -> Self {
        Self {
            screenshot: evidence.screenshot.as_ref().map(PathBuf::from),
            full_page: evidence.full_page,
            assertions: evidence.assertions.clone(),
        }
    }

    /// Write the screenshot somewhere other than the scenario's path
    pub fn with_screenshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.screenshot = Some(path.into());
        self
    }

    /// Capture the screenshot, then check assertions in order.
    ///
    /// The screenshot is attempted before any assertion so a failing
    /// assertion still leaves evidence behind.
    pub async fn record(
        &self,
        session: &mut dyn BrowserSession,
    ) -> Result<EvidenceReport, RunFailure> {
        let mut report = EvidenceReport::default();

        let capture_error = match &self.screenshot {
            Some(path) => match capture(session, path, self.full_page).await {
                Ok(shot) => {
                    info!("Screenshot saved to {} ({} bytes)", shot.path.display(), shot.bytes);
                    report.screenshot = Some(shot);
                    None
                }
                Err(reason) => Some(RunFailure::EvidenceCapture {
                    path: path.display().to_string(),
                    reason,
                }),
            },
            None => None,
        };

        for (index, assertion) in self.assertions.iter().enumerate() {
            match evaluate(session, assertion).await {
                Ok(true) => {
                    debug!("Assertion {} held: {}", index, assertion);
                    report.assertions.push(assertion.to_string());
                }
                Ok(false) => {
                    if let Some(err) = &capture_error {
                        warn!("{}", err);
                    }
                    return Err(RunFailure::AssertionFailure {
                        index,
                        predicate: assertion.to_string(),
                    });
                }
                Err(reason) => {
                    if let Some(err) = &capture_error {
                        warn!("{}", err);
                    }
                    return Err(RunFailure::AssertionFailure {
                        index,
                        predicate: format!("{} (could not evaluate: {})", assertion, reason),
                    });
                }
            }
        }

        match capture_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

/// Take a screenshot to `path`, creating parent directories, and hash it
pub async fn capture(
    session: &mut dyn BrowserSession,
    path: &Path,
    full_page: bool,
) -> Result<CapturedScreenshot, String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }

    session
        .screenshot(path, full_page)
        .await
        .map_err(|e| e.to_string())?;

    let (sha256, bytes) = hash_file(path).map_err(|e| e.to_string())?;
    Ok(CapturedScreenshot { path: path.to_path_buf(), sha256, bytes })
}

async fn evaluate(session: &mut dyn BrowserSession, assertion: &Assertion) -> Result<bool, String> {
    let held = match assertion {
        Assertion::TitleContains(needle) => {
            session.title().await.map_err(|e| e.to_string())?.contains(needle.as_str())
        }
        Assertion::ContentContains(needle) => {
            session.content().await.map_err(|e| e.to_string())?.contains(needle.as_str())
        }
        Assertion::TitleOrContentContains(needle) => {
            session.title().await.map_err(|e| e.to_string())?.contains(needle.as_str())
                || session.content().await.map_err(|e| e.to_string())?.contains(needle.as_str())
        }
        Assertion::Visible(selector) => {
            session.is_visible(selector).await.map_err(|e| e.to_string())?
        }
    };
    Ok(held)
}

/// Hash a file using SHA256
fn hash_file(path: &Path) -> std::io::Result<(String, u64)> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok((hex::encode(hasher.finalize()), data.len() as u64))
}
