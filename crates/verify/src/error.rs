//! Error types for UI verification runs

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Infrastructure errors: anything that stops a run from being attempted or
/// finished, as opposed to the application failing a step.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error(
        "Node.js not found. Install Node.js and run: npm i -D playwright && npx playwright install"
    )]
    DriverNotFound,

    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("Scenario '{0}' has no steps")]
    EmptyScenario(String),

    #[error("Invalid scenario '{name}': {reason}")]
    InvalidScenario { name: String, reason: String },

    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Application at {url} not reachable after {attempts} attempts")]
    AppNotReady { url: String, attempts: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type VerifyResult<T> = Result<T, VerifyError>;

/// Why a run ended in the Failed state. Every variant is fatal to the run.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    #[error("entry navigation to {url} failed: {reason}")]
    EntryNavigation { url: String, reason: String },

    #[error("step {step}: timed out after {timeout_ms} ms waiting for {condition}")]
    ConditionTimeout {
        step: usize,
        condition: String,
        timeout_ms: u64,
    },

    #[error("step {step}: {action} failed: {reason}")]
    ActionFailure {
        step: usize,
        action: String,
        reason: String,
    },

    #[error("assertion {index} failed: {predicate}")]
    AssertionFailure { index: usize, predicate: String },

    #[error("evidence capture to {path} failed: {reason}")]
    EvidenceCapture { path: String, reason: String },
}

impl RunFailure {
    /// Index of the step that failed, if the failure is tied to one
    pub fn step(&self) -> Option<usize> {
        match self {
            RunFailure::ConditionTimeout { step, .. } | RunFailure::ActionFailure { step, .. } => {
                Some(*step)
            }
            _ => None,
        }
    }
}

/// Errors surfaced by a browser capability provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Failed(String),

    #[error("browser session is closed")]
    Closed,

    /// The driver program itself is not installed
    #[error("browser driver not installed: {0}")]
    DriverNotFound(String),
}

impl From<ProviderError> for VerifyError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::DriverNotFound(_) => VerifyError::DriverNotFound,
            other => VerifyError::Launch(other.to_string()),
        }
    }
}
