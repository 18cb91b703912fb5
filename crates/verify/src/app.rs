//! Application under test: where it lives and whether it is answering

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{VerifyError, VerifyResult};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3001";

/// Base URL of the running application. The harness never resets its state,
/// so every run assumes a freshly started instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEndpoint {
    base_url: String,
}

impl Default for AppEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl AppEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    /// Join a scenario URL onto the base. Absolute URLs pass through.
    pub fn resolve(&self, url: &str) -> String {
        if url.contains("://") || url.starts_with("about:") {
            url.to_string()
        } else if url.is_empty() {
            self.base_url.clone()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }

    /// Poll the base URL until it answers with any HTTP response
    pub async fn wait_until_ready(&self, timeout_duration: Duration) -> VerifyResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout_duration {
            attempts += 1;

            match client.get(&self.base_url).send().await {
                Ok(resp) => {
                    if !resp.status().is_success() {
                        warn!("{} answered {}", self.base_url, resp.status());
                    }
                    info!("Application is up at {}", self.base_url);
                    return Ok(());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for application at {}...", self.base_url);
                    }
                    // Connection refused is expected while the app is starting
                    if !e.is_connect() {
                        warn!("Readiness check error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(VerifyError::AppNotReady {
            url: self.base_url.clone(),
            attempts,
        })
    }
}
