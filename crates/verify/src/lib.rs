//! UI verification harness
//!
//! This crate drives a headless browser through a scripted scenario against a
//! running web application:
//! - Parses declarative YAML scenarios (wait for a condition, then act)
//! - Executes steps strictly in order, each with its own timeout
//! - Captures a screenshot and checks final assertions as evidence
//! - Talks to the browser through a provider trait, backed by Playwright
//!   in production and by an in-memory fake in tests
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ui-verify (Rust)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Runner                                                     │
//! │    ├── launch() -> Box<dyn BrowserSession>                  │
//! │    ├── Executor::run(scenario) -> RunResult                 │
//! │    │     └── EvidenceRecorder::record() (terminal step)     │
//! │    └── session.close()  (always, exactly once)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario (YAML)                                            │
//! │    ├── name, description, entry                             │
//! │    ├── steps: [Step]                                        │
//! │    │     ├── wait { selector | text }                       │
//! │    │     ├── action? navigate | fill | click                │
//! │    │     └── timeout_ms?                                    │
//! │    └── evidence { screenshot?, full_page, assertions }      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod app;
pub mod error;
pub mod evidence;
pub mod executor;
pub mod fake;
pub mod playwright;
pub mod provider;
pub mod runner;
pub mod scenario;

pub use error::{ProviderError, RunFailure, VerifyError, VerifyResult};
pub use executor::{Executor, RunOutcome, RunResult, RunState};
pub use runner::{Runner, RunnerConfig};
pub use scenario::{Action, Assertion, Locator, Scenario, Step};
