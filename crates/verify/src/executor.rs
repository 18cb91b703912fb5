//! Step executor: runs a scenario against one browser session
//!
//! ```text
//! Idle ──entry──▶ AwaitingStep(0) ──resolved──▶ PerformingAction(0) ──▶ AwaitingStep(1) ──▶ ...
//!                       │ timeout                     │ action error
//!                       ▼                             ▼
//!                   Failed(i)                     Failed(i)
//!
//! PerformingAction(last) ──evidence ok──▶ Completed
//! ```
//!
//! The first failure ends the run. Nothing is retried.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::app::AppEndpoint;
use crate::error::{ProviderError, RunFailure, VerifyError, VerifyResult};
use crate::evidence::{self, CapturedScreenshot, EvidenceRecorder, EvidenceReport};
use crate::provider::{BrowserSession, ProviderResult};
use crate::scenario::{Action, Scenario, Step};

/// Timeout for steps that do not set their own
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    AwaitingStep(usize),
    PerformingAction(usize),
    Completed,
    /// Carries the failing step, or `None` for entry navigation and evidence
    Failed(Option<usize>),
}

impl RunState {
    /// Whether `next` may follow this state in a scenario of `steps` steps
    pub fn can_transition_to(&self, next: RunState, steps: usize) -> bool {
        use RunState::*;
        match (*self, next) {
            (Idle, AwaitingStep(0)) => steps > 0,
            (Idle, Failed(None)) => true,
            (AwaitingStep(i), PerformingAction(j)) => i == j,
            (AwaitingStep(i), Failed(Some(j))) => i == j,
            (PerformingAction(i), AwaitingStep(j)) => j == i + 1 && j < steps,
            (PerformingAction(i), Completed) => i + 1 == steps,
            (PerformingAction(_), Failed(None)) => true,
            (PerformingAction(i), Failed(Some(j))) => i == j,
            _ => false,
        }
    }
}

/// Outcome of one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub condition: String,
    pub action: Option<String>,
    pub timeout_ms: u64,
    pub duration_ms: u64,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed {
        evidence: EvidenceReport,
    },
    Failed {
        failure: RunFailure,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure_screenshot: Option<CapturedScreenshot>,
    },
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub scenario: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepRecord>,
    pub final_state: RunState,
    pub outcome: RunOutcome,
}

/// The parts of a result that must not vary between runs of the same
/// scenario against equivalent application instances
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunShape {
    pub final_state: RunState,
    pub steps_attempted: usize,
    pub failure: Option<RunFailure>,
    pub screenshot: Option<PathBuf>,
    pub assertions: Vec<String>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match &self.outcome {
            RunOutcome::Failed { failure, .. } => Some(failure),
            RunOutcome::Completed { .. } => None,
        }
    }

    pub fn evidence(&self) -> Option<&EvidenceReport> {
        match &self.outcome {
            RunOutcome::Completed { evidence } => Some(evidence),
            RunOutcome::Failed { .. } => None,
        }
    }

    pub fn shape(&self) -> RunShape {
        let (screenshot, assertions) = match self.evidence() {
            Some(ev) => (
                ev.screenshot.as_ref().map(|s| s.path.clone()),
                ev.assertions.clone(),
            ),
            None => (None, Vec::new()),
        };
        RunShape {
            final_state: self.final_state,
            steps_attempted: self.steps.len(),
            failure: self.failure().cloned(),
            screenshot,
            assertions,
        }
    }
}

/// Tracks the state machine for one run
struct Progress {
    state: RunState,
    total: usize,
    steps: Vec<StepRecord>,
}

impl Progress {
    fn enter(&mut self, next: RunState) {
        let legal = self.state.can_transition_to(next, self.total);
        if !legal {
            error!("Illegal run state transition {:?} -> {:?}", self.state, next);
        }
        debug_assert!(legal);
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn record(
        &mut self,
        index: usize,
        step: &Step,
        step_timeout: Duration,
        started: Instant,
        success: bool,
    ) {
        self.steps.push(StepRecord {
            index,
            condition: step.wait.to_string(),
            action: step.action.as_ref().map(|a| a.to_string()),
            timeout_ms: step_timeout.as_millis() as u64,
            duration_ms: started.elapsed().as_millis() as u64,
            success,
        });
    }
}

/// Runs scenarios step by step in strict order
#[derive(Debug, Clone)]
pub struct Executor {
    app: AppEndpoint,
    default_timeout: Duration,
    failure_screenshot: Option<PathBuf>,
}

impl Executor {
    pub fn new(app: AppEndpoint) -> Self {
        Self {
            app,
            default_timeout: DEFAULT_STEP_TIMEOUT,
            failure_screenshot: None,
        }
    }

    pub fn default_timeout(mut self, default_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self
    }

    /// Best-effort full-page screenshot taken when a run fails
    pub fn failure_screenshot(mut self, path: Option<PathBuf>) -> Self {
        self.failure_screenshot = path;
        self
    }

    /// Run `scenario` to completion or to its first failure.
    ///
    /// `Err` means nothing was run: the scenario or the timeout settings are
    /// unusable. The session is borrowed, not consumed: releasing it is the
    /// caller's job so it happens on every path.
    pub async fn run(
        &self,
        scenario: &Scenario,
        recorder: &EvidenceRecorder,
        session: &mut dyn BrowserSession,
    ) -> VerifyResult<RunResult> {
        scenario.validate()?;
        if self.default_timeout.is_zero() {
            return Err(VerifyError::InvalidConfig(
                "default step timeout must be greater than zero".to_string(),
            ));
        }

        let started_at = Utc::now();
        let start = Instant::now();
        let mut progress = Progress {
            state: RunState::Idle,
            total: scenario.steps.len(),
            steps: Vec::new(),
        };

        info!("Running scenario '{}' ({} steps)", scenario.name, scenario.steps.len());

        let outcome = match self.drive(scenario, recorder, session, &mut progress).await {
            Ok(evidence) => {
                progress.enter(RunState::Completed);
                info!("✓ {} ({} ms)", scenario.name, start.elapsed().as_millis());
                RunOutcome::Completed { evidence }
            }
            Err(failure) => {
                progress.enter(RunState::Failed(failure.step()));
                error!("✗ {} - {}", scenario.name, failure);
                let failure_screenshot = self.capture_failure(session).await;
                RunOutcome::Failed { failure, failure_screenshot }
            }
        };

        Ok(RunResult {
            scenario: scenario.name.clone(),
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            steps: progress.steps,
            final_state: progress.state,
            outcome,
        })
    }

    async fn drive(
        &self,
        scenario: &Scenario,
        recorder: &EvidenceRecorder,
        session: &mut dyn BrowserSession,
        progress: &mut Progress,
    ) -> Result<EvidenceReport, RunFailure> {
        if let Some(entry) = &scenario.entry {
            let url = self.app.resolve(entry);
            info!("Opening {}", url);
            let entry_failure = |reason: String| RunFailure::EntryNavigation {
                url: url.clone(),
                reason,
            };
            match timeout(self.default_timeout, session.navigate(&url)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(entry_failure(e.to_string())),
                Err(_) => {
                    return Err(entry_failure(format!(
                        "did not load within {} ms",
                        self.default_timeout.as_millis()
                    )))
                }
            }
        }

        for (index, step) in scenario.steps.iter().enumerate() {
            progress.enter(RunState::AwaitingStep(index));
            let step_timeout = step.timeout(self.default_timeout);
            let started = Instant::now();

            debug!("Step {}: waiting for {} ({} ms)", index, step.wait, step_timeout.as_millis());

            // The provider gets the same budget, but the deadline is enforced
            // here too in case the provider never answers.
            let wait = session.wait_for(&step.wait, step_timeout);
            let resolved = match timeout(step_timeout, wait).await {
                Ok(Ok(())) => true,
                Ok(Err(ProviderError::Timeout(_))) | Err(_) => false,
                Ok(Err(e)) => {
                    warn!("Step {}: wait for {} aborted: {}", index, step.wait, e);
                    false
                }
            };
            if !resolved {
                progress.record(index, step, step_timeout, started, false);
                return Err(RunFailure::ConditionTimeout {
                    step: index,
                    condition: step.wait.to_string(),
                    timeout_ms: step_timeout.as_millis() as u64,
                });
            }

            progress.enter(RunState::PerformingAction(index));

            if let Some(action) = &step.action {
                debug!("Step {}: {}", index, action);
                let failure = |reason: String| RunFailure::ActionFailure {
                    step: index,
                    action: action.to_string(),
                    reason,
                };
                let perform = self.perform(session, action, step_timeout);
                let result = match timeout(step_timeout, perform).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(failure(e.to_string())),
                    Err(_) => Err(failure(format!(
                        "did not complete within {} ms",
                        step_timeout.as_millis()
                    ))),
                };
                if let Err(err) = result {
                    progress.record(index, step, step_timeout, started, false);
                    return Err(err);
                }
            }

            progress.record(index, step, step_timeout, started, true);
            info!("Step {} done: {}", index, step.wait);
        }

        recorder.record(session).await
    }

    async fn perform(
        &self,
        session: &mut dyn BrowserSession,
        action: &Action,
        step_timeout: Duration,
    ) -> ProviderResult<()> {
        match action {
            Action::Navigate { url } => session.navigate(&self.app.resolve(url)).await,
            Action::Fill { selector, value } => session.fill(selector, value, step_timeout).await,
            Action::Click { target } => session.click(target, step_timeout).await,
        }
    }

    async fn capture_failure(
        &self,
        session: &mut dyn BrowserSession,
    ) -> Option<CapturedScreenshot> {
        let path = self.failure_screenshot.as_ref()?;
        match timeout(self.default_timeout, evidence::capture(session, path, true)).await {
            Ok(Ok(shot)) => {
                info!("Failure screenshot saved to {}", shot.path.display());
                Some(shot)
            }
            Ok(Err(e)) => {
                warn!("Failure screenshot not captured: {}", e);
                None
            }
            Err(_) => {
                warn!("Failure screenshot timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Call, FakeBrowser};
    use crate::scenario::{Evidence, Locator, Viewport};
    use test_case::test_case;
    use RunState::{AwaitingStep, Completed, Failed, Idle, PerformingAction};

    fn scenario(entry: Option<&str>, steps: Vec<Step>) -> Scenario {
        Scenario {
            name: "unit".to_string(),
            description: String::new(),
            tags: vec![],
            entry: entry.map(String::from),
            viewport: Viewport::default(),
            steps,
            evidence: Evidence::default(),
        }
    }

    fn executor() -> Executor {
        Executor::new(AppEndpoint::new("http://app.test"))
    }

    #[test_case(Idle, AwaitingStep(0), 7, true ; "start")]
    #[test_case(Idle, AwaitingStep(0), 0, false ; "start without steps")]
    #[test_case(Idle, AwaitingStep(1), 7, false ; "start skips step")]
    #[test_case(Idle, Completed, 0, false ; "complete without steps")]
    #[test_case(AwaitingStep(2), PerformingAction(2), 7, true ; "resolve")]
    #[test_case(AwaitingStep(2), Failed(Some(2)), 7, true ; "timeout")]
    #[test_case(PerformingAction(2), AwaitingStep(3), 7, true ; "advance")]
    #[test_case(PerformingAction(2), AwaitingStep(4), 7, false ; "skip")]
    #[test_case(PerformingAction(6), AwaitingStep(7), 7, false ; "advance past last")]
    #[test_case(PerformingAction(1), AwaitingStep(0), 7, false ; "reorder")]
    #[test_case(PerformingAction(6), Completed, 7, true ; "complete")]
    #[test_case(PerformingAction(2), Completed, 7, false ; "complete from middle step")]
    #[test_case(AwaitingStep(6), Completed, 7, false ; "complete before action")]
    #[test_case(Completed, AwaitingStep(0), 7, false ; "completed is terminal")]
    #[test_case(Failed(Some(1)), AwaitingStep(2), 7, false ; "failed is terminal")]
    fn test_state_transitions(from: RunState, to: RunState, steps: usize, legal: bool) {
        assert_eq!(from.can_transition_to(to, steps), legal);
    }

    #[tokio::test]
    async fn test_empty_scenario_is_rejected_before_touching_the_browser() {
        let browser = FakeBrowser::new();
        let mut session = browser.session();
        let scenario = scenario(Some("/start"), vec![]);

        let err = executor()
            .run(&scenario, &EvidenceRecorder::new(&scenario.evidence), &mut session)
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::EmptyScenario(name) if name == "unit"));
        assert_eq!(browser.calls(), vec![Call::Launch]);
    }

    #[tokio::test]
    async fn test_zero_default_timeout_is_rejected() {
        let browser = FakeBrowser::new();
        let mut session = browser.session();
        let scenario = scenario(None, vec![Step::new(Locator::selector("h1"))]);

        let err = executor()
            .default_timeout(Duration::ZERO)
            .run(&scenario, &EvidenceRecorder::new(&scenario.evidence), &mut session)
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::InvalidConfig(_)));
        assert_eq!(browser.calls(), vec![Call::Launch]);
    }

    #[tokio::test]
    async fn test_steps_run_in_order_with_actions_between_waits() {
        let browser = FakeBrowser::new();
        let mut session = browser.session();
        let scenario = scenario(
            Some("/start"),
            vec![
                Step::new(Locator::text("Name")).then(Action::Fill {
                    selector: "input".to_string(),
                    value: "Jules".to_string(),
                }),
                Step::new(Locator::selector("button")).then(Action::Click {
                    target: Locator::selector("button"),
                }),
                Step::new(Locator::text("Done")).timeout_ms(5000),
            ],
        );

        let result = executor()
            .run(&scenario, &EvidenceRecorder::new(&scenario.evidence), &mut session)
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.final_state, RunState::Completed);
        assert_eq!(
            browser.calls(),
            vec![
                Call::Launch,
                Call::Navigate("http://app.test/start".to_string()),
                Call::Wait(Locator::text("Name"), DEFAULT_STEP_TIMEOUT),
                Call::Fill("input".to_string(), "Jules".to_string()),
                Call::Wait(Locator::selector("button"), DEFAULT_STEP_TIMEOUT),
                Call::Click(Locator::selector("button")),
                Call::Wait(Locator::text("Done"), Duration::from_millis(5000)),
            ]
        );
        assert_eq!(result.steps.len(), 3);
        assert!(result.steps.iter().all(|s| s.success));
        assert_eq!(result.steps[2].timeout_ms, 5000);
    }

    #[tokio::test]
    async fn test_provider_timeout_stops_run() {
        let browser = FakeBrowser::new().missing(Locator::text("second"));
        let mut session = browser.session();
        let scenario = scenario(
            None,
            vec![
                Step::new(Locator::text("first")),
                Step::new(Locator::text("second")).then(Action::Click {
                    target: Locator::text("go"),
                }),
                Step::new(Locator::text("third")),
            ],
        );

        let result = executor()
            .run(&scenario, &EvidenceRecorder::new(&scenario.evidence), &mut session)
            .await
            .unwrap();

        assert_eq!(result.final_state, RunState::Failed(Some(1)));
        assert_eq!(
            result.failure(),
            Some(&RunFailure::ConditionTimeout {
                step: 1,
                condition: r#"text "second""#.to_string(),
                timeout_ms: 30_000,
            })
        );
        let calls = browser.calls();
        assert!(!calls.contains(&Call::Click(Locator::text("go"))));
        assert!(!calls
            .iter()
            .any(|c| matches!(c, Call::Wait(l, _) if *l == Locator::text("third"))));
        assert_eq!(result.steps.len(), 2);
        assert!(!result.steps[1].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_provider_is_cut_off_at_step_timeout() {
        let browser = FakeBrowser::new().hanging(Locator::text("Your Schedule"));
        let mut session = browser.session();
        let scenario = scenario(
            None,
            vec![Step::new(Locator::text("Your Schedule")).timeout_ms(5000)],
        );

        let result = executor()
            .run(&scenario, &EvidenceRecorder::new(&scenario.evidence), &mut session)
            .await
            .unwrap();

        assert!(matches!(
            result.failure(),
            Some(RunFailure::ConditionTimeout { step: 0, timeout_ms: 5000, .. })
        ));
    }

    #[tokio::test]
    async fn test_action_failure_has_step_and_action() {
        let browser = FakeBrowser::new().broken_click(Locator::selector("#confirm"));
        let mut session = browser.session();
        let scenario = scenario(
            None,
            vec![
                Step::new(Locator::text("ready")).then(Action::Click {
                    target: Locator::selector("#confirm"),
                }),
                Step::new(Locator::text("after")),
            ],
        );

        let result = executor()
            .run(&scenario, &EvidenceRecorder::new(&scenario.evidence), &mut session)
            .await
            .unwrap();

        match result.failure() {
            Some(RunFailure::ActionFailure { step, action, reason }) => {
                assert_eq!(*step, 0);
                assert_eq!(action, r##"click selector "#confirm""##);
                assert!(reason.contains("not interactable"));
            }
            other => panic!("unexpected failure: {:?}", other),
        }
        assert_eq!(result.final_state, RunState::Failed(Some(0)));
        assert!(!browser
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Wait(l, _) if *l == Locator::text("after"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_action_is_cut_off_at_step_timeout() {
        let browser = FakeBrowser::new().hanging_click(Locator::text("Generate Schedule"));
        let mut session = browser.session();
        let scenario = scenario(
            None,
            vec![
                Step::new(Locator::text("How many people do you need"))
                    .then(Action::Click {
                        target: Locator::text("Generate Schedule"),
                    })
                    .timeout_ms(2000),
                Step::new(Locator::text("Your Schedule")),
            ],
        );

        let result = executor()
            .run(&scenario, &EvidenceRecorder::new(&scenario.evidence), &mut session)
            .await
            .unwrap();

        match result.failure() {
            Some(RunFailure::ActionFailure { step, action, reason }) => {
                assert_eq!(*step, 0);
                assert_eq!(action, r#"click text "Generate Schedule""#);
                assert_eq!(reason, "did not complete within 2000 ms");
            }
            other => panic!("unexpected failure: {:?}", other),
        }
        assert_eq!(result.final_state, RunState::Failed(Some(0)));
        assert!(!browser
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Wait(l, _) if *l == Locator::text("Your Schedule"))));
    }

    #[tokio::test]
    async fn test_navigate_action_resolves_against_base_url() {
        let browser = FakeBrowser::new();
        let mut session = browser.session();
        let scenario = scenario(
            None,
            vec![
                Step::new(Locator::selector("a.next")).then(Action::Navigate {
                    url: "/wishlist".to_string(),
                }),
                Step::new(Locator::selector("h1")),
            ],
        );

        let result = executor()
            .run(&scenario, &EvidenceRecorder::new(&scenario.evidence), &mut session)
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(
            browser.calls(),
            vec![
                Call::Launch,
                Call::Wait(Locator::selector("a.next"), DEFAULT_STEP_TIMEOUT),
                Call::Navigate("http://app.test/wishlist".to_string()),
                Call::Wait(Locator::selector("h1"), DEFAULT_STEP_TIMEOUT),
            ]
        );
        assert_eq!(result.steps[0].action.as_deref(), Some("navigate to /wishlist"));
    }

    #[tokio::test]
    async fn test_entry_navigation_failure() {
        let browser = FakeBrowser::new().broken_navigation("http://app.test/down");
        let mut session = browser.session();
        let scenario = scenario(Some("/down"), vec![Step::new(Locator::selector("h1"))]);

        let result = executor()
            .run(&scenario, &EvidenceRecorder::new(&scenario.evidence), &mut session)
            .await
            .unwrap();

        assert_eq!(result.final_state, RunState::Failed(None));
        assert!(matches!(
            result.failure(),
            Some(RunFailure::EntryNavigation { url, .. }) if url == "http://app.test/down"
        ));
        assert!(result.steps.is_empty());
    }

    #[tokio::test]
    async fn test_failure_screenshot_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failure.png");
        let browser = FakeBrowser::new().missing(Locator::selector("h1"));
        let mut session = browser.session();
        let scenario = scenario(None, vec![Step::new(Locator::selector("h1"))]);

        let result = executor()
            .failure_screenshot(Some(path.clone()))
            .run(&scenario, &EvidenceRecorder::new(&scenario.evidence), &mut session)
            .await
            .unwrap();

        match &result.outcome {
            RunOutcome::Failed { failure, failure_screenshot } => {
                assert_eq!(failure.step(), Some(0));
                assert_eq!(failure_screenshot.as_ref().map(|s| &s.path), Some(&path));
            }
            RunOutcome::Completed { .. } => panic!("run should fail"),
        }
    }

    #[tokio::test]
    async fn test_custom_default_timeout_applies() {
        let browser = FakeBrowser::new();
        let mut session = browser.session();
        let scenario = scenario(None, vec![Step::new(Locator::selector("h1"))]);

        executor()
            .default_timeout(Duration::from_secs(2))
            .run(&scenario, &EvidenceRecorder::new(&scenario.evidence), &mut session)
            .await
            .unwrap();

        assert!(browser
            .calls()
            .contains(&Call::Wait(Locator::selector("h1"), Duration::from_secs(2))));
    }
}
