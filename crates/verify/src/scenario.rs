//! Declarative YAML scenario definitions
//!
//! A scenario is an ordered list of steps. Each step names one condition to
//! wait for, at most one action to perform once the condition holds, and an
//! optional timeout that overrides the process-wide default.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{VerifyError, VerifyResult};

/// Scenarios compiled into the binary, addressable by name
pub const BUNDLED: &[(&str, &str)] = &[
    ("scheduler", include_str!("../scenarios/scheduler.yaml")),
    ("wishlist", include_str!("../scenarios/wishlist.yaml")),
];

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// URL opened before the first step, relative to the base URL
    #[serde(default)]
    pub entry: Option<String>,

    /// Viewport size for the browser
    #[serde(default)]
    pub viewport: Viewport,

    /// Steps to execute in order
    pub steps: Vec<Step>,

    /// What to capture once the last step resolves
    #[serde(default)]
    pub evidence: Evidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport { width: 1280, height: 720 }
    }
}

/// A single step: wait, then optionally act
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub wait: Locator,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Step {
    pub fn new(wait: Locator) -> Self {
        Step { wait, action: None, timeout_ms: None }
    }

    pub fn then(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Effective timeout for this step
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }
}

/// Something on the page: a structural selector or a visible text substring.
///
/// Written in YAML as a one-key map, `{ selector: "h1" }` or `{ text: "Next" }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "LocatorSpec", into = "LocatorSpec")]
pub enum Locator {
    Selector(String),
    Text(String),
}

impl Locator {
    pub fn selector(s: impl Into<String>) -> Self {
        Locator::Selector(s.into())
    }

    pub fn text(s: impl Into<String>) -> Self {
        Locator::Text(s.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Selector(s) => write!(f, "selector {:?}", s),
            Locator::Text(t) => write!(f, "text {:?}", t),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocatorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

impl TryFrom<LocatorSpec> for Locator {
    type Error = String;

    fn try_from(spec: LocatorSpec) -> Result<Self, Self::Error> {
        match (spec.selector, spec.text) {
            (Some(s), None) if !s.trim().is_empty() => Ok(Locator::Selector(s)),
            (None, Some(t)) if !t.trim().is_empty() => Ok(Locator::Text(t)),
            (Some(_), Some(_)) => Err("use either `selector` or `text`, not both".to_string()),
            (None, None) => Err("expected `selector` or `text`".to_string()),
            _ => Err("locator must not be empty".to_string()),
        }
    }
}

impl From<Locator> for LocatorSpec {
    fn from(locator: Locator) -> Self {
        match locator {
            Locator::Selector(s) => LocatorSpec { selector: Some(s), text: None },
            Locator::Text(t) => LocatorSpec { selector: None, text: Some(t) },
        }
    }
}

/// A page mutation performed after a step's condition resolves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ActionSpec", into = "ActionSpec")]
pub enum Action {
    Navigate { url: String },
    Fill { selector: String, value: String },
    Click { target: Locator },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Navigate { url } => write!(f, "navigate to {}", url),
            Action::Fill { selector, value } => write!(f, "fill {:?} with {:?}", selector, value),
            Action::Click { target } => write!(f, "click {}", target),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FillSpec {
    selector: String,
    value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    navigate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fill: Option<FillSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    click: Option<Locator>,
}

impl TryFrom<ActionSpec> for Action {
    type Error = String;

    fn try_from(spec: ActionSpec) -> Result<Self, Self::Error> {
        match (spec.navigate, spec.fill, spec.click) {
            (Some(url), None, None) => Ok(Action::Navigate { url }),
            (None, Some(fill), None) => {
                if fill.selector.trim().is_empty() {
                    return Err("fill selector must not be empty".to_string());
                }
                Ok(Action::Fill { selector: fill.selector, value: fill.value })
            }
            (None, None, Some(target)) => Ok(Action::Click { target }),
            (None, None, None) => Err("expected one of `navigate`, `fill`, `click`".to_string()),
            _ => Err("a step takes at most one action".to_string()),
        }
    }
}

impl From<Action> for ActionSpec {
    fn from(action: Action) -> Self {
        let mut spec = ActionSpec::default();
        match action {
            Action::Navigate { url } => spec.navigate = Some(url),
            Action::Fill { selector, value } => spec.fill = Some(FillSpec { selector, value }),
            Action::Click { target } => spec.click = Some(target),
        }
        spec
    }
}

/// Proof captured at the terminal step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// Where to write the screenshot (overwritten every run)
    #[serde(default)]
    pub screenshot: Option<String>,

    #[serde(default = "default_full_page")]
    pub full_page: bool,

    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

impl Default for Evidence {
    fn default() -> Self {
        Evidence { screenshot: None, full_page: default_full_page(), assertions: Vec::new() }
    }
}

fn default_full_page() -> bool {
    true
}

/// A predicate over the final page state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AssertionSpec", into = "AssertionSpec")]
pub enum Assertion {
    TitleContains(String),
    ContentContains(String),
    TitleOrContentContains(String),
    Visible(String),
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assertion::TitleContains(s) => write!(f, "title contains {:?}", s),
            Assertion::ContentContains(s) => write!(f, "content contains {:?}", s),
            Assertion::TitleOrContentContains(s) => write!(f, "title or content contains {:?}", s),
            Assertion::Visible(sel) => write!(f, "element {:?} is visible", sel),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct AssertionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title_or_content_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    visible: Option<String>,
}

impl TryFrom<AssertionSpec> for Assertion {
    type Error = String;

    fn try_from(spec: AssertionSpec) -> Result<Self, Self::Error> {
        let mut found = Vec::with_capacity(1);
        if let Some(s) = spec.title_contains {
            found.push(Assertion::TitleContains(s));
        }
        if let Some(s) = spec.content_contains {
            found.push(Assertion::ContentContains(s));
        }
        if let Some(s) = spec.title_or_content_contains {
            found.push(Assertion::TitleOrContentContains(s));
        }
        if let Some(s) = spec.visible {
            found.push(Assertion::Visible(s));
        }
        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err("expected an assertion such as `title_contains` or `visible`".to_string()),
            _ => Err("write one predicate per assertion entry".to_string()),
        }
    }
}

impl From<Assertion> for AssertionSpec {
    fn from(assertion: Assertion) -> Self {
        let mut spec = AssertionSpec::default();
        match assertion {
            Assertion::TitleContains(s) => spec.title_contains = Some(s),
            Assertion::ContentContains(s) => spec.content_contains = Some(s),
            Assertion::TitleOrContentContains(s) => spec.title_or_content_contains = Some(s),
            Assertion::Visible(s) => spec.visible = Some(s),
        }
        spec
    }
}

impl Scenario {
    /// Parse and validate a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> VerifyResult<Self> {
        let scenario: Scenario = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> VerifyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let scenario: Scenario = serde_yaml::from_str(&content)
            .map_err(|e| VerifyError::ScenarioParse(format!("{}: {}", path.display(), e)))?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Look up a scenario compiled into the binary
    pub fn bundled(name: &str) -> VerifyResult<Self> {
        let (_, yaml) = BUNDLED
            .iter()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| VerifyError::ScenarioNotFound(name.to_string()))?;
        Self::from_yaml(yaml)
    }

    /// Resolve a scenario argument: an existing file path, or a bundled name
    pub fn resolve(source: &str) -> VerifyResult<Self> {
        let path = Path::new(source);
        if path.is_file() {
            return Self::from_file(path);
        }
        if is_yaml(path) {
            return Err(VerifyError::ScenarioNotFound(source.to_string()));
        }
        Self::bundled(source)
    }

    /// Load every scenario under a directory
    pub fn load_all(dir: &Path) -> VerifyResult<Vec<Self>> {
        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_yaml(e.path()))
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        Ok(scenarios)
    }

    /// Structural checks that serde cannot express
    pub fn validate(&self) -> VerifyResult<()> {
        if self.steps.is_empty() {
            return Err(VerifyError::EmptyScenario(self.name.clone()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.timeout_ms == Some(0) {
                return Err(VerifyError::InvalidScenario {
                    name: self.name.clone(),
                    reason: format!("step {} has a zero timeout", i),
                });
            }
        }
        if let Some(path) = &self.evidence.screenshot {
            if path.trim().is_empty() {
                return Err(VerifyError::InvalidScenario {
                    name: self.name.clone(),
                    reason: "evidence screenshot path is empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == "yaml" || ext == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_scenario() {
        let yaml = r#"
name: login-flow
description: Log in and land on the dashboard
entry: /login
steps:
  - wait: { selector: '[data-testid="login-page"]' }
    action:
      fill: { selector: 'input[name="user"]', value: testuser }
  - wait: { text: Sign in }
    action:
      click: { text: Sign in }
  - wait: { text: Dashboard }
    timeout_ms: 5000
evidence:
  screenshot: out/dashboard.png
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.name, "login-flow");
        assert_eq!(scenario.entry.as_deref(), Some("/login"));
        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(
            scenario.steps[0].action,
            Some(Action::Fill {
                selector: r#"input[name="user"]"#.to_string(),
                value: "testuser".to_string(),
            })
        );
        assert_eq!(
            scenario.steps[1].action,
            Some(Action::Click { target: Locator::text("Sign in") })
        );
        assert_eq!(scenario.steps[2].timeout_ms, Some(5000));
        assert!(scenario.evidence.full_page);
        assert_eq!(scenario.viewport, Viewport::default());
    }

    #[test]
    fn test_step_timeout_falls_back_to_default() {
        let default = Duration::from_secs(30);
        let step = Step::new(Locator::text("x"));
        assert_eq!(step.timeout(default), default);
        assert_eq!(step.timeout_ms(5000).timeout(default), Duration::from_millis(5000));
    }

    #[test]
    fn test_empty_steps_rejected() {
        let err = Scenario::from_yaml("name: nothing\nsteps: []\n").unwrap_err();
        assert!(matches!(err, VerifyError::EmptyScenario(name) if name == "nothing"));
    }

    #[test]
    fn test_wait_with_both_kinds_rejected() {
        let yaml = r#"
name: ambiguous
steps:
  - wait: { selector: h1, text: Hello }
"#;
        assert!(Scenario::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_two_actions_in_one_step_rejected() {
        let yaml = r#"
name: greedy
steps:
  - wait: { selector: form }
    action:
      navigate: /a
      click: { selector: button }
"#;
        assert!(Scenario::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_assertion_takes_one_predicate() {
        let yaml = r#"
name: double
steps:
  - wait: { selector: h1 }
evidence:
  assertions:
    - title_contains: A
      visible: form
"#;
        assert!(Scenario::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let yaml = r#"
name: impatient
steps:
  - wait: { selector: h1 }
    timeout_ms: 0
"#;
        let err = Scenario::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, VerifyError::InvalidScenario { .. }));
    }

    #[test]
    fn test_bundled_scenarios_parse() {
        for (name, _) in BUNDLED {
            let scenario = Scenario::bundled(name).unwrap();
            assert_eq!(&scenario.name, name);
        }
        assert!(matches!(
            Scenario::bundled("missing"),
            Err(VerifyError::ScenarioNotFound(_))
        ));
    }

    #[test]
    fn test_scheduler_final_step_has_tight_timeout() {
        let scenario = Scenario::bundled("scheduler").unwrap();
        let last = scenario.steps.last().unwrap();
        assert_eq!(last.wait, Locator::text("Your Schedule"));
        assert_eq!(last.timeout_ms, Some(5000));
        assert!(last.action.is_none());
        assert!(scenario.steps[..scenario.steps.len() - 1]
            .iter()
            .all(|s| s.timeout_ms.is_none()));
    }

    #[test]
    fn test_load_all_walks_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "name: b\nsteps:\n  - wait: { selector: h1 }\n",
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(
            dir.path().join("nested/a.yml"),
            "name: a\nsteps:\n  - wait: { text: hi }\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let scenarios = Scenario::load_all(dir.path()).unwrap();
        let mut names: Vec<_> = scenarios.iter().map(|s| s.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_from_file_keeps_validation_errors_typed() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.yaml");
        std::fs::write(&empty, "name: empty\nsteps: []\n").unwrap();
        let zero = dir.path().join("zero.yaml");
        std::fs::write(
            &zero,
            "name: zero\nsteps:\n  - wait: { selector: h1 }\n    timeout_ms: 0\n",
        )
        .unwrap();
        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, "name: broken\nsteps:\n  - wait: { css: h1 }\n").unwrap();

        assert!(matches!(
            Scenario::from_file(&empty),
            Err(VerifyError::EmptyScenario(name)) if name == "empty"
        ));
        assert!(matches!(
            Scenario::from_file(&zero),
            Err(VerifyError::InvalidScenario { name, .. }) if name == "zero"
        ));
        assert!(matches!(
            Scenario::from_file(&broken),
            Err(VerifyError::ScenarioParse(msg)) if msg.contains("broken.yaml")
        ));
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::selector("h1").to_string(), r#"selector "h1""#);
        assert_eq!(
            Action::Click { target: Locator::text("Next") }.to_string(),
            r#"click text "Next""#
        );
        assert_eq!(
            Assertion::Visible("form".to_string()).to_string(),
            r#"element "form" is visible"#
        );
    }
}
