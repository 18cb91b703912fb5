//! ui-verify - scripted end-to-end UI verification
//!
//! Exit status: 0 when the scenario completes, 1 when a step or assertion
//! fails, 2 when the run could not be carried out at all.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ui_verify::app::{AppEndpoint, DEFAULT_BASE_URL};
use ui_verify::playwright::{PlaywrightConfig, PlaywrightLauncher};
use ui_verify::provider::Browser;
use ui_verify::scenario::BUNDLED;
use ui_verify::{Runner, RunnerConfig, Scenario, VerifyResult};

#[derive(Parser)]
#[command(name = "ui-verify")]
#[command(author, version, about = "Drive a headless browser through a scripted UI scenario")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scenario
    Run(RunArgs),

    /// List bundled scenarios, or the scenarios found under a directory
    List {
        /// Directory to scan for .yaml/.yml scenarios
        dir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Scenario file, or the name of a bundled scenario
    scenario: String,

    /// Base URL of the application under test
    #[arg(long, env = "UI_VERIFY_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Timeout for steps that do not set their own
    #[arg(
        long,
        env = "UI_VERIFY_DEFAULT_TIMEOUT_MS",
        default_value = "30000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    default_timeout_ms: u64,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long, default_value = "chromium")]
    browser: Browser,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Directory where the playwright npm package is installed
    #[arg(long, env = "UI_VERIFY_NODE_PROJECT", default_value = ".")]
    node_project: PathBuf,

    /// Node.js executable
    #[arg(long, env = "UI_VERIFY_NODE", default_value = "node")]
    node: PathBuf,

    /// Wait up to this many milliseconds for the application to answer first
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    wait_for_app: Option<u64>,

    /// Write the evidence screenshot here instead of the scenario's path
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Capture a full-page screenshot here if the run fails
    #[arg(long)]
    failure_screenshot: Option<PathBuf>,

    /// Write the run result as JSON
    #[arg(long)]
    results: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::List { dir } => list(dir).map(|_| true),
    };

    match result {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

async fn run(args: RunArgs) -> VerifyResult<bool> {
    let scenario = Scenario::resolve(&args.scenario)?;

    let launcher = PlaywrightLauncher::new(PlaywrightConfig {
        node: args.node,
        project_dir: args.node_project,
        ..Default::default()
    });

    let runner = Runner::new(RunnerConfig {
        app: AppEndpoint::new(args.base_url),
        browser: args.browser,
        headless: !args.headed,
        default_timeout: Duration::from_millis(args.default_timeout_ms),
        wait_for_app: args.wait_for_app.map(Duration::from_millis),
        screenshot: args.screenshot,
        failure_screenshot: args.failure_screenshot,
        results: args.results,
    });

    let result = runner.run(&scenario, &launcher).await?;

    match result.failure() {
        None => {
            println!("Scenario '{}' completed in {} ms", result.scenario, result.duration_ms);
            if let Some(shot) = result.evidence().and_then(|e| e.screenshot.as_ref()) {
                println!("Screenshot: {} (sha256 {})", shot.path.display(), shot.sha256);
            }
            Ok(true)
        }
        Some(failure) => {
            eprintln!("Scenario '{}' failed: {}", result.scenario, failure);
            Ok(false)
        }
    }
}

fn list(dir: Option<PathBuf>) -> VerifyResult<()> {
    let scenarios = match dir {
        Some(dir) => Scenario::load_all(&dir)?,
        None => BUNDLED
            .iter()
            .map(|(name, _)| Scenario::bundled(name))
            .collect::<VerifyResult<Vec<_>>>()?,
    };

    if scenarios.is_empty() {
        println!("No scenarios found.");
        return Ok(());
    }

    for scenario in &scenarios {
        println!(
            "{:<16} {:>3} steps  {}",
            scenario.name,
            scenario.steps.len(),
            scenario.description
        );
    }
    Ok(())
}
