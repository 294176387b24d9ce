//! sitetrack - progress and status aggregation for construction projects
//!
//! Command-line front end: evaluate the inference rules, replay edit
//! scripts against an in-memory authority, and inspect configuration.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use sitetrack::inference::{explain, infer_status, settle_status, SubtaskSignal};
use sitetrack::simulate::{load_script, run_script};
use sitetrack::{
    BackendFixture, EngineConfig, EngineError, EngineSnapshot, InMemoryBackend, ProgressEngine,
    Status, TokioClock,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sitetrack")]
#[command(version = "0.1.0")]
#[command(about = "Progress and status aggregation for construction projects", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory holding .sitetrack/settings.json
    #[arg(short, long, global = true, default_value = ".")]
    project_dir: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Infer a task's next status from its subtasks
    Infer {
        /// Current task status
        #[arg(short, long, default_value = "pending")]
        current: Status,

        /// Subtask as STATUS:PERCENT, e.g. completed:100. Repeatable.
        #[arg(short, long = "subtask", value_name = "STATUS:PERCENT", value_parser = parse_signal)]
        subtasks: Vec<SubtaskSignal>,

        /// Apply the rules until the status stops changing
        #[arg(long)]
        settle: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay an edit script against a fixture and print the settled rollup
    Simulate {
        /// Backend fixture (JSON)
        fixture: PathBuf,

        /// Edit script (JSON array of steps)
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// Load every task's subtasks before replaying
        #[arg(long)]
        expand_all: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or validate engine configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate .sitetrack/settings.json
    Validate,
    /// Show the settings file path
    Path,
}

fn parse_signal(raw: &str) -> Result<SubtaskSignal, String> {
    let (status, percent) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected STATUS:PERCENT, got '{raw}'"))?;
    let status: Status = status.parse().map_err(|e: EngineError| e.to_string())?;
    let percent: i64 = percent
        .trim()
        .parse()
        .map_err(|_| format!("invalid percent '{percent}'"))?;
    Ok(SubtaskSignal::new(
        status,
        sitetrack::clamp_percent(percent),
    ))
}

fn paint(status: Status) -> ColoredString {
    match status {
        Status::Completed => status.as_str().green(),
        Status::InProgress => status.as_str().yellow(),
        Status::Suspended => status.as_str().red(),
        Status::Pending => status.as_str().dimmed(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "sitetrack=debug,info"
    } else {
        "sitetrack=info,warn"
    };
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        let code = e.downcast_ref::<EngineError>().map_or(1, EngineError::exit_code);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Infer {
            current,
            subtasks,
            settle,
            json,
        } => {
            let next = if settle {
                settle_status(current, &subtasks)
            } else {
                infer_status(current, &subtasks)
            };
            let rule = explain(current, &subtasks);
            if json {
                let out = serde_json::json!({
                    "current": current,
                    "next": next,
                    "rule": format!("{rule:?}"),
                    "settled": settle,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{} -> {}  ({:?})", paint(current), paint(next).bold(), rule);
            }
        }

        Commands::Simulate {
            fixture,
            script,
            expand_all,
            json,
        } => {
            let config = EngineConfig::load_validated(&cli.project_dir)?;
            let content = std::fs::read_to_string(&fixture)
                .with_context(|| format!("failed to read fixture {}", fixture.display()))?;
            let fixture: BackendFixture = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse fixture {}", fixture.display()))?;
            let project_id = fixture
                .project
                .as_ref()
                .map(|p| p.id)
                .ok_or_else(|| EngineError::validation("fixture", "no project"))?;
            let steps = match &script {
                Some(path) => load_script(path)?,
                None => Vec::new(),
            };

            let backend = Arc::new(InMemoryBackend::from_fixture(fixture));
            let engine = ProgressEngine::new(
                backend.clone(),
                backend.clone(),
                Arc::new(TokioClock),
                config,
            );
            engine.load_project(project_id).await?;
            if expand_all {
                let task_ids: Vec<_> = engine.snapshot().tasks.iter().map(|t| t.task.id).collect();
                for task_id in task_ids {
                    if let Err(e) = engine.ensure_subtasks_loaded(task_id).await {
                        eprintln!("{} task {}: {}", "Warning:".yellow(), task_id, e);
                    }
                }
            }
            let report = run_script(&engine, &steps).await?;

            let snapshot = engine.snapshot();
            if json {
                let out = serde_json::json!({
                    "report": report,
                    "snapshot": snapshot,
                    "remoteCalls": backend.total_calls(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print_snapshot(&snapshot);
                println!(
                    "\n   {} step(s), {} failed remotely, {} remote call(s)",
                    report.steps,
                    report.failed_steps,
                    backend.total_calls()
                );
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show { json } => {
                let config = EngineConfig::load(&cli.project_dir)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                } else {
                    println!("\n{} Engine Configuration", "Config:".cyan().bold());
                    println!("{}", "─".repeat(40));
                    println!("   Debounce window: {} ms", config.debounce_ms);
                    println!("   Throttle window: {} ms", config.throttle_ms);
                    println!("   Inter-item delay: {} ms", config.inter_item_delay_ms);
                    println!("   Fetch retries: {}", config.fetch_retries);
                    println!("   Fetch backoff: {:?}", config.fetch_backoff);
                }
            }
            ConfigAction::Validate => {
                let path = EngineConfig::settings_path(&cli.project_dir);
                if !path.exists() {
                    println!("{} no settings.json, using defaults", "OK".green());
                    return Ok(());
                }
                let config = EngineConfig::load(&cli.project_dir)?;
                let report = config.validate();
                for issue in &report.warnings {
                    println!("{} {}: {}", "Warning:".yellow(), issue.field, issue.reason);
                }
                for issue in &report.errors {
                    eprintln!("{} {}: {}", "Error:".red(), issue.field, issue.reason);
                }
                if report.is_valid() {
                    println!("{} settings.json is valid", "OK".green());
                } else {
                    std::process::exit(report.exit_code());
                }
            }
            ConfigAction::Path => {
                println!(
                    "{}",
                    EngineConfig::settings_path(&cli.project_dir).display()
                );
            }
        },
    }
    Ok(())
}

fn print_snapshot(snapshot: &EngineSnapshot) {
    if let Some(project) = &snapshot.project {
        println!(
            "\n{} {} ({:.1}%)",
            "Project:".cyan().bold(),
            project.name,
            project.progress
        );
        println!("{}", "─".repeat(40));
    }
    for task in &snapshot.tasks {
        println!(
            "   {:<24} {:>3}%  {}",
            task.task.name,
            task.progress,
            paint(task.task.status)
        );
        for sub in &task.subtasks {
            println!(
                "     - {:<20} {:>3}%  {}",
                sub.subtask.name,
                sub.progress,
                paint(sub.subtask.status)
            );
        }
    }
}
