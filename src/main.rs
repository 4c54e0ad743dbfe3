//! Tandem - Autonomous coder/reviewer workflow orchestration
//!
//! CLI entry point: run the workflow loop, inspect session state, and
//! validate configuration.

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use tandem::agent::CliAgent;
use tandem::config::WorkflowConfig;
use tandem::git::GitCli;
use tandem::plan::PlanStateStore;
use tandem::workflow::intervention::ConsoleIntervention;
use tandem::workflow::{Narrator, WorkflowOrchestrator};
use tandem::TandemError;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(author = "Tandem Workflow Orchestrator")]
#[command(version = "0.1.0")]
#[command(about = "Autonomous coder/reviewer loop with deterministic approval gates", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the workflow loop for a task
    Run {
        /// Task description (also drives target binding)
        task: String,

        /// Maximum iterations
        #[arg(short, long)]
        max_iterations: Option<u32>,

        /// Skip the commit phase even on approval
        #[arg(long)]
        no_commit: bool,

        /// Suppress JSON progress narration; show a spinner instead
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show the most recent session's plan state
    Status,

    /// Show or validate project configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load, resolve, and validate the configuration
    Check,
    /// Print the resolved configuration as JSON
    Show,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tandem={default}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            e.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> tandem::Result<i32> {
    match cli.command {
        Commands::Run {
            task,
            max_iterations,
            no_commit,
            quiet,
        } => cmd_run(&cli.project, &task, max_iterations, no_commit, quiet).await,
        Commands::Status => cmd_status(&cli.project),
        Commands::Config { action } => cmd_config(&cli.project, action),
    }
}

async fn cmd_run(
    project: &PathBuf,
    task: &str,
    max_iterations: Option<u32>,
    no_commit: bool,
    quiet: bool,
) -> tandem::Result<i32> {
    let mut config = WorkflowConfig::load(project)?;
    if let Some(max) = max_iterations {
        config.max_iterations = max;
    }
    if no_commit {
        config.commit_enabled = false;
    }
    config.validate()?;

    let agent = Arc::new(CliAgent::new(&config.project_dir, config.agent_timeouts));
    let narrator = if quiet {
        Narrator::silent()
    } else {
        Narrator::default()
    };
    let orchestrator = WorkflowOrchestrator::new(
        config,
        agent,
        Arc::new(GitCli),
        Arc::new(ConsoleIntervention),
    )
    .with_narrator(narrator);

    let spinner = quiet.then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .expect("spinner template is valid"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message("running workflow loop");
        bar
    });

    let result = tokio::select! {
        result = orchestrator.run(task) => result?,
        _ = tokio::signal::ctrl_c() => {
            if let Some(bar) = &spinner {
                bar.finish_and_clear();
            }
            eprintln!("{}", "Interrupted; session state is on disk.".yellow());
            return Ok(130);
        }
    };

    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }

    println!();
    if result.approved {
        println!("{} {}", "APPROVED".green().bold(), result.final_message);
    } else {
        println!("{} {}", "NOT APPROVED".red().bold(), result.final_message);
    }
    println!("Iterations: {}", result.iterations);
    if !result.changed_files.is_empty() {
        println!("Changed files:");
        for file in &result.changed_files {
            println!("  {file}");
        }
    }
    if let Some(commit) = &result.commit {
        match (&commit.committed, &commit.sha) {
            (true, Some(sha)) => println!("Committed: {sha}"),
            _ => println!("{}", "Commit step did not complete.".yellow()),
        }
    }

    Ok(if result.approved { 0 } else { 1 })
}

fn cmd_status(project: &PathBuf) -> tandem::Result<i32> {
    let config = WorkflowConfig::load(project)?;
    let Some(store) = PlanStateStore::latest(&config.state_dir)? else {
        println!("No sessions found under {}", config.state_dir.display());
        return Ok(0);
    };

    let state = store.load()?;
    println!("{} {}", "Session:".bold(), state.session_id);
    println!("Task: {}", state.plan.task);
    println!("Current phase: {}", state.plan.current_phase);
    println!("Iterations: {}", state.progress.iterations);

    let unresolved: Vec<_> = state.plan.unresolved_errors().collect();
    if unresolved.is_empty() {
        println!("{}", "No unresolved errors.".green());
    } else {
        println!("{}", "Unresolved errors:".yellow().bold());
        for error in unresolved {
            println!(
                "  {} (attempts: {}): {}",
                error.action, error.attempts, error.message
            );
        }
    }
    Ok(0)
}

fn cmd_config(project: &PathBuf, action: ConfigAction) -> tandem::Result<i32> {
    let config = WorkflowConfig::load(project)?;
    match action {
        ConfigAction::Check => {
            println!("{} configuration is valid", "OK:".green().bold());
            println!("  max_iterations: {}", config.max_iterations);
            println!("  coder models: {}", config.coder_models.len());
            println!("  reviewer models: {}", config.reviewer_models.len());
            println!("  checks: {}", config.checks.len());
            println!("  state dir: {}", config.state_dir.display());
        }
        ConfigAction::Show => {
            println!(
                "{}",
                serde_json::to_string_pretty(&config).map_err(TandemError::from)?
            );
        }
    }
    Ok(0)
}
