//! CLI command definitions for batch-eval.
//!
//! `run` evaluates every pending task of a TSV file and appends results to
//! the run's ledger; `status` summarizes an existing ledger.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::executor::{LlmExecutor, TaskExecutor};
use crate::harness::{self, BatchRunner, RunSummary, StatusReport};
use crate::ledger::ResumePolicy;
use crate::llm::{LlmProvider, OpenRouterProvider};

/// Concurrent, resumable batch evaluation of an LLM agent over a task file.
#[derive(Parser)]
#[command(name = "batch-eval")]
#[command(about = "Run an LLM agent over a TSV task file with a resumable JSONL ledger")]
#[command(version)]
#[command(
    long_about = "batch-eval runs an LLM agent over every question in a TSV file (id<TAB>question) using a fixed pool of workers.\n\nEach result is appended to <output-dir>/<run-name>.ledger as one JSON line. Re-running the same command skips questions already in the ledger.\n\nExample usage:\n  batch-eval run --run-name o1-baseline --tasks tasks.tsv --concurrency 8"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Evaluate every pending task and append results to the ledger.
    Run(RunArgs),

    /// Summarize the ledger of a run.
    Status(StatusArgs),
}

/// Arguments for `batch-eval run`.
///
/// Options left unset fall back to `HARNESS_*` environment variables, then
/// to built-in defaults.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Run name; results go to <output-dir>/<run-name>.ledger.
    #[arg(long)]
    pub run_name: String,

    /// TSV task file with two columns: id and question (default: tasks.tsv).
    #[arg(long)]
    pub tasks: Option<PathBuf>,

    /// Directory for ledgers (default: outputs).
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Number of concurrent workers (default: 8).
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Model identifier (default: o1).
    #[arg(short = 'm', long)]
    pub model_id: Option<String>,

    /// API key (falls back to OPENROUTER_API_KEY, then LITELLM_API_KEY).
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL, e.g. a LiteLLM proxy (default: OpenRouter).
    #[arg(long)]
    pub api_base: Option<String>,

    /// Maximum solver steps per task (default: 12).
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Timeout in seconds per task (default: 1800).
    #[arg(long)]
    pub task_timeout: Option<u64>,

    /// Re-run tasks whose previous attempt failed.
    #[arg(long)]
    pub retry_failed: bool,

    /// Seconds between progress log lines.
    #[arg(long, default_value = "30")]
    pub progress_interval: u64,

    /// Output the run summary as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

impl RunArgs {
    /// Applies the explicitly given flags on top of `config`.
    fn apply(&self, mut config: HarnessConfig) -> HarnessConfig {
        config = config
            .with_run_name(self.run_name.clone())
            .with_progress_interval(Duration::from_secs(self.progress_interval));
        if let Some(tasks) = &self.tasks {
            config = config.with_tasks_file(tasks.clone());
        }
        if let Some(dir) = &self.output_dir {
            config = config.with_output_dir(dir.clone());
        }
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(model) = &self.model_id {
            config = config.with_model_id(model.clone());
        }
        if let Some(base) = &self.api_base {
            config = config.with_api_base(base.clone());
        }
        if let Some(steps) = self.max_steps {
            config = config.with_max_steps(steps);
        }
        if let Some(secs) = self.task_timeout {
            config = config.with_task_timeout(Duration::from_secs(secs));
        }
        if self.retry_failed {
            config = config.with_resume_policy(ResumePolicy::RetryFailed);
        }
        config
    }
}

/// Arguments for `batch-eval status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Run name to inspect.
    #[arg(long)]
    pub run_name: String,

    /// Directory holding ledgers.
    #[arg(short = 'o', long, default_value = "outputs")]
    pub output_dir: PathBuf,

    /// Task file; when given, also report how many tasks remain.
    #[arg(long)]
    pub tasks: Option<PathBuf>,

    /// Count failed entries as remaining.
    #[arg(long)]
    pub retry_failed: bool,

    /// Output the report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_batch_command(args).await,
        Commands::Status(args) => run_status_command(args).await,
    }
}

async fn run_batch_command(args: RunArgs) -> anyhow::Result<()> {
    // Credential first: nothing touches the ledger without one.
    let api_key = harness::resolve_api_key(args.api_key.clone())?;

    let config = args.apply(HarnessConfig::from_env()?);
    let runner = BatchRunner::new(config.clone())?;

    let provider = build_llm_client(api_key, &config)?;
    let executor: Arc<dyn TaskExecutor> =
        Arc::new(LlmExecutor::new(provider, config.executor_config()));

    let shutdown = runner.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight tasks");
            shutdown.shutdown();
        }
    });

    info!(
        run_name = %config.run_name,
        model = %config.model_id,
        tasks = %config.tasks_file.display(),
        ledger = %runner.ledger().path().display(),
        "Starting batch run"
    );
    let summary = runner.run(executor).await?;

    if args.json {
        let json = serde_json::to_string_pretty(&summary)?;
        println!("{json}");
    } else {
        print_run_summary(&summary);
    }

    Ok(())
}

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let policy = if args.retry_failed {
        ResumePolicy::RetryFailed
    } else {
        ResumePolicy::SkipAnswered
    };
    let report =
        harness::run_status(&args.output_dir, &args.run_name, args.tasks.as_deref(), policy)
            .await?;

    if args.json {
        let json = serde_json::to_string_pretty(&report)?;
        println!("{json}");
    } else {
        print_status_report(&report);
    }

    Ok(())
}

fn build_llm_client(
    api_key: String,
    config: &HarnessConfig,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let provider = match &config.api_base {
        Some(base) => {
            info!(model = %config.model_id, api_base = %base, "Using custom OpenAI-compatible endpoint");
            OpenRouterProvider::with_custom_url(api_key, base.clone(), config.model_id.clone())?
        }
        None => {
            info!(model = %config.model_id, "Using OpenRouter");
            OpenRouterProvider::new(api_key, config.model_id.clone())?
        }
    };
    Ok(Arc::new(provider))
}

fn print_run_summary(summary: &RunSummary) {
    println!("\n=== Batch Run Results ===");
    println!("Run:               {}", summary.run_name);
    println!("Ledger:            {}", summary.ledger_path.display());
    println!("Resume policy:     {}", summary.resume_policy);
    println!("Tasks in file:     {}", summary.total_tasks);
    println!("Already completed: {}", summary.already_completed);
    println!("Dispatched:        {}", summary.dispatched);
    println!("Succeeded:         {}", summary.completed);
    println!("Failed:            {}", summary.failed);
    if summary.cancelled > 0 {
        println!("Not started:       {} (interrupted)", summary.cancelled);
    }
    println!("Elapsed:           {:.1}s", summary.elapsed_secs);
}

fn print_status_report(report: &StatusReport) {
    let s = &report.summary;
    println!("\n=== Ledger Status: {} ===", report.run_name);
    println!("Ledger:          {}", report.ledger_path.display());
    println!("Entries:         {}", s.entries);
    println!("Unique questions:{}", s.unique_payloads);
    println!("Succeeded:       {} ({:.1}%)", s.succeeded, s.success_rate());
    println!("Failed:          {}", s.failed);
    println!("Parsing errors:  {}", s.parse_errors);
    println!("Step limit hits: {}", s.step_limit_hits);
    println!(
        "Tokens:          {} in / {} out",
        s.usage.input_tokens, s.usage.output_tokens
    );
    println!("Avg duration:    {:.1}s", s.avg_duration_secs);
    if let Some(remaining) = report.remaining {
        println!("Remaining tasks: {}", remaining);
    }
}
