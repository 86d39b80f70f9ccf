use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use jobpool::shutdown::install_shutdown_handler;
use jobpool::{CancellableRunner, CancellationToken, JobError, JobSnapshot, Outcome, RunnerConfig};

#[derive(Parser, Debug)]
#[command(name = "jobpool")]
#[command(version)]
#[command(about = "Run batches of jobs with bounded concurrency and retries")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a batch of synthetic jobs and report their outcomes
    Run(RunArgs),
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Number of jobs to register
    #[arg(long, default_value = "20")]
    jobs: u32,

    /// Maximum number of jobs running at once
    #[arg(long, short = 'c', default_value = "4")]
    capacity: usize,

    /// Retry budget per job (0 is treated as 1)
    #[arg(long, default_value = "1")]
    max_attempts: u32,

    /// How long each attempt takes
    #[arg(long, default_value = "100")]
    sleep_ms: u64,

    /// Every Nth job is flaky (0 disables)
    #[arg(long, default_value = "0")]
    flaky_every: u32,

    /// Number of leading attempts a flaky job fails
    #[arg(long, default_value = "1")]
    flaky_attempts: u32,

    /// Every Nth job panics (0 disables)
    #[arg(long, default_value = "0")]
    panic_every: u32,

    /// Cancel the run after this many milliseconds
    #[arg(long)]
    cancel_after_ms: Option<u64>,

    /// How outcomes are consumed
    #[arg(long, default_value = "stream")]
    mode: ConsumeMode,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConsumeMode {
    /// Report outcomes as jobs finish
    Stream,
    /// Report outcomes once every job finished
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct OutcomeRow {
    job_id: String,
    attempts: u32,
    status: &'static str,
    value: Option<String>,
    error: Option<String>,
}

impl From<Outcome<String>> for OutcomeRow {
    fn from(outcome: Outcome<String>) -> Self {
        let job_id = outcome.job_id.to_string();
        let attempts = outcome.attempts;
        match outcome.result {
            Ok(value) => Self {
                job_id,
                attempts,
                status: "ok",
                value: Some(value),
                error: None,
            },
            Err(e) => Self {
                job_id,
                attempts,
                status: if e.is_cancelled() { "cancelled" } else { "failed" },
                value: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Serialize)]
struct RunSummary {
    jobs: usize,
    capacity: usize,
    reported: usize,
    succeeded: usize,
    failed: usize,
    cancelled: usize,
    elapsed_ms: u128,
    outcomes: Vec<OutcomeRow>,
    /// Final per-job state, in registration order
    jobs_detail: Vec<JobSnapshot>,
}

// =============================================================================
// Synthetic Jobs
// =============================================================================

#[derive(Debug, Clone)]
struct SyntheticJob {
    index: u32,
    sleep: Duration,
    failing_attempts: u32,
    panics: bool,
    attempts_seen: Arc<AtomicU32>,
}

impl SyntheticJob {
    fn new(index: u32, args: &RunArgs) -> Self {
        let every = |n: u32| n > 0 && (index + 1) % n == 0;
        Self {
            index,
            sleep: Duration::from_millis(args.sleep_ms),
            failing_attempts: if every(args.flaky_every) {
                args.flaky_attempts
            } else {
                0
            },
            panics: every(args.panic_every),
            attempts_seen: Arc::new(AtomicU32::new(0)),
        }
    }
}

async fn synthetic_job(job: SyntheticJob, cancel: CancellationToken) -> Result<String, JobError> {
    let attempt = job.attempts_seen.fetch_add(1, Ordering::SeqCst) + 1;

    tokio::select! {
        _ = tokio::time::sleep(job.sleep) => {}
        _ = cancel.cancelled() => return Err(JobError::Cancelled),
    }

    if job.panics {
        panic!("job {} panicked on purpose", job.index);
    }
    if attempt <= job.failing_attempts {
        return Err(JobError::failed(format!(
            "job {} failed attempt {}",
            job.index, attempt
        )));
    }
    Ok(format!("job {} done after {} attempt(s)", job.index, attempt))
}

// =============================================================================
// Run Implementation
// =============================================================================

async fn run_batch(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let shutdown = install_shutdown_handler();
    let config = RunnerConfig::new(args.capacity)
        .with_name("jobpool-cli")
        .with_default_max_attempts(args.max_attempts);
    let mut runner = CancellableRunner::with_cancellation_config(&shutdown, config);

    for index in 0..args.jobs {
        runner.add_job_default(synthetic_job, SyntheticJob::new(index, &args))?;
    }

    let started = Instant::now();
    runner.run();

    if let Some(ms) = args.cancel_after_ms {
        let token = runner.cancellation_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            tracing::info!(after_ms = ms, "Cancelling run");
            token.cancel();
        });
    }

    let print_live = args.mode == ConsumeMode::Stream && args.output == OutputFormat::Table;
    if print_live {
        print_table_header();
    }

    let mut rows: Vec<OutcomeRow> = Vec::new();
    let handler = |outcome: Outcome<String>| {
        let row = OutcomeRow::from(outcome);
        if print_live {
            print_table_row(&row);
        }
        rows.push(row);
    };
    match args.mode {
        ConsumeMode::Stream => runner.consume_streaming(handler).await,
        ConsumeMode::All => runner.consume_all(handler).await,
    };

    let count = |status: &str| rows.iter().filter(|r| r.status == status).count();
    let summary = RunSummary {
        jobs: runner.job_count(),
        capacity: runner.effective_capacity(),
        reported: rows.len(),
        succeeded: count("ok"),
        failed: count("failed"),
        cancelled: count("cancelled"),
        elapsed_ms: started.elapsed().as_millis(),
        outcomes: Vec::new(),
        jobs_detail: Vec::new(),
    };

    match args.output {
        OutputFormat::Json => {
            let summary = RunSummary {
                outcomes: rows,
                jobs_detail: runner.snapshots(),
                ..summary
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Table => {
            if !print_live {
                print_table_header();
                for row in &rows {
                    print_table_row(row);
                }
            }
            println!();
            println!(
                "{} jobs, capacity {}: {} ok, {} failed, {} cancelled, {} reported in {} ms",
                summary.jobs,
                summary.capacity,
                summary.succeeded,
                summary.failed,
                summary.cancelled,
                summary.reported,
                summary.elapsed_ms
            );
        }
    }
    Ok(())
}

fn print_table_header() {
    println!("{:<38} {:<10} {:<9} RESULT", "JOB ID", "STATUS", "ATTEMPTS");
    println!("{}", "-".repeat(78));
}

fn print_table_row(row: &OutcomeRow) {
    let detail = row
        .value
        .as_deref()
        .or(row.error.as_deref())
        .unwrap_or("-");
    println!(
        "{:<38} {:<10} {:<9} {}",
        row.job_id, row.status, row.attempts, detail
    );
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => {
            run_batch(run_args).await?;
        }
    }

    Ok(())
}
