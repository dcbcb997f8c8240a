//! Fanflow CLI - runs one triggered pipeline run.
//!
//! Intended to be invoked by an external scheduler once per cadence tick.
//! Claims and audit records live under `<state-dir>/<table-name>/`, so every
//! invocation against the same table shares one dedup guard.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fanflow::audit::FileAuditStore;
use fanflow::config::PipelineConfig;
use fanflow::core::WorkItem;
use fanflow::dedup::FileClaimStore;
use fanflow::errors::WorkerError;
use fanflow::events::LoggingEventSink;
use fanflow::fanout::{CompletionPolicy, FnWorker, WorkerOutput};
use fanflow::pipeline::Orchestrator;
use fanflow::utils::{Clock, SystemClock};

#[derive(Parser)]
#[command(
    name = "fanflow",
    about = "Periodic fan-out pipeline with at-most-once initiation per period",
    version
)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true, env = "FANFLOW_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a single run for the current period
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Table holding dedup and audit records
    #[arg(long, env = "FANFLOW_TABLE_NAME", default_value = "")]
    table_name: String,

    /// Directory holding one state directory per table
    #[arg(long, env = "FANFLOW_STATE_DIR", default_value = ".fanflow")]
    state_dir: PathBuf,

    /// Period timezone offset in hours east of UTC
    #[arg(long, env = "FANFLOW_UTC_OFFSET_HOURS", default_value_t = 9, allow_hyphen_values = true)]
    utc_offset_hours: i32,

    /// Maximum worker invocations in flight
    #[arg(long, env = "FANFLOW_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// Number of work items per run
    #[arg(long, env = "FANFLOW_WIDTH", default_value_t = 100)]
    width: u32,

    /// Make the worker fail on this item index
    #[arg(long, env = "FANFLOW_FAIL_INDEX")]
    fail_index: Option<u32>,

    /// Abort running workers after the first failure instead of draining them
    #[arg(long, env = "FANFLOW_ABORT_IN_FLIGHT")]
    abort_in_flight: bool,

    /// Print the run report as JSON
    #[arg(long, short = 'j')]
    json: bool,
}

impl RunArgs {
    fn config(&self) -> PipelineConfig {
        let policy = if self.abort_in_flight {
            CompletionPolicy::AbortInFlight
        } else {
            CompletionPolicy::DrainInFlight
        };
        PipelineConfig::new(self.table_name.clone())
            .with_utc_offset_hours(self.utc_offset_hours)
            .with_concurrency_limit(self.concurrency)
            .with_fan_out_width(self.width)
            .with_completion_policy(policy)
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = args.config();
    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        return Ok(ExitCode::from(2));
    }

    let fail_index = args.fail_index;
    let worker = FnWorker::new("cli", move |item: &WorkItem| match fail_index {
        Some(index) if index == item.sequence_index => {
            Err(WorkerError::failed(item, "Dummy Error!"))
        }
        _ => Ok(WorkerOutput::success()),
    });

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let table_dir = args.state_dir.join(&config.table_name);
    let claims = FileClaimStore::open(&table_dir, clock.clone())
        .with_context(|| format!("failed to open claim store in {}", table_dir.display()))?;
    let audit = FileAuditStore::open(&table_dir, clock.clone())
        .with_context(|| format!("failed to open audit store in {}", table_dir.display()))?;

    let orchestrator = Orchestrator::builder(config)
        .clock(clock)
        .claim_store(Arc::new(claims))
        .audit_store(Arc::new(audit))
        .worker(Arc::new(worker))
        .event_sink(Arc::new(LoggingEventSink::debug()))
        .build();
    let report = orchestrator.run().await;

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("failed to encode run report")?;
        println!("{json}");
    } else {
        println!("{}", report.result);
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(async {
        match cli.command {
            Commands::Run(args) => run(args).await,
        }
    })
}
