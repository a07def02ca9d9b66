use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use waltest_core::app::{HarnessBuilder, RACING_VALUES, Scenario};
use waltest_core::config::{Backend, HarnessConfig};
use waltest_core::domain::ScenarioParams;
use waltest_core::observability::StatusReport;

/// Exit code when tasks were still outstanding at the deadline.
const EXIT_OUTSTANDING: u8 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "waltest",
    about = "Reproduce WAL store concurrency hazards on a fixed-size pool",
    after_help = "Nested deadlock on the default pool of 4: waltest nested --saturate 3 --transaction"
)]
struct Cli {
    #[command(subcommand)]
    scenario: ScenarioCmd,

    /// Artificial delay in milliseconds (writers hold their transaction this long).
    #[arg(long, global = true, default_value_t = 3000)]
    delay_ms: u64,

    /// Run the second side of the scenario on the shared handle.
    #[arg(long, global = true)]
    same_connection: bool,

    /// Wrap each task's work in a transaction.
    #[arg(long, global = true)]
    transaction: bool,

    /// Prefix for every result line.
    #[arg(long, global = true)]
    label: Option<String>,

    /// Give up waiting for results after this many seconds.
    #[arg(long, global = true, default_value_t = 10)]
    wait_secs: u64,

    /// Print results and status as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    /// TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    pool_size: Option<usize>,

    #[arg(long, global = true, value_enum)]
    backend: Option<BackendArg>,

    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Open the sqlite store without journal_mode=WAL.
    #[arg(long, global = true)]
    no_wal: bool,
}

#[derive(Debug, Subcommand)]
enum ScenarioCmd {
    /// Writer holds a transaction for the delay while a reader reads latest.
    WriteThenRead,
    /// A single writer.
    Write,
    /// A single reader.
    Read,
    /// Two inserts and a reader racing each other.
    RacingInserts {
        #[arg(long, default_value = RACING_VALUES.0)]
        first: String,
        #[arg(long, default_value = RACING_VALUES.1)]
        second: String,
    },
    /// Outer writer blocking on an inner reader in the same pool.
    Nested {
        /// Park this many workers on sleepers first; pool size minus one hangs.
        #[arg(long, default_value_t = 0)]
        saturate: usize,
    },
    /// Outer task blocking on an inner task, no store involved.
    NestedPure {
        #[arg(long, default_value = "outer")]
        outer: String,
        #[arg(long, default_value = "inner")]
        inner: String,
        /// Park this many workers on sleepers first; pool size minus one hangs.
        #[arg(long, default_value_t = 0)]
        saturate: usize,
    },
    /// Occupy workers with sleepers.
    Saturate {
        #[arg(long, default_value_t = 3)]
        count: usize,
    },
}

impl ScenarioCmd {
    /// Sleepers to run ahead of the scenario, then the scenario itself.
    fn into_plan(self) -> (Option<Scenario>, Scenario) {
        let prelude = |count: usize| (count > 0).then_some(Scenario::Saturate { count });
        match self {
            Self::WriteThenRead => (None, Scenario::WriteThenRead),
            Self::Write => (None, Scenario::Write),
            Self::Read => (None, Scenario::Read),
            Self::RacingInserts { first, second } => {
                (None, Scenario::RacingInserts { first, second })
            }
            Self::Nested { saturate } => (prelude(saturate), Scenario::Nested),
            Self::NestedPure {
                outer,
                inner,
                saturate,
            } => (prelude(saturate), Scenario::NestedPure { outer, inner }),
            Self::Saturate { count } => (None, Scenario::Saturate { count }),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Memory,
    Sqlite,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Memory => Backend::Memory,
            BackendArg::Sqlite => Backend::Sqlite,
        }
    }
}

/// One line per finished task.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum Notification {
    Success { display: String },
    Failure { error: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            error!(%err, "waltest failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<HarnessConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(size) = cli.pool_size {
        config.pool.size = size;
    }
    if let Some(backend) = cli.backend {
        config.store.backend = backend.into();
    }
    if let Some(path) = &cli.db_path {
        config.store.path = path.clone();
    }
    if cli.no_wal {
        config.store.wal = false;
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let config = load_config(&cli)?;
    let harness = HarnessBuilder::new().config(config).build()?;

    let params = ScenarioParams {
        delay_millis: cli.delay_ms,
        use_same_connection: cli.same_connection,
        use_transaction: cli.transaction,
        request_label: cli.label.clone(),
    };
    let json = cli.json;
    let wait = Duration::from_secs(cli.wait_secs);
    let (prelude, scenario) = cli.scenario.into_plan();

    let mut tasks = Vec::new();
    if let Some(sleepers) = &prelude {
        // Sleepers outlast the wait window so the workers stay parked.
        let hold = ScenarioParams {
            delay_millis: (cli.wait_secs + 1) * 1000,
            ..params.clone()
        };
        tasks.extend(harness.orchestrator.run_scenario(sleepers, &hold).tasks);
        info!(sleepers = tasks.len(), "workers parked ahead of the scenario");
    }
    tasks.extend(harness.orchestrator.run_scenario(&scenario, &params).tasks);
    let total = tasks.len();

    let (tx, mut rx) = mpsc::unbounded_channel();
    for task in tasks {
        let on_ok = tx.clone();
        let on_err = tx.clone();
        harness.delivery.subscribe(
            task,
            move |display| {
                let _ = on_ok.send(Notification::Success { display });
            },
            move |err| {
                let _ = on_err.send(Notification::Failure {
                    error: err.to_string(),
                });
            },
        );
    }
    drop(tx);

    let deadline = sleep(wait);
    tokio::pin!(deadline);
    let mut received = 0;
    while received < total {
        tokio::select! {
            Some(notification) = rx.recv() => {
                received += 1;
                print_notification(&notification, json)?;
            }
            _ = &mut deadline => break,
        }
    }

    if received == total {
        info!(scenario = scenario.name(), tasks = total, "all tasks finished");
        harness.shutdown();
        return Ok(ExitCode::SUCCESS);
    }

    warn!(
        scenario = scenario.name(),
        outstanding = total - received,
        "tasks still outstanding, giving up"
    );
    print_status(&harness.status(), json)?;
    let disposed = harness.delivery.dispose_all();
    info!(disposed, "subscriptions detached");
    harness.shutdown();
    Ok(ExitCode::from(EXIT_OUTSTANDING))
}

fn print_notification(notification: &Notification, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(notification)?);
        return Ok(());
    }
    match notification {
        Notification::Success { display } => println!("{display}"),
        Notification::Failure { error } => println!("Error: {error}"),
    }
    Ok(())
}

fn print_status(status: &StatusReport, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(status)?);
        return Ok(());
    }
    let pool = &status.pool;
    println!("store: {}", status.store);
    println!(
        "pool: capacity={} running={} queued={} completed={} failed={}",
        pool.capacity, pool.running, pool.queued, pool.completed, pool.failed
    );
    for task in &status.live_tasks {
        let blocked = if task.waiting { " [waiting]" } else { "" };
        println!(
            "  task {} {:?} {}{}",
            task.id,
            task.state,
            task.name.as_deref().unwrap_or("-"),
            blocked
        );
        for waiter in &task.waiters {
            println!("    blocks {waiter}");
        }
    }
    for edge in &status.wait_edges {
        println!(
            "  {} waits on {} ({:?})",
            edge.waiter, edge.dependency, edge.dependency_state
        );
    }
    println!("live subscriptions: {}", status.live_subscriptions);
    Ok(())
}
