//! CLI command definitions, routing, and tracing setup.

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use pyramerge_core::Progress;
use pyramerge_core::convert::ProcessConverter;
use pyramerge_shared::{EXAMPLE_MERGE_JOB, EXAMPLE_TRANSFER_JOB, JobConfig, JobKind};
use pyramerge_storage::Store;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// pyramerge — merge or copy tiled multi-resolution pyramids in shards.
#[derive(Parser)]
#[command(
    name = "pyramerge",
    version,
    about = "Plan, execute, and finish sharded pyramid merge/transfer jobs.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Job configuration file (JSON; any storage path).
    #[arg(long, global = true)]
    pub conf: Option<String>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Plan the job: write instruction shards and the root registry.
    Plan,

    /// Execute one shard of a planned job, resuming from its checkpoint.
    Agent {
        /// Shard number, 1-based, up to process.parallelization.
        #[arg(long)]
        split: usize,
    },

    /// Consolidate shard outputs into the final descriptor and slab list.
    Finish,

    /// Validate a job configuration file without touching anything.
    Check,

    /// Print a reference job configuration file.
    Example {
        /// Print the transfer (copy-only) variant.
        #[arg(long)]
        transfer: bool,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pyramerge=info",
        1 => "pyramerge=debug",
        _ => "pyramerge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Plan => cmd_plan(cli.conf.as_deref()).await,
        Command::Agent { split } => cmd_agent(cli.conf.as_deref(), split).await,
        Command::Finish => cmd_finish(cli.conf.as_deref()).await,
        Command::Check => cmd_check(cli.conf.as_deref()).await,
        Command::Example { transfer } => cmd_example(transfer),
    }
}

/// Load and validate the job file named by `--conf`.
async fn load_job(conf: Option<&str>, store: &Store) -> Result<JobConfig> {
    let conf = conf.ok_or_else(|| eyre!("--conf <JOB FILE> is required for this command"))?;
    let text = store.get_text(conf).await?;
    Ok(JobConfig::from_json(&text)?)
}

fn kind_name(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Merge => "merge",
        JobKind::Transfer => "transfer",
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_plan(conf: Option<&str>) -> Result<()> {
    let store = Store::file();
    let config = load_job(conf, &store).await?;

    info!(
        kind = kind_name(config.kind()?),
        directory = %config.process.directory,
        parallelization = config.process.parallelization,
        "planning job"
    );

    let reporter = CliProgress::new();
    let summary = pyramerge_core::plan(&config, &store, &reporter).await?;

    println!();
    println!("  Plan written to {}", config.process.directory);
    println!("  Shards: {}", summary.shards);
    println!("  Units:  {}", summary.units);
    println!("  Links:  {}", summary.links);
    println!("  Merges: {}", summary.merges);
    println!("  Copies: {}", summary.copies);
    println!();

    Ok(())
}

async fn cmd_agent(conf: Option<&str>, split: usize) -> Result<()> {
    let store = Store::file();
    let config = load_job(conf, &store).await?;

    info!(split, directory = %config.process.directory, "executing shard");

    let reporter = CliProgress::new();
    let summary =
        pyramerge_core::execute(&config, split, &store, &ProcessConverter, &reporter).await?;

    println!();
    if summary.already_complete {
        println!("  Shard {split} was already complete.");
    } else {
        println!("  Shard {split} done!");
    }
    println!("  Executed: {}", summary.executed);
    println!("  Skipped:  {}", summary.skipped);
    println!();

    Ok(())
}

async fn cmd_finish(conf: Option<&str>) -> Result<()> {
    let store = Store::file();
    let config = load_job(conf, &store).await?;

    info!(directory = %config.process.directory, "finishing job");

    let reporter = CliProgress::new();
    let summary = pyramerge_core::finish(&config, &store, &reporter).await?;

    println!();
    println!("  Pyramid finished!");
    println!("  Slabs: {}", summary.slabs);
    println!("  List:  {}", summary.list_path);
    println!();

    Ok(())
}

async fn cmd_check(conf: Option<&str>) -> Result<()> {
    let store = Store::file();
    let config = load_job(conf, &store).await?;
    println!(
        "Configuration OK: {} job, {} shard(s), work directory {}",
        kind_name(config.kind()?),
        config.process.parallelization,
        config.process.directory
    );
    Ok(())
}

fn cmd_example(transfer: bool) -> Result<()> {
    if transfer {
        print!("{EXAMPLE_TRANSFER_JOB}");
    } else {
        print!("{EXAMPLE_MERGE_JOB}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl Progress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item(&self, detail: &str, current: usize) {
        self.spinner.set_message(format!("[{current}] {detail}"));
    }

    fn done(&self) {
        self.spinner.finish_and_clear();
    }
}
