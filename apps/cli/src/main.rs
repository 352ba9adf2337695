//! pyramerge CLI — plan, execute, and finish pyramid merge/transfer jobs.
//!
//! A job runs as `plan`, then P independent `agent --split N` invocations,
//! then `finish`; all three share one work directory named in the job file.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
