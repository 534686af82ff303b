//! Cucumber wire runner
//!
//! Listens on the endpoint named by the feature tree's `.wire` file, runs
//! cucumber against it, prints cucumber's output and exits with its status.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use cucumber_wire_runner::common::{config::RunnerConfig, logging};
use cucumber_wire_runner::runner::{self, INTERNAL_FAILURE_EXIT_CODE};
use cucumber_wire_runner::{commands::RunArgs, wire::DrainEngine, Result};

#[derive(Parser)]
#[command(
    name = "cucumber-wire-runner",
    about = "Run cucumber against a wire protocol step server"
)]
#[command(version, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: RunArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.args.verbose);

    let code = match run(cli.args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            INTERNAL_FAILURE_EXIT_CODE
        }
    };

    std::process::exit(code);
}

async fn run(args: RunArgs) -> Result<i32> {
    let config = RunnerConfig::load()?;
    let params = args.into_params(&config);

    let outcome = runner::execute(&params, Arc::new(DrainEngine)).await?;

    // Ensure output isn't interleaved with whatever runs after us
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&outcome.output)?;
    stdout.flush()?;

    Ok(outcome.exit_code)
}
