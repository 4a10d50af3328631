//! certsuite - device certification harness
//!
//! Runs black-box test suites against an attached device, restoring the
//! device between suites, and packs everything they produce into one
//! results archive.

use clap::Parser;
use certsuite::cli;
use certsuite::commands::RunArgs;

#[derive(Parser)]
#[command(name = "certsuite", about = "Device certification test harness")]
#[command(version, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: RunArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli::dispatch(cli.args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
