//! CLI command handling
//!
//! Loads configuration, installs logging and hands off to either group
//! listing or a full run.

use tokio::sync::watch;

use crate::automation::MarionetteClient;
use crate::commands::RunArgs;
use crate::common::config::Config;
use crate::common::{logging, Result};
use crate::device::Adb;
use crate::report::ResultsArchive;
use crate::run::{RunController, EXIT_INTERRUPTED};
use crate::suite::listing;

/// Dispatch the command line; returns the process exit code
pub async fn dispatch(args: RunArgs) -> Result<i32> {
    let config = Config::load(args.config.as_deref())?;

    if args.list_tests {
        logging::init_cli();
        for (suite, group) in listing::list_groups(&config).await? {
            println!("{}:{}", suite, group);
        }
        return Ok(0);
    }

    let archive = ResultsArchive::create(&config.results_dir)?;
    logging::init_run(archive.log_file()?);

    let interrupt = watch_interrupt();
    let controller = RunController::new(&config, args.tests, interrupt);
    let outcome = controller
        .run(
            archive,
            || Adb::connect(&config.device),
            MarionetteClient::new(&config.automation),
        )
        .await;

    Ok(outcome.exit_code())
}

/// First Ctrl-C asks the run to stop after the current suite's cleanup; a
/// second one exits immediately.
fn watch_interrupt() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupt received, stopping after the current suite");
        let _ = tx.send(true);

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted again, exiting without cleanup");
            std::process::exit(EXIT_INTERRUPTED);
        }
    });
    rx
}
