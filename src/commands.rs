//! CLI argument definitions
//!
//! Defines the clap arguments for the certification harness.

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Tests to run, as `suite` or `suite:group` (default: every suite)
    #[arg(value_name = "TEST")]
    pub tests: Vec<String>,

    /// List the available test groups and exit
    #[arg(long)]
    pub list_tests: bool,

    /// Configuration file (default: the platform config directory)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}
