//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running a disposable container until interrupted (`run`)
//! - Printing the resolved environment settings (`settings`)

mod run;

pub use run::{RunArgs, run_container_command};

use clap::{ColorChoice, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "capsule")]
#[command(about = "Run disposable containers for tests and local development")]
#[command(
    long_about = "capsule starts a container, waits until it is ready, and removes it again.\nExamples:\n  capsule run --image redis:7 --expose 6379 --wait-port 6379\n  capsule settings"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a container, wait until it is ready, and hold it until Ctrl-C
    Run(RunArgs),

    /// Print the settings resolved from the environment
    Settings {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}
