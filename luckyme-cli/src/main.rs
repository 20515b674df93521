//! LuckyMe — opportunistic content dissemination client.
//!
//! # Usage
//!
//! ```text
//! luckyme run [--loopback]
//! luckyme daemon status|spawn|stop|backup
//! luckyme interests --luck <n> [--pool <n>] [--count <n>] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{daemon::DaemonCommand, interests::InterestsArgs, run::RunArgs};

#[derive(Parser, Debug)]
#[command(
    name = "luckyme",
    version,
    about = "Publish and receive content through the dissemination daemon",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the LuckyMe service until Ctrl-C or daemon shutdown.
    Run(RunArgs),

    /// Inspect and control the dissemination daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Print the weighted interest profile for a luck value.
    Interests(InterestsArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Interests(args) => args.run(),
    }
}
