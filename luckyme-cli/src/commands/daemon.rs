//! `luckyme daemon` — status, launch, shutdown and file backups.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use luckyme_client::{
    backup_daemon_files, ensure_running, ClientLibrary, DaemonControl, LaunchOutcome,
    ProcessDaemon, SocketLink,
};
use luckyme_core::DaemonStatus;

use super::home_and_config;

/// Session name used for one-off control requests.
const CONTROL_SESSION: &str = "luckyme-ctl";

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Report the daemon status from its pid file.
    Status,
    /// Start the daemon if it is not running.
    Spawn,
    /// Ask a running daemon to shut down.
    Stop,
    /// Back up the daemon log and state files now.
    Backup,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let (home, config) = home_and_config()?;
    let daemon = ProcessDaemon::new(&config.daemon_binary, &home)
        .with_spawn_timeout(config.spawn_timeout());

    match command {
        DaemonCommand::Status => {
            let status = daemon.status();
            let label = match status {
                DaemonStatus::Running => status.to_string().green().bold(),
                DaemonStatus::NotRunning => status.to_string().bright_black().bold(),
                DaemonStatus::Crashed => status.to_string().yellow().bold(),
                DaemonStatus::Error => status.to_string().red().bold(),
            };
            match daemon.pid() {
                Some(pid) => println!("daemon: {label} (pid {pid})"),
                None => println!("daemon: {label}"),
            }
        }
        DaemonCommand::Spawn => {
            let outcome = ensure_running(
                &daemon,
                || {
                    if !backup_daemon_files(&home) {
                        eprintln!("warning: some daemon files could not be backed up");
                    }
                },
                &mut |elapsed_ms| {
                    println!("waiting for daemon... {}s", elapsed_ms / 1000);
                    0
                },
            )
            .context("failed to start daemon")?;
            match outcome {
                LaunchOutcome::AlreadyRunning => println!("daemon is already running"),
                LaunchOutcome::Started => println!("daemon started"),
                LaunchOutcome::Restarted => println!("daemon restarted after a crash"),
            }
        }
        DaemonCommand::Stop => {
            if daemon.status() != DaemonStatus::Running {
                println!("daemon is not running");
                return Ok(());
            }
            let library = ClientLibrary::init(std::sync::Arc::new(SocketLink::for_home(&home)));
            let session = library
                .register_with_retry(CONTROL_SESSION)
                .context("failed to open control session")?;
            session.shutdown().context("failed to request daemon shutdown")?;
            session.dispose();
            println!("daemon stop requested");
        }
        DaemonCommand::Backup => {
            if backup_daemon_files(&home) {
                println!("daemon files backed up");
            } else {
                anyhow::bail!("some daemon files could not be backed up");
            }
        }
    }

    Ok(())
}
