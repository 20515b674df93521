//! `luckyme run` — host the service in the foreground.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tokio::sync::mpsc;

use luckyme_client::{init_tracing, LoopbackDaemon, ProcessDaemon, SocketLink};
use luckyme_core::ClientMessage;
use luckyme_service::LuckyService;

use super::home_and_config;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Use an in-process daemon instead of the real one.
    #[arg(long)]
    pub loopback: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        init_tracing();
        let (home, config) = home_and_config()?;

        let service = if self.loopback {
            LuckyService::loopback(config, &home, Arc::new(LoopbackDaemon::new().echo_publishes()))
        } else {
            let control = ProcessDaemon::new(&config.daemon_binary, &home)
                .with_spawn_timeout(config.spawn_timeout());
            LuckyService::new(
                config,
                &home,
                Arc::new(SocketLink::for_home(&home)),
                Arc::new(control),
            )
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;
        runtime.block_on(host(service))
    }
}

async fn host(service: LuckyService) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    service.notifier().bind(tx);
    let printer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            print_message(message);
        }
    });

    service.start().await.context("failed to start LuckyMe service")?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("ctrl-c handler failed")?;
            println!("interrupted, shutting down");
        }
        _ = service.wait_for_daemon_shutdown() => {
            println!("daemon shut down");
        }
    }

    service.stop().await;
    service.notifier().unbind();
    let _ = printer.await;
    Ok(())
}

fn print_message(message: ClientMessage) {
    match message {
        ClientMessage::ServiceStarted => println!("{}", "service started".green().bold()),
        ClientMessage::ServiceStopped => println!("{}", "service stopped".yellow().bold()),
        ClientMessage::NeighborUpdate => println!("neighbors changed"),
        ClientMessage::ObjectsSent(n) => println!("objects sent: {n}"),
        ClientMessage::ObjectsReceived(n) => println!("objects received: {n}"),
    }
}
