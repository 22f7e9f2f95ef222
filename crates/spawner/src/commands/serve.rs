//! `spawner serve`: run the selector until SHUTDOWN or a signal

use super::SelectorArgs;
use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use worker_spawner::Selector;
use worker_spawner_core::logging;

/// Arguments for `spawner serve`
#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub selector: SelectorArgs,

    /// Maximum number of busy workers (default: unbounded)
    #[arg(long, value_name = "N")]
    pub max_processes: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Worker command; the worker's socket path is appended as its last
    /// argument
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

pub fn execute(args: ServeArgs) -> Result<()> {
    logging::init(args.verbose);

    let mut overrides = args.selector.overrides();
    overrides.max_processes = args.max_processes;
    overrides.worker_command = args.command;
    let config = worker_spawner_core::config::resolve_config(&overrides)
        .context("Failed to resolve configuration")?;

    info!(
        "Selector starting: socket dir {}, max processes {}",
        config.selector.socket_dir.display(),
        config
            .workers
            .max_processes
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
    );

    let selector = Selector::new(config).context("Failed to set up selector")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        tokio::spawn(cancel_on_signal(cancel.clone()));
        selector.run(cancel).await.context("Selector failed")
    })?;

    info!("Selector shutdown complete");
    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                if ctrl_c.await.is_err() {
                    return;
                }
                info!("Received SIGINT (Ctrl+C)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if ctrl_c.await.is_err() {
            warn!("Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C");
    }

    cancel.cancel();
}
