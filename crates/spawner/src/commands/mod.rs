//! CLI command dispatch and execution

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use worker_spawner_core::Config;
use worker_spawner_core::config::{ConfigOverrides, resolve_config};

mod client;
mod serve;

/// spawner - Selector daemon for a pool of worker processes
#[derive(Parser, Debug)]
#[command(
    name = "spawner",
    version,
    about = "Selector daemon for a pool of worker processes",
    long_about = "Hands out idle, self-tested worker processes over a Unix socket and \
                  starts new ones on demand up to a configured limit"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the selector in the foreground
    Serve(serve::ServeArgs),

    /// Ask a running selector for a worker and print its socket name
    Get(SelectorArgs),

    /// Return a worker to a running selector
    Release(client::ReleaseArgs),

    /// Stop a running selector and all of its workers
    Shutdown(SelectorArgs),
}

/// Options that locate a selector.
#[derive(Args, Debug, Clone, Default)]
pub struct SelectorArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding the selector and worker sockets
    #[arg(long, value_name = "DIR")]
    pub socket_dir: Option<PathBuf>,

    /// Name of the selector socket inside the socket directory
    #[arg(long, value_name = "NAME")]
    pub selector_name: Option<String>,
}

impl SelectorArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            socket_dir: self.socket_dir.clone(),
            selector_name: self.selector_name.clone(),
            ..Default::default()
        }
    }

    fn resolve(&self) -> Result<Config> {
        resolve_config(&self.overrides()).context("Failed to resolve configuration")
    }
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve(args) => serve::execute(args),
            Commands::Get(args) => client::get(&args),
            Commands::Release(args) => client::release(&args),
            Commands::Shutdown(args) => client::shutdown(&args),
        }
    }
}
