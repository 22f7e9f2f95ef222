//! Client-side subcommands: get, release, shutdown

use super::SelectorArgs;
use anyhow::{Context, Result, bail};
use clap::Args;
use worker_spawner_core::SelectorClient;

/// Arguments for `spawner release`
#[derive(Args, Debug)]
pub struct ReleaseArgs {
    #[command(flatten)]
    pub selector: SelectorArgs,

    /// Worker socket name previously returned by `get`
    pub name: String,
}

pub fn get(args: &SelectorArgs) -> Result<()> {
    let client = SelectorClient::from_config(&args.resolve()?);
    match client.get_worker().context("GET_WORKER failed")? {
        Some(name) => {
            println!("{name}");
            Ok(())
        }
        None => bail!("selector closed the connection without assigning a worker; retry later"),
    }
}

pub fn release(args: &ReleaseArgs) -> Result<()> {
    let client = SelectorClient::from_config(&args.selector.resolve()?);
    client
        .release_worker(&args.name)
        .with_context(|| format!("RELEASE_WORKER {} failed", args.name))
}

pub fn shutdown(args: &SelectorArgs) -> Result<()> {
    let client = SelectorClient::from_config(&args.resolve()?);
    client.shutdown().context("SHUTDOWN failed")
}
