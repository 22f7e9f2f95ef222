//! spawner - Selector daemon for a pool of socket-serving worker processes
//!
//! `spawner serve -- <worker command>` runs the selector; `get`, `release`
//! and `shutdown` talk to a running one.

use clap::Parser;

mod commands;

use commands::Cli;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.execute() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
