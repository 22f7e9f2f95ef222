//! Reference worker for integration testing.
//!
//! Usage: `echo-worker [--silent] <SOCKET_PATH>`
//!
//! Binds a Unix socket at the path given as the last argument and serves one
//! request per connection:
//!
//! - `SELF_TEST` + string: echoes the string back
//! - `SHUTDOWN`: exits with code 0 (used to simulate a worker dying while
//!   busy)
//!
//! With `--silent` the worker never binds its socket and sleeps until killed,
//! for startup-timeout testing.

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use worker_spawner_core::MessageTag;
use worker_spawner_core::framing::{read_string, read_tag, write_string};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(socket_path) = args.last().map(PathBuf::from) else {
        eprintln!("usage: echo-worker [--silent] <SOCKET_PATH>");
        std::process::exit(2);
    };

    if args.iter().any(|a| a == "--silent") {
        loop {
            std::thread::sleep(std::time::Duration::from_secs(3600));
        }
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("bind {} failed: {e}", socket_path.display());
            std::process::exit(1);
        }
    };
    println!("listening on {}", socket_path.display());

    for stream in listener.incoming() {
        let Ok(stream) = stream else { continue };
        if serve(stream) {
            // The socket file is left behind, as after a crash.
            println!("exiting on request");
            std::process::exit(0);
        }
    }
}

/// Handle one connection; returns true when asked to exit.
fn serve(mut stream: UnixStream) -> bool {
    match read_tag(&mut stream) {
        Ok(MessageTag::SelfTest) => {
            if let Ok(payload) = read_string(&mut stream) {
                let _ = write_string(&mut stream, &payload);
            }
            false
        }
        Ok(MessageTag::Shutdown) => true,
        Ok(other) => {
            eprintln!("ignoring unexpected {other}");
            false
        }
        Err(e) => {
            eprintln!("bad request: {e}");
            false
        }
    }
}
