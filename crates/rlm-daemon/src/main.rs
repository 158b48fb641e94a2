//! rlm-daemon CLI entrypoint.
//!
//! ARCHITECTURE: thin I/O layer over the `rlm_daemon` library. Parses
//! arguments, validates the project root, wires up logging, then hands off
//! to [`rlm_daemon::Server`] for the rest of the process lifetime.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;

use rlm_daemon::{Dispatcher, Server};

const DEFAULT_PORT: u16 = 9177;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// A long-running local navigator daemon that lets a code-assistant client
/// explore a source repository at low token cost.
#[derive(Parser, Debug)]
#[command(name = "rlm-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Project root directory to watch and serve.
    #[arg(long, value_name = "PATH")]
    root: PathBuf,

    /// TCP port to bind; the next 19 ports are probed if this one is busy.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds of no accepted connection before the daemon exits on its
    /// own. 0 disables the idle watchdog.
    #[arg(long = "idle-timeout", default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    idle_timeout: u64,

    /// Tracing verbosity for the daemon's own log output.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("{} is not a directory", args.root.display()))?;
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }

    let dispatcher = Arc::new(Dispatcher::new(root.clone()));
    {
        // Runs on its own thread per spec.md §4.D: the initial chunk scan
        // must not block request serving.
        let dispatcher = Arc::clone(&dispatcher);
        let scan_root = root.clone();
        std::thread::spawn(move || dispatcher.chunks().full_scan(&scan_root));
    }

    let server = Server::bind(&root, args.port).context("failed to bind TCP listener")?;
    tracing::info!(
        root = %root.display(),
        port = server.port(),
        languages = ?rlm_core::available_languages(),
        "RLM daemon active"
    );

    server.run(dispatcher, Duration::from_secs(args.idle_timeout));
    Ok(())
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
