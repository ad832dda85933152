//! The broker binary: bind the listen socket, run the event loop, and
//! shut down cleanly on `SIGINT`/`SIGTERM`.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use spectra_broker::transport::listener::default_socket_path;
use spectra_broker::Broker;

/// Out-of-process plotting broker.
#[derive(Parser, Debug)]
#[command(name = "spectra-broker")]
#[command(about = "Out-of-process plotting IPC broker")]
struct BrokerArgs {
    /// Unix domain socket path to listen on. Defaults to
    /// `$XDG_RUNTIME_DIR/spectra-default.sock` (or `/tmp` if unset).
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Heartbeat interval, in milliseconds, advertised to renderers in
    /// `WELCOME`. A window missing three consecutive heartbeats is
    /// considered stale.
    #[arg(long, default_value_t = 5000)]
    heartbeat_ms: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = BrokerArgs::parse();
    let socket_path = args.socket.unwrap_or_else(|| default_socket_path("default"));

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))?;

    let mut broker = Broker::new(&socket_path, args.heartbeat_ms)?;
    log::info!("[broker] listening on {}", broker.socket_path().display());
    broker.run(&shutdown)?;
    log::info!("[broker] shut down");
    Ok(())
}
