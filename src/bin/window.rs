//! `spectra-window`: a scriptable stand-in for a real renderer process.
//!
//! It speaks just enough of the renderer side of the wire protocol to
//! exercise the broker's spawn/assign/heartbeat/close contract end to end —
//! connect, `HELLO`, accept whatever the broker assigns, heartbeat on a
//! timer, and exit on `CMD_CLOSE_WINDOW` or a closed socket. It performs no
//! actual rendering; a real renderer is out of scope here.

use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use spectra_broker::codec::messages::{EvtHeartbeatPayload, HelloPayload, MessageType, WelcomePayload};
use spectra_broker::transport::connection::Connection;

/// A minimal renderer-contract stub.
#[derive(Parser, Debug)]
#[command(name = "spectra-window", version)]
struct WindowArgs {
    /// Unix socket path to connect to.
    #[arg(long)]
    socket: PathBuf,
}

/// How often this stub sends `EVT_HEARTBEAT`, independent of the broker's
/// advertised interval — a fixed cadence is enough to stay under any
/// reasonable heartbeat-timeout multiple.
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = WindowArgs::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))?;

    let stream = UnixStream::connect(&args.socket)
        .with_context(|| format!("connecting to {}", args.socket.display()))?;
    let mut conn = Connection::new(stream);

    let hello = HelloPayload {
        protocol_major: 1,
        protocol_minor: 0,
        agent_build: "spectra-window-stub/0.1".to_owned(),
        capabilities: 0,
        client_type: "agent".to_owned(),
    };
    conn.send(MessageType::Hello as u16, 0, 0, 0, &hello.encode())?;

    let mut window_id = 0u64;
    let mut session_id = 0u64;
    let mut last_heartbeat = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        let frames = match conn.read_ready() {
            Ok(frames) => frames,
            Err(e) => {
                log::info!("[window] connection lost: {e}");
                break;
            }
        };

        let mut closed = false;
        for frame in frames {
            let Ok(msg_type) = MessageType::from_u16(frame.header.msg_type) else { continue };
            match msg_type {
                MessageType::Welcome => {
                    if let Ok(welcome) = WelcomePayload::decode(&frame.payload) {
                        window_id = welcome.window_id;
                        session_id = welcome.session_id;
                        log::info!("[window] assigned window {window_id}");
                    }
                }
                MessageType::CmdCloseWindow => {
                    log::info!("[window] received CMD_CLOSE_WINDOW, exiting");
                    closed = true;
                }
                other => log::debug!("[window] received {other:?}"),
            }
        }
        if closed {
            break;
        }

        if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL && session_id != 0 {
            let evt = EvtHeartbeatPayload { window_id };
            if conn.send(MessageType::EvtHeartbeat as u16, 0, session_id, window_id, &evt.encode()).is_err() {
                break;
            }
            last_heartbeat = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(50));
    }

    log::info!("[window] shut down");
    Ok(())
}
