//! Spectra broker: an out-of-process plotting IPC broker.
//!
//! A single [`broker::Broker`] process owns the authoritative figure model
//! ([`model`]) and the session graph of windows and figures ([`session`]),
//! speaks a length-prefixed binary protocol ([`codec`], [`transport`]) to
//! producer clients (figure sources) and renderer processes, and supervises
//! the renderer children it spawns ([`process`]).

pub mod broker;
pub mod codec;
pub mod error;
pub mod model;
pub mod process;
pub mod session;
pub mod transport;

pub use broker::Broker;
pub use error::{BrokerError, ErrorKind};
