//! Binary wire codec (the "C1" layer): fixed header, TLV payload encoding,
//! and the typed message/diff structs built on top of them.
//!
//! This layer has no knowledge of sockets or the figure model — it only
//! turns typed Rust values into bytes and back. [`super::transport`] moves
//! the bytes; [`super::model`] and [`super::broker`] give them meaning.

pub mod diff;
pub mod header;
pub mod messages;
pub mod tlv;
