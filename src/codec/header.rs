//! Fixed 40-byte message header shared by every frame on the wire.
//!
//! ```text
//! offset  size  field
//! 0       2     magic        b"SP"
//! 2       2     msg_type     u16 LE  (see MessageType)
//! 4       4     payload_len  u32 LE  (<= MAX_PAYLOAD_LEN)
//! 8       8     seq          u64 LE  monotonic per-connection send counter
//! 16      8     request_id   u64 LE  0 for unsolicited sends (events, pushes)
//! 24      8     session_id   u64 LE  0 before HELLO/WELCOME completes
//! 32      8     window_id    u64 LE  0 when not yet assigned to a window
//! ```
//!
//! All integers are little-endian. The payload itself (a TLV stream, see
//! [`super::tlv`]) follows immediately after these 40 bytes.

use anyhow::{bail, Result};

/// Two-byte magic identifying the start of a frame.
pub const MAGIC: [u8; 2] = *b"SP";

/// Size in bytes of the fixed header.
pub const HEADER_LEN: usize = 40;

/// Upper bound on `payload_len`: 256 MiB.
pub const MAX_PAYLOAD_LEN: u32 = 256 * 1024 * 1024;

/// The fixed header preceding every message's TLV payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message type discriminant (see [`super::messages::MessageType`]).
    pub msg_type: u16,
    /// Length in bytes of the TLV payload that follows this header.
    pub payload_len: u32,
    /// Monotonic per-connection send sequence number.
    pub seq: u64,
    /// Correlates a response to the request that produced it; 0 for
    /// unsolicited sends.
    pub request_id: u64,
    /// Session this frame belongs to; 0 before handshake completes.
    pub session_id: u64,
    /// Window this frame targets or originates from; 0 when not applicable.
    pub window_id: u64,
}

impl Header {
    /// Build a header, validating `payload_len` against [`MAX_PAYLOAD_LEN`].
    pub fn new(
        msg_type: u16,
        payload_len: u32,
        seq: u64,
        request_id: u64,
        session_id: u64,
        window_id: u64,
    ) -> Result<Self> {
        if payload_len > MAX_PAYLOAD_LEN {
            bail!("payload_len {payload_len} exceeds max {MAX_PAYLOAD_LEN}");
        }
        Ok(Self { msg_type, payload_len, seq, request_id, session_id, window_id })
    }

    /// Encode this header into its 40-byte wire representation.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&MAGIC);
        buf[2..4].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[4..8].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[8..16].copy_from_slice(&self.seq.to_le_bytes());
        buf[16..24].copy_from_slice(&self.request_id.to_le_bytes());
        buf[24..32].copy_from_slice(&self.session_id.to_le_bytes());
        buf[32..40].copy_from_slice(&self.window_id.to_le_bytes());
        buf
    }

    /// Decode a header from exactly [`HEADER_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `buf` is too short, the magic bytes don't match,
    /// or `payload_len` exceeds [`MAX_PAYLOAD_LEN`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            bail!("header buffer too short: {} < {HEADER_LEN}", buf.len());
        }
        if buf[0..2] != MAGIC {
            bail!("bad magic: {:?}", &buf[0..2]);
        }
        let msg_type = u16::from_le_bytes([buf[2], buf[3]]);
        let payload_len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if payload_len > MAX_PAYLOAD_LEN {
            bail!("payload_len {payload_len} exceeds max {MAX_PAYLOAD_LEN}");
        }
        let seq = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let request_id = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let session_id = u64::from_le_bytes(buf[24..32].try_into().unwrap());
        let window_id = u64::from_le_bytes(buf[32..40].try_into().unwrap());
        Ok(Self { msg_type, payload_len, seq, request_id, session_id, window_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        Header::new(0x0100, 128, 7, 42, 1, 3).unwrap()
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let h = sample();
        let bytes = h.encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        let decoded = Header::decode(&bytes).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn rejects_short_buffer() {
        let bytes = sample().encode();
        assert!(Header::decode(&bytes[..HEADER_LEN - 1]).is_err());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample().encode();
        bytes[0] = b'X';
        assert!(Header::decode(&bytes).is_err());
    }

    #[test]
    fn rejects_oversized_payload_len_on_construct() {
        assert!(Header::new(0x0100, MAX_PAYLOAD_LEN + 1, 0, 0, 0, 0).is_err());
    }

    #[test]
    fn rejects_oversized_payload_len_on_decode() {
        let mut bytes = sample().encode();
        bytes[4..8].copy_from_slice(&(MAX_PAYLOAD_LEN + 1).to_le_bytes());
        assert!(Header::decode(&bytes).is_err());
    }

    #[test]
    fn accepts_max_payload_len() {
        assert!(Header::new(0x0100, MAX_PAYLOAD_LEN, 0, 0, 0, 0).is_ok());
    }

    #[test]
    fn extra_trailing_bytes_are_ignored_by_decode() {
        let mut bytes = sample().encode().to_vec();
        bytes.extend_from_slice(b"trailing payload bytes");
        let decoded = Header::decode(&bytes).unwrap();
        assert_eq!(decoded, sample());
    }
}
