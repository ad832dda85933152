//! One peer's framed connection (the "C2" layer's per-connection side).
//!
//! Wraps a connected `UnixStream` and speaks whole frames: a [`Header`] plus
//! its TLV payload. Reads are only ever issued after the broker's poll loop
//! has observed the fd readable, so [`Connection::read_ready`] itself still
//! blocks within a single `recv` call — it just never blocks *waiting* for
//! readiness, since the caller already knows data is present. A read
//! returning zero bytes, or a header whose `payload_len` would need more
//! bytes than the peer ultimately sends before closing, is treated as
//! "connection lost" rather than retried.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use anyhow::{bail, Context, Result};

use super::super::codec::header::{Header, HEADER_LEN};

/// One fully-decoded frame: header plus raw (still TLV-encoded) payload
/// bytes. Callers dispatch on `header.msg_type` to pick the right
/// `messages::*Payload::decode`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Fixed 40-byte header.
    pub header: Header,
    /// TLV payload bytes, `header.payload_len` long.
    pub payload: Vec<u8>,
}

/// A connected, framed peer socket.
#[derive(Debug)]
pub struct Connection {
    stream: UnixStream,
    /// Bytes read from the socket but not yet assembled into a complete
    /// frame. A single `read_ready` call can return more than one frame's
    /// worth of bytes (or less than one), so frames are drained from here.
    buf: VecDeque<u8>,
    next_seq: u64,
}

impl Connection {
    /// Wrap an already-connected stream.
    #[must_use]
    pub fn new(stream: UnixStream) -> Self {
        Self { stream, buf: VecDeque::new(), next_seq: 1 }
    }

    /// Raw fd for this connection, for use in a `poll()` readiness check.
    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Read whatever bytes are currently available (call only once `poll`
    /// has reported this fd readable) and return every complete frame that
    /// can now be assembled. Partial trailing bytes remain buffered for the
    /// next call.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer closed the connection (`Ok(0)` from
    /// `read`), the underlying `read` syscall fails, or a decoded header
    /// fails validation (bad magic, oversized `payload_len`).
    pub fn read_ready(&mut self) -> Result<Vec<Frame>> {
        let mut chunk = [0u8; 64 * 1024];
        let n = self.stream.read(&mut chunk).context("read from peer")?;
        if n == 0 {
            bail!("connection lost: peer closed socket");
        }
        self.buf.extend(chunk[..n].iter().copied());

        let mut frames = Vec::new();
        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }
            let header_bytes: Vec<u8> = self.buf.iter().take(HEADER_LEN).copied().collect();
            let header = Header::decode(&header_bytes)?;
            #[allow(clippy::cast_possible_truncation, reason = "payload_len already validated against MAX_PAYLOAD_LEN")]
            let total_len = HEADER_LEN + header.payload_len as usize;
            if self.buf.len() < total_len {
                break; // wait for the rest of the payload
            }
            self.buf.drain(..HEADER_LEN);
            let payload: Vec<u8> = self.buf.drain(..header.payload_len as usize).collect();
            frames.push(Frame { header, payload });
        }
        Ok(frames)
    }

    /// Send one frame: a header (with `seq` filled from this connection's
    /// monotonic counter) followed by its payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying `write_all` fails (including a
    /// short write detected partway through, which `write_all` itself
    /// treats as an I/O error) — the caller should treat this the same as
    /// "connection lost".
    pub fn send(&mut self, msg_type: u16, request_id: u64, session_id: u64, window_id: u64, payload: &[u8]) -> Result<()> {
        #[allow(clippy::cast_possible_truncation, reason = "caller-provided payloads are bounded by MAX_PAYLOAD_LEN elsewhere")]
        let header = Header::new(msg_type, payload.len() as u32, self.next_seq, request_id, session_id, window_id)?;
        self.next_seq += 1;
        self.stream.write_all(&header.encode()).context("write frame header")?;
        self.stream.write_all(payload).context("write frame payload")?;
        Ok(())
    }

    /// Clone the underlying socket, e.g. to hand a read-only copy to a
    /// diagnostics consumer while this connection retains write access.
    pub fn try_clone(&self) -> Result<UnixStream> {
        self.stream.try_clone().context("clone connection socket")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::messages::MessageType;

    fn pair() -> (Connection, Connection) {
        let (a, b) = UnixStream::pair().unwrap();
        (Connection::new(a), Connection::new(b))
    }

    #[test]
    fn sends_and_receives_one_frame() {
        let (mut a, mut b) = pair();
        a.send(MessageType::Hello as u16, 0, 0, 0, b"payload-bytes").unwrap();
        let frames = b.read_ready().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.msg_type, MessageType::Hello as u16);
        assert_eq!(frames[0].payload, b"payload-bytes");
    }

    #[test]
    fn seq_increments_per_send() {
        let (mut a, mut b) = pair();
        a.send(MessageType::Hello as u16, 0, 0, 0, b"").unwrap();
        a.send(MessageType::Hello as u16, 0, 0, 0, b"").unwrap();
        let frames = b.read_ready().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].header.seq, 1);
        assert_eq!(frames[1].header.seq, 2);
    }

    #[test]
    fn partial_payload_is_buffered_until_complete() {
        let (raw_a, raw_b) = UnixStream::pair().unwrap();
        let mut b = Connection::new(raw_b);

        let header = crate::codec::header::Header::new(MessageType::ReqSetData as u16, 8, 1, 0, 0, 0).unwrap();
        let mut a = raw_a;
        a.write_all(&header.encode()).unwrap();
        a.write_all(&[1, 2, 3, 4]).unwrap();
        let frames = b.read_ready().unwrap();
        assert!(frames.is_empty(), "incomplete payload should not yield a frame yet");

        a.write_all(&[5, 6, 7, 8]).unwrap();
        let frames = b.read_ready().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn partial_header_is_buffered_until_complete() {
        let (raw_a, raw_b) = UnixStream::pair().unwrap();
        let mut b = Connection::new(raw_b);

        // Write only the first 10 bytes of a 40-byte header directly.
        let header = crate::codec::header::Header::new(MessageType::Hello as u16, 4, 1, 0, 0, 0).unwrap();
        let bytes = header.encode();
        let mut a = raw_a;
        a.write_all(&bytes[..10]).unwrap();
        let frames = b.read_ready().unwrap();
        assert!(frames.is_empty(), "incomplete header should not yield a frame yet");

        a.write_all(&bytes[10..]).unwrap();
        a.write_all(b"data").unwrap();
        let frames = b.read_ready().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"data");
    }

    #[test]
    fn peer_close_is_connection_lost() {
        let (a, mut b) = pair();
        drop(a);
        assert!(b.read_ready().is_err());
    }

    #[test]
    fn multiple_frames_in_one_read_are_all_returned() {
        let (mut a, mut b) = pair();
        a.send(MessageType::EvtHeartbeat as u16, 0, 1, 2, b"").unwrap();
        a.send(MessageType::EvtHeartbeat as u16, 0, 1, 2, b"").unwrap();
        a.send(MessageType::EvtHeartbeat as u16, 0, 1, 2, b"").unwrap();
        let frames = b.read_ready().unwrap();
        assert_eq!(frames.len(), 3);
    }
}
