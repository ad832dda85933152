//! Typed-tagged-value payload encoding.
//!
//! Every message payload is a flat stream of `tag:u8 len:u32(LE) bytes[len]`
//! entries. A decoder that doesn't recognize a tag skips `len` bytes and
//! moves on — this is what lets an older renderer ignore fields a newer
//! broker adds without choking on them.
//!
//! Composite values (a figure, an axes, a series, a diff op, a knob) are
//! encoded as a single blob tag whose bytes are themselves a nested TLV
//! stream; see [`super::messages`] and [`super::diff`] for the composite
//! encode/decode functions built on top of the primitives here.

use anyhow::{bail, Context, Result};

// ── Tag constants ────────────────────────────────────────────────────────
// Numeric values match the original wire format byte-for-byte so the Rust
// broker and any pre-existing renderer agree on the payload layout.

pub const TAG_PROTOCOL_MAJOR: u8 = 0x10;
pub const TAG_PROTOCOL_MINOR: u8 = 0x11;
pub const TAG_AGENT_BUILD: u8 = 0x12;
pub const TAG_CAPABILITIES: u8 = 0x13;
pub const TAG_SESSION_ID: u8 = 0x20;
pub const TAG_WINDOW_ID: u8 = 0x21;
pub const TAG_PROCESS_ID: u8 = 0x22;
pub const TAG_HEARTBEAT_MS: u8 = 0x23;
pub const TAG_MODE: u8 = 0x24;
pub const TAG_REQUEST_ID: u8 = 0x30;
pub const TAG_ERROR_CODE: u8 = 0x31;
pub const TAG_ERROR_MESSAGE: u8 = 0x32;
pub const TAG_FIGURE_ID: u8 = 0x40;
pub const TAG_FIGURE_IDS: u8 = 0x41;
pub const TAG_ACTIVE_FIGURE: u8 = 0x42;
pub const TAG_TEMPLATE_WINDOW: u8 = 0x43;
pub const TAG_REASON: u8 = 0x44;
pub const TAG_FIGURE_COUNT: u8 = 0x45;
pub const TAG_SOURCE_WINDOW: u8 = 0x46;
pub const TAG_SCREEN_X: u8 = 0x47;
pub const TAG_SCREEN_Y: u8 = 0x48;
pub const TAG_REVISION: u8 = 0x50;
pub const TAG_BASE_REVISION: u8 = 0x51;
pub const TAG_NEW_REVISION: u8 = 0x52;
pub const TAG_FIGURE_BLOB: u8 = 0x53;
pub const TAG_AXIS_BLOB: u8 = 0x54;
pub const TAG_SERIES_BLOB: u8 = 0x55;
pub const TAG_DIFF_OP_BLOB: u8 = 0x56;
pub const TAG_TITLE: u8 = 0x60;
pub const TAG_WIDTH: u8 = 0x61;
pub const TAG_HEIGHT: u8 = 0x62;
pub const TAG_GRID_ROWS: u8 = 0x63;
pub const TAG_GRID_COLS: u8 = 0x64;
pub const TAG_X_MIN: u8 = 0x65;
pub const TAG_X_MAX: u8 = 0x66;
pub const TAG_Y_MIN: u8 = 0x67;
pub const TAG_Y_MAX: u8 = 0x68;
pub const TAG_GRID_VISIBLE: u8 = 0x69;
pub const TAG_X_LABEL: u8 = 0x6A;
pub const TAG_Y_LABEL: u8 = 0x6B;
pub const TAG_SERIES_NAME: u8 = 0x6C;
pub const TAG_SERIES_TYPE: u8 = 0x6D;
pub const TAG_COLOR_R: u8 = 0x6E;
pub const TAG_COLOR_G: u8 = 0x6F;
pub const TAG_COLOR_B: u8 = 0x70;
pub const TAG_COLOR_A: u8 = 0x71;
pub const TAG_LINE_WIDTH: u8 = 0x72;
pub const TAG_MARKER_SIZE: u8 = 0x73;
pub const TAG_VISIBLE: u8 = 0x74;
pub const TAG_OPACITY_VAL: u8 = 0x75;
pub const TAG_POINT_COUNT: u8 = 0x76;
pub const TAG_SERIES_DATA: u8 = 0x77;
pub const TAG_WINDOW_GROUP: u8 = 0x78;
pub const TAG_KNOB_BLOB: u8 = 0x79;
pub const TAG_KNOB_NAME: u8 = 0x7A;
pub const TAG_KNOB_TYPE: u8 = 0x7B;
pub const TAG_KNOB_VALUE: u8 = 0x7C;
pub const TAG_KNOB_MIN: u8 = 0x7D;
pub const TAG_KNOB_MAX: u8 = 0x7E;
pub const TAG_KNOB_STEP: u8 = 0x7F;
pub const TAG_OP_TYPE: u8 = 0x80;
pub const TAG_AXES_INDEX: u8 = 0x81;
pub const TAG_SERIES_INDEX: u8 = 0x82;
pub const TAG_F1: u8 = 0x83;
pub const TAG_F2: u8 = 0x84;
pub const TAG_F3: u8 = 0x85;
pub const TAG_F4: u8 = 0x86;
pub const TAG_BOOL_VAL: u8 = 0x87;
pub const TAG_STR_VAL: u8 = 0x88;
pub const TAG_OP_DATA: u8 = 0x89;
pub const TAG_INPUT_TYPE: u8 = 0x90;
pub const TAG_KEY_CODE: u8 = 0x91;
pub const TAG_MODS: u8 = 0x92;
pub const TAG_CURSOR_X: u8 = 0x93;
pub const TAG_CURSOR_Y: u8 = 0x94;
pub const TAG_KNOB_CHOICE: u8 = 0xA0;
pub const TAG_Z_MIN: u8 = 0xA1;
pub const TAG_Z_MAX: u8 = 0xA2;
pub const TAG_IS_3D: u8 = 0xA3;
pub const TAG_GRID_INDEX: u8 = 0xA4;
pub const TAG_PROPERTY_NAME: u8 = 0xA5;
pub const TAG_PROPERTY_UPDATE_BLOB: u8 = 0xA6;

/// A single decoded `tag, bytes` pair. Composite/blob tags carry their
/// nested TLV stream verbatim in `bytes`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Tag byte identifying the field.
    pub tag: u8,
    /// Raw value bytes (interpretation depends on `tag`).
    pub bytes: Vec<u8>,
}

/// Accumulates `tag:len:bytes` entries into a flat payload buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Start an empty payload encoder.
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append a raw entry.
    pub fn put_bytes(&mut self, tag: u8, bytes: &[u8]) -> &mut Self {
        self.buf.push(tag);
        #[allow(clippy::cast_possible_truncation, reason = "caller bounds payload size below MAX_PAYLOAD_LEN")]
        self.buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append a u16 field.
    pub fn put_u16(&mut self, tag: u8, v: u16) -> &mut Self {
        self.put_bytes(tag, &v.to_le_bytes())
    }

    /// Append a u32 field.
    pub fn put_u32(&mut self, tag: u8, v: u32) -> &mut Self {
        self.put_bytes(tag, &v.to_le_bytes())
    }

    /// Append a u64 field.
    pub fn put_u64(&mut self, tag: u8, v: u64) -> &mut Self {
        self.put_bytes(tag, &v.to_le_bytes())
    }

    /// Append an f32 field.
    pub fn put_f32(&mut self, tag: u8, v: f32) -> &mut Self {
        self.put_bytes(tag, &v.to_le_bytes())
    }

    /// Append an f64 field.
    pub fn put_f64(&mut self, tag: u8, v: f64) -> &mut Self {
        self.put_bytes(tag, &v.to_le_bytes())
    }

    /// Append a bool field, encoded as a u16 (0 or 1) to match the original
    /// wire format.
    pub fn put_bool(&mut self, tag: u8, v: bool) -> &mut Self {
        self.put_u16(tag, u16::from(v))
    }

    /// Append a UTF-8 string field (not NUL-terminated; length-prefixed).
    pub fn put_string(&mut self, tag: u8, v: &str) -> &mut Self {
        self.put_bytes(tag, v.as_bytes())
    }

    /// Append a contiguous array of `f32` values.
    pub fn put_float_array(&mut self, tag: u8, v: &[f32]) -> &mut Self {
        let mut bytes = Vec::with_capacity(v.len() * 4);
        for x in v {
            bytes.extend_from_slice(&x.to_le_bytes());
        }
        self.put_bytes(tag, &bytes)
    }

    /// Append an already-encoded nested TLV stream as a blob field.
    pub fn put_blob(&mut self, tag: u8, nested: &Encoder) -> &mut Self {
        self.put_bytes(tag, &nested.buf)
    }

    /// Consume the encoder, returning the finished payload bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    /// Length of the payload built so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether no entries have been appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Parse a flat payload into its entries.
///
/// Unknown tags are preserved as entries (not dropped) — skipping an unknown
/// tag means "don't fail on it", not "discard it silently"; callers that
/// don't recognize a tag simply never look it up.
///
/// # Errors
///
/// Returns an error if the buffer ends mid-entry (a tag byte or length
/// prefix with no matching bytes).
pub fn decode(buf: &[u8]) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        if pos + 5 > buf.len() {
            bail!("truncated TLV entry header at offset {pos}");
        }
        let tag = buf[pos];
        let len = u32::from_le_bytes(buf[pos + 1..pos + 5].try_into().unwrap()) as usize;
        pos += 5;
        if pos + len > buf.len() {
            bail!("truncated TLV entry body at offset {pos} (len {len})");
        }
        entries.push(Entry { tag, bytes: buf[pos..pos + len].to_vec() });
        pos += len;
    }
    Ok(entries)
}

impl Entry {
    /// Interpret this entry's bytes as a u16.
    pub fn as_u16(&self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes[..].try_into().context("expected 2 bytes for u16")?))
    }

    /// Interpret this entry's bytes as a u32.
    pub fn as_u32(&self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes[..].try_into().context("expected 4 bytes for u32")?))
    }

    /// Interpret this entry's bytes as a u64.
    pub fn as_u64(&self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes[..].try_into().context("expected 8 bytes for u64")?))
    }

    /// Interpret this entry's bytes as an f32.
    pub fn as_f32(&self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.bytes[..].try_into().context("expected 4 bytes for f32")?))
    }

    /// Interpret this entry's bytes as an f64.
    pub fn as_f64(&self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.bytes[..].try_into().context("expected 8 bytes for f64")?))
    }

    /// Interpret this entry's bytes as a bool (stored on the wire as u16).
    pub fn as_bool(&self) -> Result<bool> {
        Ok(self.as_u16()? != 0)
    }

    /// Interpret this entry's bytes as a UTF-8 string.
    pub fn as_string(&self) -> Result<String> {
        Ok(String::from_utf8(self.bytes.clone())?)
    }

    /// Interpret this entry's bytes as a packed array of `f32`.
    pub fn as_float_array(&self) -> Result<Vec<f32>> {
        if self.bytes.len() % 4 != 0 {
            bail!("float array length {} not a multiple of 4", self.bytes.len());
        }
        Ok(self.bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect())
    }

    /// Parse this entry's bytes as a nested TLV stream.
    pub fn as_blob(&self) -> Result<Vec<Entry>> {
        decode(&self.bytes)
    }
}

/// Find the entry with the given tag. Repeated tags are last-write-wins, so
/// this returns the last match rather than the first.
#[must_use]
pub fn find(entries: &[Entry], tag: u8) -> Option<&Entry> {
    entries.iter().rev().find(|e| e.tag == tag)
}

/// Find every entry with the given tag, in order (used for repeated fields
/// like `TAG_FIGURE_IDS`).
pub fn find_all<'a>(entries: &'a [Entry], tag: u8) -> impl Iterator<Item = &'a Entry> {
    entries.iter().filter(move |e| e.tag == tag)
}

/// `find` + `as_u64`, erroring with the tag name if absent.
pub fn require_u64(entries: &[Entry], tag: u8, field: &str) -> Result<u64> {
    find(entries, tag).context(format!("missing required field {field} (tag {tag:#04x})"))?.as_u64()
}

/// `find` + `as_string`, erroring with the tag name if absent.
pub fn require_string(entries: &[Entry], tag: u8, field: &str) -> Result<String> {
    find(entries, tag).context(format!("missing required field {field} (tag {tag:#04x})"))?.as_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitive_types() {
        let mut enc = Encoder::new();
        enc.put_u16(TAG_PROTOCOL_MAJOR, 1)
            .put_u32(TAG_WIDTH, 1280)
            .put_u64(TAG_SESSION_ID, 99)
            .put_f32(TAG_COLOR_R, 0.5)
            .put_f64(TAG_X_MIN, -3.25)
            .put_bool(TAG_VISIBLE, true)
            .put_string(TAG_TITLE, "hello")
            .put_float_array(TAG_SERIES_DATA, &[1.0, 2.0, 3.0]);
        let payload = enc.finish();

        let entries = decode(&payload).unwrap();
        assert_eq!(find(&entries, TAG_PROTOCOL_MAJOR).unwrap().as_u16().unwrap(), 1);
        assert_eq!(find(&entries, TAG_WIDTH).unwrap().as_u32().unwrap(), 1280);
        assert_eq!(find(&entries, TAG_SESSION_ID).unwrap().as_u64().unwrap(), 99);
        assert!((find(&entries, TAG_COLOR_R).unwrap().as_f32().unwrap() - 0.5).abs() < f32::EPSILON);
        assert!((find(&entries, TAG_X_MIN).unwrap().as_f64().unwrap() + 3.25).abs() < f64::EPSILON);
        assert!(find(&entries, TAG_VISIBLE).unwrap().as_bool().unwrap());
        assert_eq!(find(&entries, TAG_TITLE).unwrap().as_string().unwrap(), "hello");
        assert_eq!(
            find(&entries, TAG_SERIES_DATA).unwrap().as_float_array().unwrap(),
            vec![1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn unknown_tags_are_preserved_not_fatal() {
        let mut enc = Encoder::new();
        enc.put_u16(0xEE, 7).put_u16(TAG_PROTOCOL_MAJOR, 1);
        let entries = decode(&enc.finish()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(find(&entries, TAG_PROTOCOL_MAJOR).unwrap().as_u16().unwrap(), 1);
    }

    #[test]
    fn nested_blob_round_trips() {
        let mut inner = Encoder::new();
        inner.put_string(TAG_SERIES_NAME, "trace-1");
        let mut outer = Encoder::new();
        outer.put_blob(TAG_SERIES_BLOB, &inner);

        let entries = decode(&outer.finish()).unwrap();
        let blob = find(&entries, TAG_SERIES_BLOB).unwrap().as_blob().unwrap();
        assert_eq!(find(&blob, TAG_SERIES_NAME).unwrap().as_string().unwrap(), "trace-1");
    }

    #[test]
    fn repeated_tags_all_recovered_in_order() {
        let mut enc = Encoder::new();
        enc.put_u64(TAG_FIGURE_IDS, 1).put_u64(TAG_FIGURE_IDS, 2).put_u64(TAG_FIGURE_IDS, 3);
        let entries = decode(&enc.finish()).unwrap();
        let ids: Vec<u64> = find_all(&entries, TAG_FIGURE_IDS).map(|e| e.as_u64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn find_returns_last_of_repeated_tags() {
        let mut enc = Encoder::new();
        enc.put_u64(TAG_FIGURE_IDS, 1).put_u64(TAG_FIGURE_IDS, 2).put_u64(TAG_FIGURE_IDS, 3);
        let entries = decode(&enc.finish()).unwrap();
        assert_eq!(find(&entries, TAG_FIGURE_IDS).unwrap().as_u64().unwrap(), 3);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let buf = [TAG_WIDTH, 0x01, 0x00]; // tag + partial length
        assert!(decode(&buf).is_err());
    }

    #[test]
    fn truncated_body_is_rejected() {
        let mut buf = vec![TAG_WIDTH];
        buf.extend_from_slice(&10u32.to_le_bytes());
        buf.extend_from_slice(&[1, 2, 3]); // claims 10 bytes, only 3 present
        assert!(decode(&buf).is_err());
    }

    #[test]
    fn require_helpers_error_with_context_on_missing_field() {
        let entries = decode(&Encoder::new().finish()).unwrap();
        let err = require_u64(&entries, TAG_SESSION_ID, "session_id").unwrap_err();
        assert!(err.to_string().contains("session_id"));
    }

    #[test]
    fn empty_payload_decodes_to_no_entries() {
        assert!(decode(&[]).unwrap().is_empty());
    }
}
