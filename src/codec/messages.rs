//! Message type discriminants and the payload structs that ride under each
//! header. Each payload struct round-trips through [`super::tlv::Encoder`]/
//! [`super::tlv::decode`] using the tag constants in [`super::tlv`].
//!
//! Numeric `MessageType` values match the original wire format so a renderer
//! built against that format and this broker agree on framing.

use anyhow::Result;

use super::diff::DiffOp;
use super::tlv::{self, Encoder, Entry};

/// Discriminant carried in the fixed header's `msg_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
#[allow(missing_docs, reason = "names are self-describing; see spec for semantics")]
pub enum MessageType {
    Hello = 0x0001,
    Welcome = 0x0002,
    RespOk = 0x0010,
    RespErr = 0x0011,
    ReqCreateWindow = 0x0100,
    ReqCloseWindow = 0x0101,
    ReqDetachFigure = 0x0102,
    ReqMoveFigure = 0x0103,
    ReqSnapshot = 0x0104,
    CmdAssignFigures = 0x0200,
    CmdRemoveFigure = 0x0201,
    CmdSetActive = 0x0202,
    CmdCloseWindow = 0x0203,
    StateSnapshot = 0x0300,
    StateDiff = 0x0301,
    AckState = 0x0302,
    EvtInput = 0x0400,
    EvtWindow = 0x0401,
    EvtTabDrag = 0x0402,
    EvtHeartbeat = 0x0403,
    ReqCreateFigure = 0x0500,
    ReqDestroyFigure = 0x0501,
    ReqCreateAxes = 0x0502,
    ReqAddSeries = 0x0503,
    ReqRemoveSeries = 0x0504,
    ReqSetData = 0x0505,
    ReqUpdateProperty = 0x0506,
    ReqShow = 0x0507,
    ReqCloseFigure = 0x0508,
    ReqAppendData = 0x0509,
    ReqUpdateBatch = 0x050A,
    ReqGetSnapshot = 0x0510,
    ReqListFigures = 0x0511,
    ReqReconnect = 0x0530,
    ReqDisconnect = 0x0531,
    RespFigureCreated = 0x0540,
    RespAxesCreated = 0x0541,
    RespSeriesAdded = 0x0542,
    RespSnapshot = 0x0543,
    RespFigureList = 0x0544,
    EvtWindowClosed = 0x0550,
    EvtFigureDestroyed = 0x0552,
}

impl MessageType {
    /// Recover a `MessageType` from its wire value.
    pub fn from_u16(v: u16) -> Result<Self> {
        use MessageType as M;
        Ok(match v {
            0x0001 => M::Hello,
            0x0002 => M::Welcome,
            0x0010 => M::RespOk,
            0x0011 => M::RespErr,
            0x0100 => M::ReqCreateWindow,
            0x0101 => M::ReqCloseWindow,
            0x0102 => M::ReqDetachFigure,
            0x0103 => M::ReqMoveFigure,
            0x0104 => M::ReqSnapshot,
            0x0200 => M::CmdAssignFigures,
            0x0201 => M::CmdRemoveFigure,
            0x0202 => M::CmdSetActive,
            0x0203 => M::CmdCloseWindow,
            0x0300 => M::StateSnapshot,
            0x0301 => M::StateDiff,
            0x0302 => M::AckState,
            0x0400 => M::EvtInput,
            0x0401 => M::EvtWindow,
            0x0402 => M::EvtTabDrag,
            0x0403 => M::EvtHeartbeat,
            0x0500 => M::ReqCreateFigure,
            0x0501 => M::ReqDestroyFigure,
            0x0502 => M::ReqCreateAxes,
            0x0503 => M::ReqAddSeries,
            0x0504 => M::ReqRemoveSeries,
            0x0505 => M::ReqSetData,
            0x0506 => M::ReqUpdateProperty,
            0x0507 => M::ReqShow,
            0x0508 => M::ReqCloseFigure,
            0x0509 => M::ReqAppendData,
            0x050A => M::ReqUpdateBatch,
            0x0510 => M::ReqGetSnapshot,
            0x0511 => M::ReqListFigures,
            0x0530 => M::ReqReconnect,
            0x0531 => M::ReqDisconnect,
            0x0540 => M::RespFigureCreated,
            0x0541 => M::RespAxesCreated,
            0x0542 => M::RespSeriesAdded,
            0x0543 => M::RespSnapshot,
            0x0544 => M::RespFigureList,
            0x0550 => M::EvtWindowClosed,
            0x0552 => M::EvtFigureDestroyed,
            other => anyhow::bail!("unknown message type {other:#06x}"),
        })
    }
}

fn opt_u64(entries: &[Entry], tag: u8) -> Result<u64> {
    Ok(tlv::find(entries, tag).map(Entry::as_u64).transpose()?.unwrap_or(0))
}

fn opt_u32(entries: &[Entry], tag: u8) -> Result<u32> {
    Ok(tlv::find(entries, tag).map(Entry::as_u32).transpose()?.unwrap_or(0))
}

fn opt_string(entries: &[Entry], tag: u8) -> Result<String> {
    Ok(tlv::find(entries, tag).map(Entry::as_string).transpose()?.unwrap_or_default())
}

fn opt_bool(entries: &[Entry], tag: u8, default: bool) -> Result<bool> {
    Ok(tlv::find(entries, tag).map(Entry::as_bool).transpose()?.unwrap_or(default))
}

fn opt_f64(entries: &[Entry], tag: u8, default: f64) -> Result<f64> {
    Ok(tlv::find(entries, tag).map(Entry::as_f64).transpose()?.unwrap_or(default))
}

// ── Handshake ────────────────────────────────────────────────────────────

/// `HELLO`: first frame sent by any peer right after connecting.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloPayload {
    pub protocol_major: u16,
    pub protocol_minor: u16,
    pub agent_build: String,
    pub capabilities: u32,
    /// `"python"` (producer-lite), `"agent"`/absent (renderer), or any other
    /// value sniffed from `agent_build` to distinguish a full producer.
    pub client_type: String,
}

impl Default for HelloPayload {
    fn default() -> Self {
        Self {
            protocol_major: 1,
            protocol_minor: 0,
            agent_build: String::new(),
            capabilities: 0,
            client_type: String::new(),
        }
    }
}

impl HelloPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u16(tlv::TAG_PROTOCOL_MAJOR, self.protocol_major)
            .put_u16(tlv::TAG_PROTOCOL_MINOR, self.protocol_minor)
            .put_string(tlv::TAG_AGENT_BUILD, &self.agent_build)
            .put_u32(tlv::TAG_CAPABILITIES, self.capabilities)
            .put_string(tlv::TAG_MODE, &self.client_type);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self {
            protocol_major: tlv::find(&entries, tlv::TAG_PROTOCOL_MAJOR)
                .map(Entry::as_u16)
                .transpose()?
                .unwrap_or(1),
            protocol_minor: tlv::find(&entries, tlv::TAG_PROTOCOL_MINOR)
                .map(Entry::as_u16)
                .transpose()?
                .unwrap_or(0),
            agent_build: opt_string(&entries, tlv::TAG_AGENT_BUILD)?,
            capabilities: opt_u32(&entries, tlv::TAG_CAPABILITIES)?,
            client_type: opt_string(&entries, tlv::TAG_MODE)?,
        })
    }
}

/// `WELCOME`: broker's reply to `HELLO`, assigning session/window identity.
#[derive(Debug, Clone, PartialEq)]
pub struct WelcomePayload {
    pub session_id: u64,
    pub window_id: u64,
    pub process_id: u32,
    pub heartbeat_ms: u32,
    pub mode: String,
}

impl Default for WelcomePayload {
    fn default() -> Self {
        Self { session_id: 0, window_id: 0, process_id: 0, heartbeat_ms: 5000, mode: String::new() }
    }
}

impl WelcomePayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_SESSION_ID, self.session_id)
            .put_u64(tlv::TAG_WINDOW_ID, self.window_id)
            .put_u32(tlv::TAG_PROCESS_ID, self.process_id)
            .put_u32(tlv::TAG_HEARTBEAT_MS, self.heartbeat_ms)
            .put_string(tlv::TAG_MODE, &self.mode);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self {
            session_id: opt_u64(&entries, tlv::TAG_SESSION_ID)?,
            window_id: opt_u64(&entries, tlv::TAG_WINDOW_ID)?,
            process_id: opt_u32(&entries, tlv::TAG_PROCESS_ID)?,
            heartbeat_ms: tlv::find(&entries, tlv::TAG_HEARTBEAT_MS)
                .map(Entry::as_u32)
                .transpose()?
                .unwrap_or(5000),
            mode: opt_string(&entries, tlv::TAG_MODE)?,
        })
    }
}

// ── Responses ────────────────────────────────────────────────────────────

/// `RESP_ERR`: carries an HTTP-style status code and a human-readable reason.
#[derive(Debug, Clone, PartialEq)]
pub struct RespErrPayload {
    pub request_id: u64,
    pub error_code: u16,
    pub error_message: String,
}

impl RespErrPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_REQUEST_ID, self.request_id)
            .put_u16(tlv::TAG_ERROR_CODE, self.error_code)
            .put_string(tlv::TAG_ERROR_MESSAGE, &self.error_message);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self {
            request_id: opt_u64(&entries, tlv::TAG_REQUEST_ID)?,
            error_code: tlv::find(&entries, tlv::TAG_ERROR_CODE).map(Entry::as_u16).transpose()?.unwrap_or(500),
            error_message: opt_string(&entries, tlv::TAG_ERROR_MESSAGE)?,
        })
    }
}

// ── Window lifecycle (renderer/window manager surface) ──────────────────

/// `REQ_CREATE_WINDOW`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReqCreateWindowPayload {
    pub template_window: u64,
}

impl ReqCreateWindowPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_TEMPLATE_WINDOW, self.template_window);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { template_window: opt_u64(&entries, tlv::TAG_TEMPLATE_WINDOW)? })
    }
}

/// `REQ_CLOSE_WINDOW` / `CMD_CLOSE_WINDOW`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowIdPayload {
    pub window_id: u64,
}

impl WindowIdPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_WINDOW_ID, self.window_id);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { window_id: opt_u64(&entries, tlv::TAG_WINDOW_ID)? })
    }
}

/// `REQ_DETACH_FIGURE`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReqDetachFigurePayload {
    pub figure_id: u64,
    pub source_window: u64,
}

impl ReqDetachFigurePayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_FIGURE_ID, self.figure_id).put_u64(tlv::TAG_SOURCE_WINDOW, self.source_window);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self {
            figure_id: opt_u64(&entries, tlv::TAG_FIGURE_ID)?,
            source_window: opt_u64(&entries, tlv::TAG_SOURCE_WINDOW)?,
        })
    }
}

/// `REQ_MOVE_FIGURE`: drag a tab from one window to another, optionally at a
/// screen position (used to decide whether to spawn a brand new window).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReqMoveFigurePayload {
    pub figure_id: u64,
    pub source_window: u64,
    pub screen_x: f64,
    pub screen_y: f64,
}

impl ReqMoveFigurePayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_FIGURE_ID, self.figure_id)
            .put_u64(tlv::TAG_SOURCE_WINDOW, self.source_window)
            .put_f64(tlv::TAG_SCREEN_X, self.screen_x)
            .put_f64(tlv::TAG_SCREEN_Y, self.screen_y);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self {
            figure_id: opt_u64(&entries, tlv::TAG_FIGURE_ID)?,
            source_window: opt_u64(&entries, tlv::TAG_SOURCE_WINDOW)?,
            screen_x: opt_f64(&entries, tlv::TAG_SCREEN_X, 0.0)?,
            screen_y: opt_f64(&entries, tlv::TAG_SCREEN_Y, 0.0)?,
        })
    }
}

/// `CMD_ASSIGN_FIGURES`: broker tells a renderer which figures it now owns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CmdAssignFiguresPayload {
    pub figure_ids: Vec<u64>,
    pub active_figure: u64,
}

impl CmdAssignFiguresPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        for id in &self.figure_ids {
            enc.put_u64(tlv::TAG_FIGURE_IDS, *id);
        }
        enc.put_u64(tlv::TAG_ACTIVE_FIGURE, self.active_figure);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        let figure_ids =
            tlv::find_all(&entries, tlv::TAG_FIGURE_IDS).map(Entry::as_u64).collect::<Result<Vec<_>>>()?;
        Ok(Self { figure_ids, active_figure: opt_u64(&entries, tlv::TAG_ACTIVE_FIGURE)? })
    }
}

/// `CMD_REMOVE_FIGURE`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CmdRemoveFigurePayload {
    pub figure_id: u64,
    pub reason: String,
}

impl CmdRemoveFigurePayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_FIGURE_ID, self.figure_id).put_string(tlv::TAG_REASON, &self.reason);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { figure_id: opt_u64(&entries, tlv::TAG_FIGURE_ID)?, reason: opt_string(&entries, tlv::TAG_REASON)? })
    }
}

/// `CMD_SET_ACTIVE`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CmdSetActivePayload {
    pub figure_id: u64,
}

impl CmdSetActivePayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_ACTIVE_FIGURE, self.figure_id);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { figure_id: opt_u64(&entries, tlv::TAG_ACTIVE_FIGURE)? })
    }
}

// ── State sync ────────────────────────────────────────────────────────────

/// Snapshot of one knob (interactive control widget) at a point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotKnobState {
    pub name: String,
    pub knob_type: u16,
    pub value: f64,
    pub min_val: f64,
    pub max_val: f64,
    pub step: f64,
    pub choices: Vec<String>,
}

impl SnapshotKnobState {
    fn encode_into(&self, enc: &mut Encoder) {
        let mut inner = Encoder::new();
        inner
            .put_string(tlv::TAG_KNOB_NAME, &self.name)
            .put_u16(tlv::TAG_KNOB_TYPE, self.knob_type)
            .put_f64(tlv::TAG_KNOB_VALUE, self.value)
            .put_f64(tlv::TAG_KNOB_MIN, self.min_val)
            .put_f64(tlv::TAG_KNOB_MAX, self.max_val)
            .put_f64(tlv::TAG_KNOB_STEP, self.step);
        for choice in &self.choices {
            inner.put_string(tlv::TAG_KNOB_CHOICE, choice);
        }
        enc.put_blob(tlv::TAG_KNOB_BLOB, &inner);
    }

    fn decode_from(entries: &[Entry]) -> Result<Self> {
        Ok(Self {
            name: opt_string(entries, tlv::TAG_KNOB_NAME)?,
            knob_type: tlv::find(entries, tlv::TAG_KNOB_TYPE).map(Entry::as_u16).transpose()?.unwrap_or(0),
            value: opt_f64(entries, tlv::TAG_KNOB_VALUE, 0.0)?,
            min_val: opt_f64(entries, tlv::TAG_KNOB_MIN, 0.0)?,
            max_val: opt_f64(entries, tlv::TAG_KNOB_MAX, 1.0)?,
            step: opt_f64(entries, tlv::TAG_KNOB_STEP, 0.0)?,
            choices: tlv::find_all(entries, tlv::TAG_KNOB_CHOICE).map(Entry::as_string).collect::<Result<Vec<_>>>()?,
        })
    }
}

/// Snapshot of one series (a single plotted trace) at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSeriesState {
    pub name: String,
    pub series_type: String,
    pub color_r: f32,
    pub color_g: f32,
    pub color_b: f32,
    pub color_a: f32,
    pub line_width: f32,
    pub marker_size: f32,
    pub visible: bool,
    pub opacity: f32,
    pub axes_index: u32,
    pub data: Vec<f32>,
}

impl Default for SnapshotSeriesState {
    fn default() -> Self {
        Self {
            name: String::new(),
            series_type: String::new(),
            color_r: 1.0,
            color_g: 1.0,
            color_b: 1.0,
            color_a: 1.0,
            line_width: 2.0,
            marker_size: 6.0,
            visible: true,
            opacity: 1.0,
            axes_index: 0,
            data: Vec::new(),
        }
    }
}

impl SnapshotSeriesState {
    fn encode_into(&self, enc: &mut Encoder) {
        let mut inner = Encoder::new();
        #[allow(clippy::cast_possible_truncation, reason = "point counts fit comfortably in u32")]
        let point_count = (self.data.len() / 2) as u32;
        inner
            .put_string(tlv::TAG_SERIES_NAME, &self.name)
            .put_string(tlv::TAG_SERIES_TYPE, &self.series_type)
            .put_f32(tlv::TAG_COLOR_R, self.color_r)
            .put_f32(tlv::TAG_COLOR_G, self.color_g)
            .put_f32(tlv::TAG_COLOR_B, self.color_b)
            .put_f32(tlv::TAG_COLOR_A, self.color_a)
            .put_f32(tlv::TAG_LINE_WIDTH, self.line_width)
            .put_f32(tlv::TAG_MARKER_SIZE, self.marker_size)
            .put_bool(tlv::TAG_VISIBLE, self.visible)
            .put_f32(tlv::TAG_OPACITY_VAL, self.opacity)
            .put_u32(tlv::TAG_POINT_COUNT, point_count)
            .put_u32(tlv::TAG_AXES_INDEX, self.axes_index)
            .put_float_array(tlv::TAG_SERIES_DATA, &self.data);
        enc.put_blob(tlv::TAG_SERIES_BLOB, &inner);
    }

    fn decode_from(entries: &[Entry]) -> Result<Self> {
        Ok(Self {
            name: opt_string(entries, tlv::TAG_SERIES_NAME)?,
            series_type: opt_string(entries, tlv::TAG_SERIES_TYPE)?,
            color_r: tlv::find(entries, tlv::TAG_COLOR_R).map(Entry::as_f32).transpose()?.unwrap_or(1.0),
            color_g: tlv::find(entries, tlv::TAG_COLOR_G).map(Entry::as_f32).transpose()?.unwrap_or(1.0),
            color_b: tlv::find(entries, tlv::TAG_COLOR_B).map(Entry::as_f32).transpose()?.unwrap_or(1.0),
            color_a: tlv::find(entries, tlv::TAG_COLOR_A).map(Entry::as_f32).transpose()?.unwrap_or(1.0),
            line_width: tlv::find(entries, tlv::TAG_LINE_WIDTH).map(Entry::as_f32).transpose()?.unwrap_or(2.0),
            marker_size: tlv::find(entries, tlv::TAG_MARKER_SIZE).map(Entry::as_f32).transpose()?.unwrap_or(6.0),
            visible: opt_bool(entries, tlv::TAG_VISIBLE, true)?,
            opacity: tlv::find(entries, tlv::TAG_OPACITY_VAL).map(Entry::as_f32).transpose()?.unwrap_or(1.0),
            axes_index: opt_u32(entries, tlv::TAG_AXES_INDEX)?,
            data: tlv::find(entries, tlv::TAG_SERIES_DATA).map(Entry::as_float_array).transpose()?.unwrap_or_default(),
        })
    }
}

/// Snapshot of one axes (a plot area with its own limits/labels) at a point
/// in time.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotAxisState {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
    pub grid_visible: bool,
    pub is_3d: bool,
    pub x_label: String,
    pub y_label: String,
    pub title: String,
    pub series: Vec<SnapshotSeriesState>,
}

impl Default for SnapshotAxisState {
    fn default() -> Self {
        Self {
            x_min: 0.0,
            x_max: 1.0,
            y_min: 0.0,
            y_max: 1.0,
            z_min: 0.0,
            z_max: 1.0,
            grid_visible: true,
            is_3d: false,
            x_label: String::new(),
            y_label: String::new(),
            title: String::new(),
            series: Vec::new(),
        }
    }
}

impl SnapshotAxisState {
    fn encode_into(&self, enc: &mut Encoder) {
        let mut inner = Encoder::new();
        inner
            .put_f64(tlv::TAG_X_MIN, self.x_min)
            .put_f64(tlv::TAG_X_MAX, self.x_max)
            .put_f64(tlv::TAG_Y_MIN, self.y_min)
            .put_f64(tlv::TAG_Y_MAX, self.y_max)
            .put_f64(tlv::TAG_Z_MIN, self.z_min)
            .put_f64(tlv::TAG_Z_MAX, self.z_max)
            .put_bool(tlv::TAG_GRID_VISIBLE, self.grid_visible)
            .put_bool(tlv::TAG_IS_3D, self.is_3d)
            .put_string(tlv::TAG_X_LABEL, &self.x_label)
            .put_string(tlv::TAG_Y_LABEL, &self.y_label)
            .put_string(tlv::TAG_TITLE, &self.title);
        for series in &self.series {
            series.encode_into(&mut inner);
        }
        enc.put_blob(tlv::TAG_AXIS_BLOB, &inner);
    }

    fn decode_from(entries: &[Entry]) -> Result<Self> {
        let mut series = Vec::new();
        for entry in tlv::find_all(entries, tlv::TAG_SERIES_BLOB) {
            series.push(SnapshotSeriesState::decode_from(&entry.as_blob()?)?);
        }
        Ok(Self {
            x_min: opt_f64(entries, tlv::TAG_X_MIN, 0.0)?,
            x_max: opt_f64(entries, tlv::TAG_X_MAX, 1.0)?,
            y_min: opt_f64(entries, tlv::TAG_Y_MIN, 0.0)?,
            y_max: opt_f64(entries, tlv::TAG_Y_MAX, 1.0)?,
            z_min: opt_f64(entries, tlv::TAG_Z_MIN, 0.0)?,
            z_max: opt_f64(entries, tlv::TAG_Z_MAX, 1.0)?,
            grid_visible: opt_bool(entries, tlv::TAG_GRID_VISIBLE, true)?,
            is_3d: opt_bool(entries, tlv::TAG_IS_3D, false)?,
            x_label: opt_string(entries, tlv::TAG_X_LABEL)?,
            y_label: opt_string(entries, tlv::TAG_Y_LABEL)?,
            title: opt_string(entries, tlv::TAG_TITLE)?,
            series,
        })
    }
}

/// Snapshot of one figure (a window's worth of axes) at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotFigureState {
    pub figure_id: u64,
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub grid_rows: u32,
    pub grid_cols: u32,
    pub window_group: u64,
    pub axes: Vec<SnapshotAxisState>,
}

impl Default for SnapshotFigureState {
    fn default() -> Self {
        Self {
            figure_id: 0,
            title: String::new(),
            width: 1280,
            height: 720,
            grid_rows: 1,
            grid_cols: 1,
            window_group: 0,
            axes: Vec::new(),
        }
    }
}

impl SnapshotFigureState {
    fn encode_into(&self, enc: &mut Encoder) {
        let mut inner = Encoder::new();
        inner
            .put_u64(tlv::TAG_FIGURE_ID, self.figure_id)
            .put_string(tlv::TAG_TITLE, &self.title)
            .put_u32(tlv::TAG_WIDTH, self.width)
            .put_u32(tlv::TAG_HEIGHT, self.height)
            .put_u32(tlv::TAG_GRID_ROWS, self.grid_rows)
            .put_u32(tlv::TAG_GRID_COLS, self.grid_cols)
            .put_u64(tlv::TAG_WINDOW_GROUP, self.window_group);
        for axis in &self.axes {
            axis.encode_into(&mut inner);
        }
        enc.put_blob(tlv::TAG_FIGURE_BLOB, &inner);
    }

    fn decode_from(entries: &[Entry]) -> Result<Self> {
        let mut axes = Vec::new();
        for entry in tlv::find_all(entries, tlv::TAG_AXIS_BLOB) {
            axes.push(SnapshotAxisState::decode_from(&entry.as_blob()?)?);
        }
        Ok(Self {
            figure_id: opt_u64(entries, tlv::TAG_FIGURE_ID)?,
            title: opt_string(entries, tlv::TAG_TITLE)?,
            width: tlv::find(entries, tlv::TAG_WIDTH).map(Entry::as_u32).transpose()?.unwrap_or(1280),
            height: tlv::find(entries, tlv::TAG_HEIGHT).map(Entry::as_u32).transpose()?.unwrap_or(720),
            grid_rows: tlv::find(entries, tlv::TAG_GRID_ROWS).map(Entry::as_u32).transpose()?.unwrap_or(1),
            grid_cols: tlv::find(entries, tlv::TAG_GRID_COLS).map(Entry::as_u32).transpose()?.unwrap_or(1),
            window_group: opt_u64(entries, tlv::TAG_WINDOW_GROUP)?,
            axes,
        })
    }
}

/// `STATE_SNAPSHOT`: full authoritative state for one or more figures, sent
/// on initial assignment and on reconnect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshotPayload {
    pub revision: u64,
    pub figures: Vec<SnapshotFigureState>,
    pub knobs: Vec<SnapshotKnobState>,
}

impl StateSnapshotPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_REVISION, self.revision);
        for figure in &self.figures {
            figure.encode_into(&mut enc);
        }
        for knob in &self.knobs {
            knob.encode_into(&mut enc);
        }
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        let mut figures = Vec::new();
        for entry in tlv::find_all(&entries, tlv::TAG_FIGURE_BLOB) {
            figures.push(SnapshotFigureState::decode_from(&entry.as_blob()?)?);
        }
        let mut knobs = Vec::new();
        for entry in tlv::find_all(&entries, tlv::TAG_KNOB_BLOB) {
            knobs.push(SnapshotKnobState::decode_from(&entry.as_blob()?)?);
        }
        Ok(Self { revision: opt_u64(&entries, tlv::TAG_REVISION)?, figures, knobs })
    }
}

/// `STATE_DIFF`: one or more incremental mutations since `base_revision`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDiffPayload {
    pub base_revision: u64,
    pub new_revision: u64,
    pub ops: Vec<DiffOp>,
}

impl StateDiffPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_BASE_REVISION, self.base_revision).put_u64(tlv::TAG_NEW_REVISION, self.new_revision);
        for op in &self.ops {
            enc.put_blob(tlv::TAG_DIFF_OP_BLOB, &op.encode());
        }
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        let mut ops = Vec::new();
        for entry in tlv::find_all(&entries, tlv::TAG_DIFF_OP_BLOB) {
            ops.push(DiffOp::decode(&entry.as_blob()?)?);
        }
        Ok(Self {
            base_revision: opt_u64(&entries, tlv::TAG_BASE_REVISION)?,
            new_revision: opt_u64(&entries, tlv::TAG_NEW_REVISION)?,
            ops,
        })
    }
}

/// `ACK_STATE`: renderer confirms it has applied up to `revision`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AckStatePayload {
    pub revision: u64,
}

impl AckStatePayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_REVISION, self.revision);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { revision: opt_u64(&entries, tlv::TAG_REVISION)? })
    }
}

// ── Renderer input/window events ─────────────────────────────────────────

/// Discriminant for [`EvtInputPayload::input_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum InputType {
    KeyPress = 1,
    KeyRelease = 2,
    MouseButton = 3,
    MouseMove = 4,
    Scroll = 5,
}

impl InputType {
    fn from_u16(v: u16) -> Result<Self> {
        Ok(match v {
            1 => Self::KeyPress,
            2 => Self::KeyRelease,
            3 => Self::MouseButton,
            4 => Self::MouseMove,
            5 => Self::Scroll,
            other => anyhow::bail!("unknown input type {other}"),
        })
    }
}

/// `EVT_INPUT`: a renderer-local input event forwarded upstream (used for
/// e.g. scroll-to-zoom translated into a `REQ_UPDATE_PROPERTY`/DiffOp by the
/// broker, or passed straight through to a producer that wants raw input).
#[derive(Debug, Clone, PartialEq)]
pub struct EvtInputPayload {
    pub window_id: u64,
    pub input_type: InputType,
    pub key_code: u32,
    pub mods: u32,
    pub cursor_x: f64,
    pub cursor_y: f64,
    pub figure_id: u64,
    pub axes_index: u32,
}

impl EvtInputPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_WINDOW_ID, self.window_id)
            .put_u16(tlv::TAG_INPUT_TYPE, self.input_type as u16)
            .put_u32(tlv::TAG_KEY_CODE, self.key_code)
            .put_u32(tlv::TAG_MODS, self.mods)
            .put_f64(tlv::TAG_CURSOR_X, self.cursor_x)
            .put_f64(tlv::TAG_CURSOR_Y, self.cursor_y)
            .put_u64(tlv::TAG_FIGURE_ID, self.figure_id)
            .put_u32(tlv::TAG_AXES_INDEX, self.axes_index);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        let input_type = InputType::from_u16(
            tlv::find(&entries, tlv::TAG_INPUT_TYPE).map(Entry::as_u16).transpose()?.unwrap_or(4),
        )?;
        Ok(Self {
            window_id: opt_u64(&entries, tlv::TAG_WINDOW_ID)?,
            input_type,
            key_code: opt_u32(&entries, tlv::TAG_KEY_CODE)?,
            mods: opt_u32(&entries, tlv::TAG_MODS)?,
            cursor_x: opt_f64(&entries, tlv::TAG_CURSOR_X, 0.0)?,
            cursor_y: opt_f64(&entries, tlv::TAG_CURSOR_Y, 0.0)?,
            figure_id: opt_u64(&entries, tlv::TAG_FIGURE_ID)?,
            axes_index: opt_u32(&entries, tlv::TAG_AXES_INDEX)?,
        })
    }
}

/// `EVT_HEARTBEAT`: renderer liveness ping, expected at `heartbeat_ms` cadence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvtHeartbeatPayload {
    pub window_id: u64,
}

impl EvtHeartbeatPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_WINDOW_ID, self.window_id);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { window_id: opt_u64(&entries, tlv::TAG_WINDOW_ID)? })
    }
}

/// `EVT_WINDOW_CLOSED`: renderer reports its OS window was closed by the user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvtWindowClosedPayload {
    pub window_id: u64,
}

impl EvtWindowClosedPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_WINDOW_ID, self.window_id);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { window_id: opt_u64(&entries, tlv::TAG_WINDOW_ID)? })
    }
}

/// `EVT_FIGURE_DESTROYED`: producer or broker reports a figure no longer exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvtFigureDestroyedPayload {
    pub figure_id: u64,
}

impl EvtFigureDestroyedPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_FIGURE_ID, self.figure_id);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { figure_id: opt_u64(&entries, tlv::TAG_FIGURE_ID)? })
    }
}

/// `EVT_TAB_DRAG`: renderer reports a figure tab is being dragged toward
/// screen coordinates, ahead of an eventual `REQ_MOVE_FIGURE`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvtTabDragPayload {
    pub figure_id: u64,
    pub source_window: u64,
    pub screen_x: f64,
    pub screen_y: f64,
}

impl EvtTabDragPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_FIGURE_ID, self.figure_id)
            .put_u64(tlv::TAG_SOURCE_WINDOW, self.source_window)
            .put_f64(tlv::TAG_SCREEN_X, self.screen_x)
            .put_f64(tlv::TAG_SCREEN_Y, self.screen_y);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self {
            figure_id: opt_u64(&entries, tlv::TAG_FIGURE_ID)?,
            source_window: opt_u64(&entries, tlv::TAG_SOURCE_WINDOW)?,
            screen_x: opt_f64(&entries, tlv::TAG_SCREEN_X, 0.0)?,
            screen_y: opt_f64(&entries, tlv::TAG_SCREEN_Y, 0.0)?,
        })
    }
}

// ── Producer figure-authoring surface ────────────────────────────────────

/// `REQ_CREATE_FIGURE`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReqCreateFigurePayload {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub window_group: u64,
}

impl ReqCreateFigurePayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_string(tlv::TAG_TITLE, &self.title)
            .put_u32(tlv::TAG_WIDTH, self.width)
            .put_u32(tlv::TAG_HEIGHT, self.height)
            .put_u64(tlv::TAG_WINDOW_GROUP, self.window_group);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self {
            title: opt_string(&entries, tlv::TAG_TITLE)?,
            width: tlv::find(&entries, tlv::TAG_WIDTH).map(Entry::as_u32).transpose()?.unwrap_or(1280),
            height: tlv::find(&entries, tlv::TAG_HEIGHT).map(Entry::as_u32).transpose()?.unwrap_or(720),
            window_group: opt_u64(&entries, tlv::TAG_WINDOW_GROUP)?,
        })
    }
}

/// `REQ_DESTROY_FIGURE` / `REQ_CLOSE_FIGURE`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FigureIdPayload {
    pub figure_id: u64,
}

impl FigureIdPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_FIGURE_ID, self.figure_id);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { figure_id: opt_u64(&entries, tlv::TAG_FIGURE_ID)? })
    }
}

/// `RESP_AXES_CREATED`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RespAxesCreatedPayload {
    pub axes_index: u32,
}

impl RespAxesCreatedPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u32(tlv::TAG_AXES_INDEX, self.axes_index);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { axes_index: opt_u32(&entries, tlv::TAG_AXES_INDEX)? })
    }
}

/// `RESP_SERIES_ADDED`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RespSeriesAddedPayload {
    pub series_index: u32,
}

impl RespSeriesAddedPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u32(tlv::TAG_SERIES_INDEX, self.series_index);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { series_index: opt_u32(&entries, tlv::TAG_SERIES_INDEX)? })
    }
}

/// `REQ_CREATE_AXES`. `grid_rows`/`grid_cols`/`grid_index` let a producer lay
/// out a known subplot grid up front rather than relying on the figure's
/// grow-as-you-go default; a figure whose grid is already at least this size
/// is left alone, matching [`crate::model::figure::Figure::ensure_grid_fits`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReqCreateAxesPayload {
    pub figure_id: u64,
    pub grid_rows: u32,
    pub grid_cols: u32,
    pub grid_index: u32,
    pub is_3d: bool,
    pub x_label: String,
    pub y_label: String,
    pub title: String,
}

impl ReqCreateAxesPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_FIGURE_ID, self.figure_id)
            .put_u32(tlv::TAG_GRID_ROWS, self.grid_rows)
            .put_u32(tlv::TAG_GRID_COLS, self.grid_cols)
            .put_u32(tlv::TAG_GRID_INDEX, self.grid_index)
            .put_bool(tlv::TAG_IS_3D, self.is_3d)
            .put_string(tlv::TAG_X_LABEL, &self.x_label)
            .put_string(tlv::TAG_Y_LABEL, &self.y_label)
            .put_string(tlv::TAG_TITLE, &self.title);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self {
            figure_id: opt_u64(&entries, tlv::TAG_FIGURE_ID)?,
            grid_rows: tlv::find(&entries, tlv::TAG_GRID_ROWS).map(Entry::as_u32).transpose()?.unwrap_or(1),
            grid_cols: tlv::find(&entries, tlv::TAG_GRID_COLS).map(Entry::as_u32).transpose()?.unwrap_or(1),
            grid_index: opt_u32(&entries, tlv::TAG_GRID_INDEX)?,
            is_3d: opt_bool(&entries, tlv::TAG_IS_3D, false)?,
            x_label: opt_string(&entries, tlv::TAG_X_LABEL)?,
            y_label: opt_string(&entries, tlv::TAG_Y_LABEL)?,
            title: opt_string(&entries, tlv::TAG_TITLE)?,
        })
    }
}

/// `REQ_ADD_SERIES`
#[derive(Debug, Clone, PartialEq)]
pub struct ReqAddSeriesPayload {
    pub figure_id: u64,
    pub axes_index: u32,
    pub series: SnapshotSeriesState,
}

impl ReqAddSeriesPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_FIGURE_ID, self.figure_id).put_u32(tlv::TAG_AXES_INDEX, self.axes_index);
        self.series.encode_into(&mut enc);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        let series_entry = tlv::find(&entries, tlv::TAG_SERIES_BLOB)
            .ok_or_else(|| anyhow::anyhow!("REQ_ADD_SERIES missing series blob"))?;
        Ok(Self {
            figure_id: opt_u64(&entries, tlv::TAG_FIGURE_ID)?,
            axes_index: opt_u32(&entries, tlv::TAG_AXES_INDEX)?,
            series: SnapshotSeriesState::decode_from(&series_entry.as_blob()?)?,
        })
    }
}

/// `REQ_REMOVE_SERIES`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReqRemoveSeriesPayload {
    pub figure_id: u64,
    pub axes_index: u32,
    pub series_index: u32,
}

impl ReqRemoveSeriesPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_FIGURE_ID, self.figure_id)
            .put_u32(tlv::TAG_AXES_INDEX, self.axes_index)
            .put_u32(tlv::TAG_SERIES_INDEX, self.series_index);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self {
            figure_id: opt_u64(&entries, tlv::TAG_FIGURE_ID)?,
            axes_index: opt_u32(&entries, tlv::TAG_AXES_INDEX)?,
            series_index: opt_u32(&entries, tlv::TAG_SERIES_INDEX)?,
        })
    }
}

/// `REQ_SET_DATA` / `REQ_APPEND_DATA`: replace or append a series' point data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReqSetDataPayload {
    pub figure_id: u64,
    pub axes_index: u32,
    pub series_index: u32,
    pub data: Vec<f32>,
}

impl ReqSetDataPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_FIGURE_ID, self.figure_id)
            .put_u32(tlv::TAG_AXES_INDEX, self.axes_index)
            .put_u32(tlv::TAG_SERIES_INDEX, self.series_index)
            .put_float_array(tlv::TAG_SERIES_DATA, &self.data);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self {
            figure_id: opt_u64(&entries, tlv::TAG_FIGURE_ID)?,
            axes_index: opt_u32(&entries, tlv::TAG_AXES_INDEX)?,
            series_index: opt_u32(&entries, tlv::TAG_SERIES_INDEX)?,
            data: tlv::find(&entries, tlv::TAG_SERIES_DATA).map(Entry::as_float_array).transpose()?.unwrap_or_default(),
        })
    }
}

/// `REQ_UPDATE_PROPERTY`: a named single-property mutation on a figure,
/// axes, or series. The broker dispatches `property` to the matching model
/// setter against a fixed table of recognised names; an unrecognised name
/// yields `RESP_ERR` 400 rather than attempting to apply anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReqUpdatePropertyPayload {
    pub figure_id: u64,
    pub axes_index: u32,
    pub series_index: u32,
    pub property: String,
    pub f1: f64,
    pub f2: f64,
    pub f3: f64,
    pub f4: f64,
    pub bool_val: bool,
    pub str_val: String,
}

impl ReqUpdatePropertyPayload {
    fn encode_inner(&self) -> Encoder {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_FIGURE_ID, self.figure_id)
            .put_u32(tlv::TAG_AXES_INDEX, self.axes_index)
            .put_u32(tlv::TAG_SERIES_INDEX, self.series_index)
            .put_string(tlv::TAG_PROPERTY_NAME, &self.property)
            .put_f64(tlv::TAG_F1, self.f1)
            .put_f64(tlv::TAG_F2, self.f2)
            .put_f64(tlv::TAG_F3, self.f3)
            .put_f64(tlv::TAG_F4, self.f4)
            .put_bool(tlv::TAG_BOOL_VAL, self.bool_val)
            .put_string(tlv::TAG_STR_VAL, &self.str_val);
        enc
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.encode_inner().finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Self::decode_entries(&tlv::decode(buf)?)
    }

    fn decode_entries(entries: &[Entry]) -> Result<Self> {
        Ok(Self {
            figure_id: opt_u64(entries, tlv::TAG_FIGURE_ID)?,
            axes_index: opt_u32(entries, tlv::TAG_AXES_INDEX)?,
            series_index: opt_u32(entries, tlv::TAG_SERIES_INDEX)?,
            property: tlv::find(entries, tlv::TAG_PROPERTY_NAME).map(Entry::as_string).transpose()?.unwrap_or_default(),
            f1: opt_f64(entries, tlv::TAG_F1, 0.0)?,
            f2: opt_f64(entries, tlv::TAG_F2, 0.0)?,
            f3: opt_f64(entries, tlv::TAG_F3, 0.0)?,
            f4: opt_f64(entries, tlv::TAG_F4, 0.0)?,
            bool_val: opt_bool(entries, tlv::TAG_BOOL_VAL, false)?,
            str_val: tlv::find(entries, tlv::TAG_STR_VAL).map(Entry::as_string).transpose()?.unwrap_or_default(),
        })
    }
}

/// `REQ_UPDATE_BATCH`: multiple named property updates applied in one round
/// trip. An update naming a figure that no longer exists, or an
/// unrecognised property name, is skipped rather than failing the batch;
/// every update that does apply is folded into one composite `STATE_DIFF`
/// per affected window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReqUpdateBatchPayload {
    pub updates: Vec<ReqUpdatePropertyPayload>,
}

impl ReqUpdateBatchPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        for update in &self.updates {
            enc.put_blob(tlv::TAG_PROPERTY_UPDATE_BLOB, &update.encode_inner());
        }
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        let mut updates = Vec::new();
        for entry in tlv::find_all(&entries, tlv::TAG_PROPERTY_UPDATE_BLOB) {
            updates.push(ReqUpdatePropertyPayload::decode_entries(&entry.as_blob()?)?);
        }
        Ok(Self { updates })
    }
}

/// `REQ_SHOW`: a zero `target_window` spawns a fresh renderer for
/// `figure_id`; a non-zero one attaches it as an additional tab of that
/// window instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReqShowPayload {
    pub figure_id: u64,
    pub target_window: u64,
}

impl ReqShowPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_FIGURE_ID, self.figure_id).put_u64(tlv::TAG_WINDOW_ID, self.target_window);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self {
            figure_id: opt_u64(&entries, tlv::TAG_FIGURE_ID)?,
            target_window: opt_u64(&entries, tlv::TAG_WINDOW_ID)?,
        })
    }
}

/// `REQ_GET_SNAPSHOT`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReqGetSnapshotPayload {
    pub figure_id: u64,
}

impl ReqGetSnapshotPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_FIGURE_ID, self.figure_id);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { figure_id: opt_u64(&entries, tlv::TAG_FIGURE_ID)? })
    }
}

/// `RESP_FIGURE_LIST`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RespFigureListPayload {
    pub figure_ids: Vec<u64>,
    pub figure_count: u32,
}

impl RespFigureListPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        for id in &self.figure_ids {
            enc.put_u64(tlv::TAG_FIGURE_IDS, *id);
        }
        enc.put_u32(tlv::TAG_FIGURE_COUNT, self.figure_count);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        let figure_ids =
            tlv::find_all(&entries, tlv::TAG_FIGURE_IDS).map(Entry::as_u64).collect::<Result<Vec<_>>>()?;
        Ok(Self { figure_ids, figure_count: opt_u32(&entries, tlv::TAG_FIGURE_COUNT)? })
    }
}

/// `REQ_RECONNECT`: producer or renderer re-establishing a prior session
/// after a dropped connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReqReconnectPayload {
    pub session_id: u64,
}

impl ReqReconnectPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u64(tlv::TAG_SESSION_ID, self.session_id);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { session_id: opt_u64(&entries, tlv::TAG_SESSION_ID)? })
    }
}

/// `REQ_DISCONNECT`: orderly client-initiated close.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReqDisconnectPayload {
    pub reason: String,
}

impl ReqDisconnectPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_string(tlv::TAG_REASON, &self.reason);
        enc.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let entries = tlv::decode(buf)?;
        Ok(Self { reason: opt_string(&entries, tlv::TAG_REASON)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_through_u16() {
        for mt in [
            MessageType::Hello,
            MessageType::Welcome,
            MessageType::RespErr,
            MessageType::ReqCreateFigure,
            MessageType::StateDiff,
            MessageType::EvtInput,
            MessageType::RespFigureList,
        ] {
            let v = mt as u16;
            assert_eq!(MessageType::from_u16(v).unwrap() as u16, v);
        }
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        assert!(MessageType::from_u16(0xFFFF).is_err());
    }

    #[test]
    fn hello_round_trips() {
        let hello = HelloPayload {
            protocol_major: 1,
            protocol_minor: 2,
            agent_build: "spectra-window/0.1.0".to_owned(),
            capabilities: 0b0101,
            client_type: "agent".to_owned(),
        };
        let decoded = HelloPayload::decode(&hello.encode()).unwrap();
        assert_eq!(decoded, hello);
    }

    #[test]
    fn welcome_round_trips() {
        let welcome = WelcomePayload {
            session_id: 7,
            window_id: 3,
            process_id: 1234,
            heartbeat_ms: 5000,
            mode: "renderer".to_owned(),
        };
        let decoded = WelcomePayload::decode(&welcome.encode()).unwrap();
        assert_eq!(decoded, welcome);
    }

    #[test]
    fn resp_err_round_trips() {
        let err = RespErrPayload { request_id: 9, error_code: 404, error_message: "unknown figure".to_owned() };
        let decoded = RespErrPayload::decode(&err.encode()).unwrap();
        assert_eq!(decoded, err);
    }

    #[test]
    fn state_snapshot_round_trips_nested_figure_axes_series() {
        let snapshot = StateSnapshotPayload {
            revision: 5,
            figures: vec![SnapshotFigureState {
                figure_id: 1,
                title: "Figure 1".to_owned(),
                axes: vec![SnapshotAxisState {
                    x_label: "t".to_owned(),
                    series: vec![SnapshotSeriesState {
                        name: "sin".to_owned(),
                        data: vec![0.0, 0.0, 1.0, 0.841],
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            knobs: vec![SnapshotKnobState { name: "freq".to_owned(), value: 2.0, ..Default::default() }],
        };
        let decoded = StateSnapshotPayload::decode(&snapshot.encode()).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn state_diff_round_trips_multiple_ops() {
        use super::super::diff::DiffOpType;
        let diff = StateDiffPayload {
            base_revision: 5,
            new_revision: 6,
            ops: vec![
                DiffOp { op_type: DiffOpType::SetAxisLimits, figure_id: 1, f1: -1.0, f2: 1.0, ..Default::default() },
                DiffOp { op_type: DiffOpType::SetGridVisible, figure_id: 1, bool_val: false, ..Default::default() },
            ],
        };
        let decoded = StateDiffPayload::decode(&diff.encode()).unwrap();
        assert_eq!(decoded, diff);
    }

    #[test]
    fn evt_input_round_trips_scroll_event() {
        let evt = EvtInputPayload {
            window_id: 1,
            input_type: InputType::Scroll,
            key_code: 0,
            mods: 0,
            cursor_x: 120.5,
            cursor_y: 48.0,
            figure_id: 2,
            axes_index: 0,
        };
        let decoded = EvtInputPayload::decode(&evt.encode()).unwrap();
        assert_eq!(decoded, evt);
    }

    #[test]
    fn cmd_assign_figures_round_trips_repeated_ids() {
        let cmd = CmdAssignFiguresPayload { figure_ids: vec![1, 2, 3], active_figure: 2 };
        let decoded = CmdAssignFiguresPayload::decode(&cmd.encode()).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn req_add_series_round_trips() {
        let req = ReqAddSeriesPayload {
            figure_id: 1,
            axes_index: 0,
            series: SnapshotSeriesState { name: "trace".to_owned(), ..Default::default() },
        };
        let decoded = ReqAddSeriesPayload::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn resp_axes_created_round_trips() {
        let resp = RespAxesCreatedPayload { axes_index: 3 };
        let decoded = RespAxesCreatedPayload::decode(&resp.encode()).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn resp_series_added_round_trips() {
        let resp = RespSeriesAddedPayload { series_index: 1 };
        let decoded = RespSeriesAddedPayload::decode(&resp.encode()).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn resp_figure_list_round_trips() {
        let resp = RespFigureListPayload { figure_ids: vec![10, 20], figure_count: 2 };
        let decoded = RespFigureListPayload::decode(&resp.encode()).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn req_update_property_round_trips_named_property() {
        let req = ReqUpdatePropertyPayload {
            figure_id: 1,
            axes_index: 2,
            property: "xlim".to_owned(),
            f1: -5.0,
            f2: 5.0,
            ..Default::default()
        };
        let decoded = ReqUpdatePropertyPayload::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn req_update_batch_round_trips_multiple_updates() {
        let req = ReqUpdateBatchPayload {
            updates: vec![
                ReqUpdatePropertyPayload { figure_id: 1, property: "title".to_owned(), str_val: "a".to_owned(), ..Default::default() },
                ReqUpdatePropertyPayload { figure_id: 1, property: "grid".to_owned(), bool_val: true, ..Default::default() },
            ],
        };
        let decoded = ReqUpdateBatchPayload::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }
}
