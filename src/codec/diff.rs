//! Incremental state changes (`DiffOp`) exchanged after the initial snapshot.
//!
//! A `DiffOp` is a small, self-describing mutation record: "set axes 0's
//! x-limits to [f1, f2]", "set series 2's color to (f1,f2,f3)", "remove
//! figure". The broker both produces these (to forward producer/renderer
//! mutations downstream) and applies them to its own [`crate::model::store`]
//! when replaying a renderer-reported change.

use anyhow::{bail, Result};

use super::tlv::{self, Encoder, Entry};

/// Discriminant for [`DiffOp::op_type`]. Numeric values match the original
/// wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DiffOpType {
    SetAxisLimits = 1,
    SetSeriesColor = 2,
    SetSeriesVisible = 3,
    SetFigureTitle = 4,
    SetGridVisible = 5,
    SetLineWidth = 6,
    SetMarkerSize = 7,
    SetOpacity = 8,
    AddFigure = 10,
    RemoveFigure = 11,
    SetSeriesData = 12,
    SetAxisXLabel = 13,
    SetAxisYLabel = 14,
    SetAxisTitle = 15,
    SetSeriesLabel = 16,
    RemoveSeries = 17,
    SetKnobValue = 20,
    SetAxisZLimits = 21,
    AddSeries = 22,
    AddAxes = 23,
}

impl DiffOpType {
    fn from_u16(v: u16) -> Result<Self> {
        Ok(match v {
            1 => Self::SetAxisLimits,
            2 => Self::SetSeriesColor,
            3 => Self::SetSeriesVisible,
            4 => Self::SetFigureTitle,
            5 => Self::SetGridVisible,
            6 => Self::SetLineWidth,
            7 => Self::SetMarkerSize,
            8 => Self::SetOpacity,
            10 => Self::AddFigure,
            11 => Self::RemoveFigure,
            12 => Self::SetSeriesData,
            13 => Self::SetAxisXLabel,
            14 => Self::SetAxisYLabel,
            15 => Self::SetAxisTitle,
            16 => Self::SetSeriesLabel,
            17 => Self::RemoveSeries,
            20 => Self::SetKnobValue,
            21 => Self::SetAxisZLimits,
            22 => Self::AddSeries,
            23 => Self::AddAxes,
            other => bail!("unknown DiffOp type {other}"),
        })
    }
}

/// A single incremental mutation to the figure model.
///
/// Not every field is meaningful for every `op_type` — e.g. `SetAxisLimits`
/// uses `f1..f4` for xmin/xmax/ymin/ymax while `SetSeriesColor` uses
/// `f1..f4` for r/g/b/a. `str_val` and `data` are likewise op-dependent
/// (title text, label text, or the flattened series payload for
/// `SetSeriesData`).
#[derive(Debug, Clone, PartialEq)]
pub struct DiffOp {
    pub op_type: DiffOpType,
    pub figure_id: u64,
    pub axes_index: u32,
    pub series_index: u32,
    pub f1: f64,
    pub f2: f64,
    pub f3: f64,
    pub f4: f64,
    pub bool_val: bool,
    pub str_val: String,
    pub data: Vec<f32>,
}

impl Default for DiffOp {
    fn default() -> Self {
        Self {
            op_type: DiffOpType::SetAxisLimits,
            figure_id: 0,
            axes_index: 0,
            series_index: 0,
            f1: 0.0,
            f2: 0.0,
            f3: 0.0,
            f4: 0.0,
            bool_val: false,
            str_val: String::new(),
            data: Vec::new(),
        }
    }
}

impl DiffOp {
    /// Encode into a nested TLV stream (to be wrapped as `TAG_DIFF_OP_BLOB`
    /// by the caller).
    #[must_use]
    pub fn encode(&self) -> Encoder {
        let mut enc = Encoder::new();
        enc.put_u16(tlv::TAG_OP_TYPE, self.op_type as u16)
            .put_u64(tlv::TAG_FIGURE_ID, self.figure_id)
            .put_u32(tlv::TAG_AXES_INDEX, self.axes_index)
            .put_u32(tlv::TAG_SERIES_INDEX, self.series_index)
            .put_f64(tlv::TAG_F1, self.f1)
            .put_f64(tlv::TAG_F2, self.f2)
            .put_f64(tlv::TAG_F3, self.f3)
            .put_f64(tlv::TAG_F4, self.f4)
            .put_bool(tlv::TAG_BOOL_VAL, self.bool_val)
            .put_string(tlv::TAG_STR_VAL, &self.str_val)
            .put_float_array(tlv::TAG_OP_DATA, &self.data);
        enc
    }

    /// Decode from a nested TLV stream previously produced by [`Self::encode`].
    pub fn decode(entries: &[Entry]) -> Result<Self> {
        let op_type = DiffOpType::from_u16(
            tlv::find(entries, tlv::TAG_OP_TYPE).map(Entry::as_u16).transpose()?.unwrap_or(0),
        )?;
        Ok(Self {
            op_type,
            figure_id: tlv::find(entries, tlv::TAG_FIGURE_ID).map(Entry::as_u64).transpose()?.unwrap_or(0),
            axes_index: tlv::find(entries, tlv::TAG_AXES_INDEX).map(Entry::as_u32).transpose()?.unwrap_or(0),
            series_index: tlv::find(entries, tlv::TAG_SERIES_INDEX).map(Entry::as_u32).transpose()?.unwrap_or(0),
            f1: tlv::find(entries, tlv::TAG_F1).map(Entry::as_f64).transpose()?.unwrap_or(0.0),
            f2: tlv::find(entries, tlv::TAG_F2).map(Entry::as_f64).transpose()?.unwrap_or(0.0),
            f3: tlv::find(entries, tlv::TAG_F3).map(Entry::as_f64).transpose()?.unwrap_or(0.0),
            f4: tlv::find(entries, tlv::TAG_F4).map(Entry::as_f64).transpose()?.unwrap_or(0.0),
            bool_val: tlv::find(entries, tlv::TAG_BOOL_VAL).map(Entry::as_bool).transpose()?.unwrap_or(false),
            str_val: tlv::find(entries, tlv::TAG_STR_VAL).map(Entry::as_string).transpose()?.unwrap_or_default(),
            data: tlv::find(entries, tlv::TAG_OP_DATA).map(Entry::as_float_array).transpose()?.unwrap_or_default(),
        })
    }
}
