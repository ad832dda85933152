//! Live figure/axes/series data structures (the "C3" layer's authoritative
//! representation), distinct from their wire-format counterparts in
//! [`crate::codec::messages`]: these are what the broker mutates; the
//! snapshot structs are what gets serialized to a renderer.

use crate::codec::messages::{SnapshotAxisState, SnapshotFigureState, SnapshotSeriesState};

/// A single plotted trace within an [`Axis`].
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
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
    /// Flattened point data. Convention matches the original broker: 2-D
    /// series are interleaved `[x0,y0,x1,y1,...]`; surface series are a
    /// raveled (row-major flattened) grid, consistent with how the
    /// producer already lays out its sampled mesh before sending it.
    pub data: Vec<f32>,
}

impl Default for Series {
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
            data: Vec::new(),
        }
    }
}

impl Series {
    #[must_use]
    pub fn to_snapshot(&self, axes_index: u32) -> SnapshotSeriesState {
        SnapshotSeriesState {
            name: self.name.clone(),
            series_type: self.series_type.clone(),
            color_r: self.color_r,
            color_g: self.color_g,
            color_b: self.color_b,
            color_a: self.color_a,
            line_width: self.line_width,
            marker_size: self.marker_size,
            visible: self.visible,
            opacity: self.opacity,
            axes_index,
            data: self.data.clone(),
        }
    }
}

impl From<SnapshotSeriesState> for Series {
    fn from(s: SnapshotSeriesState) -> Self {
        Self {
            name: s.name,
            series_type: s.series_type,
            color_r: s.color_r,
            color_g: s.color_g,
            color_b: s.color_b,
            color_a: s.color_a,
            line_width: s.line_width,
            marker_size: s.marker_size,
            visible: s.visible,
            opacity: s.opacity,
            data: s.data,
        }
    }
}

/// A plot area with its own limits and labels, holding zero or more series.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
    pub grid_visible: bool,
    /// Whether this axes holds 3-D series (`line3d`/`scatter3d`/`surface`)
    /// rather than 2-D ones.
    pub is_3d: bool,
    pub x_label: String,
    pub y_label: String,
    pub title: String,
    pub series: Vec<Series>,
}

impl Default for Axis {
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

impl Axis {
    #[must_use]
    pub fn to_snapshot(&self) -> SnapshotAxisState {
        SnapshotAxisState {
            x_min: self.x_min,
            x_max: self.x_max,
            y_min: self.y_min,
            y_max: self.y_max,
            z_min: self.z_min,
            z_max: self.z_max,
            grid_visible: self.grid_visible,
            is_3d: self.is_3d,
            x_label: self.x_label.clone(),
            y_label: self.y_label.clone(),
            title: self.title.clone(),
            series: self.series.iter().map(|s| s.to_snapshot(0)).collect(),
        }
    }
}

impl From<SnapshotAxisState> for Axis {
    fn from(s: SnapshotAxisState) -> Self {
        Self {
            x_min: s.x_min,
            x_max: s.x_max,
            y_min: s.y_min,
            y_max: s.y_max,
            z_min: s.z_min,
            z_max: s.z_max,
            grid_visible: s.grid_visible,
            is_3d: s.is_3d,
            x_label: s.x_label,
            y_label: s.y_label,
            title: s.title,
            series: s.series.into_iter().map(Series::from).collect(),
        }
    }
}

/// A figure: a window's worth of axes laid out on a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    pub id: u64,
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub grid_rows: u32,
    pub grid_cols: u32,
    /// Non-zero groups a figure with sibling figures that must share a
    /// window (e.g. linked subplots created via the same producer call).
    pub window_group: u64,
    pub axes: Vec<Axis>,
}

impl Figure {
    #[must_use]
    pub fn new(id: u64, title: String) -> Self {
        Self { id, title, width: 1280, height: 720, grid_rows: 1, grid_cols: 1, window_group: 0, axes: Vec::new() }
    }

    /// Grow the grid to fit `index` if it doesn't already, matching the
    /// original broker's monotonic-grow behavior: the grid only ever gets
    /// bigger as axes are added, never shrinks, and an axes index beyond
    /// the current `grid_rows * grid_cols` forces growth along columns
    /// first, then rows.
    pub fn ensure_grid_fits(&mut self, index: usize) {
        #[allow(clippy::cast_possible_truncation, reason = "axes counts stay far below u32::MAX in practice")]
        while (self.grid_rows * self.grid_cols) as usize <= index {
            if self.grid_cols <= self.grid_rows {
                self.grid_cols += 1;
            } else {
                self.grid_rows += 1;
            }
        }
    }

    #[must_use]
    pub fn to_snapshot(&self) -> SnapshotFigureState {
        SnapshotFigureState {
            figure_id: self.id,
            title: self.title.clone(),
            width: self.width,
            height: self.height,
            grid_rows: self.grid_rows,
            grid_cols: self.grid_cols,
            window_group: self.window_group,
            axes: self.axes.iter().map(Axis::to_snapshot).collect(),
        }
    }

    #[must_use]
    pub fn from_snapshot(s: SnapshotFigureState) -> Self {
        Self {
            id: s.figure_id,
            title: s.title,
            width: s.width,
            height: s.height,
            grid_rows: s.grid_rows,
            grid_cols: s.grid_cols,
            window_group: s.window_group,
            axes: s.axes.into_iter().map(Axis::from).collect(),
        }
    }
}
