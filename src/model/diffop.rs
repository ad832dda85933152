//! Applies a [`DiffOp`] to a live [`Figure`], and builds the `DiffOp` that
//! corresponds to each mutator in [`super::store`].
//!
//! Keeping application logic here (rather than on `Figure` itself) mirrors
//! the original figure model's single `apply_diff_op` entry point: one place
//! maps every `DiffOpType` to the field it touches, so adding a new mutation
//! kind only means adding one match arm instead of a new method per type.

use anyhow::{bail, Context, Result};

use crate::codec::diff::{DiffOp, DiffOpType};

use super::figure::{Axis, Figure, Series};

fn axis_mut(figure: &mut Figure, index: u32) -> Result<&mut Axis> {
    let idx = index as usize;
    figure.axes.get_mut(idx).with_context(|| format!("unknown axes index {idx} on figure {}", figure.id))
}

fn series_mut(figure: &mut Figure, axes_index: u32, series_index: u32) -> Result<&mut Series> {
    let series_idx = series_index as usize;
    axis_mut(figure, axes_index)?
        .series
        .get_mut(series_idx)
        .with_context(|| format!("unknown series index {series_idx} on axes {axes_index}"))
}

/// Apply `op` to `figure` in place.
///
/// # Errors
///
/// Returns an error if `op` references an axes or series index that does
/// not exist on `figure`. `AddFigure`/`RemoveFigure` are handled by the
/// caller at the store level (they don't mutate a single figure in place)
/// and are rejected here if routed through by mistake.
pub fn apply(figure: &mut Figure, op: &DiffOp) -> Result<()> {
    match op.op_type {
        DiffOpType::SetAxisLimits => {
            let axis = axis_mut(figure, op.axes_index)?;
            axis.x_min = op.f1;
            axis.x_max = op.f2;
            axis.y_min = op.f3;
            axis.y_max = op.f4;
        }
        DiffOpType::SetAxisZLimits => {
            let axis = axis_mut(figure, op.axes_index)?;
            axis.z_min = op.f1;
            axis.z_max = op.f2;
        }
        DiffOpType::SetSeriesColor => {
            let series = series_mut(figure, op.axes_index, op.series_index)?;
            #[allow(clippy::cast_possible_truncation, reason = "color channels are always in [0,1], representable in f32")]
            {
                series.color_r = op.f1 as f32;
                series.color_g = op.f2 as f32;
                series.color_b = op.f3 as f32;
                series.color_a = op.f4 as f32;
            }
        }
        DiffOpType::SetSeriesVisible => {
            series_mut(figure, op.axes_index, op.series_index)?.visible = op.bool_val;
        }
        DiffOpType::SetFigureTitle => {
            figure.title = op.str_val.clone();
        }
        DiffOpType::SetGridVisible => {
            axis_mut(figure, op.axes_index)?.grid_visible = op.bool_val;
        }
        DiffOpType::SetLineWidth => {
            #[allow(clippy::cast_possible_truncation, reason = "line widths are small positive values")]
            {
                series_mut(figure, op.axes_index, op.series_index)?.line_width = op.f1 as f32;
            }
        }
        DiffOpType::SetMarkerSize => {
            #[allow(clippy::cast_possible_truncation, reason = "marker sizes are small positive values")]
            {
                series_mut(figure, op.axes_index, op.series_index)?.marker_size = op.f1 as f32;
            }
        }
        DiffOpType::SetOpacity => {
            #[allow(clippy::cast_possible_truncation, reason = "opacity is always in [0,1]")]
            {
                series_mut(figure, op.axes_index, op.series_index)?.opacity = op.f1 as f32;
            }
        }
        DiffOpType::SetSeriesData => {
            series_mut(figure, op.axes_index, op.series_index)?.data = op.data.clone();
        }
        DiffOpType::SetAxisXLabel => {
            axis_mut(figure, op.axes_index)?.x_label = op.str_val.clone();
        }
        DiffOpType::SetAxisYLabel => {
            axis_mut(figure, op.axes_index)?.y_label = op.str_val.clone();
        }
        DiffOpType::SetAxisTitle => {
            axis_mut(figure, op.axes_index)?.title = op.str_val.clone();
        }
        DiffOpType::SetSeriesLabel => {
            series_mut(figure, op.axes_index, op.series_index)?.name = op.str_val.clone();
        }
        DiffOpType::RemoveSeries => {
            let axis = axis_mut(figure, op.axes_index)?;
            let idx = op.series_index as usize;
            if idx >= axis.series.len() {
                bail!("unknown series index {idx} on axes {}", op.axes_index);
            }
            axis.series.remove(idx);
        }
        DiffOpType::SetKnobValue => {
            bail!("SetKnobValue is applied at the session level, not on a single figure");
        }
        DiffOpType::AddFigure | DiffOpType::RemoveFigure | DiffOpType::AddSeries | DiffOpType::AddAxes => {
            bail!("{:?} must be handled by the figure store, not applied to an existing figure", op.op_type);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn figure_with_one_axis_one_series() -> Figure {
        let mut f = Figure::new(1, "f".to_owned());
        f.axes.push(Axis { series: vec![Series::default()], ..Default::default() });
        f
    }

    #[test]
    fn set_axis_limits_updates_bounds() {
        let mut f = figure_with_one_axis_one_series();
        let op = DiffOp { op_type: DiffOpType::SetAxisLimits, f1: -2.0, f2: 2.0, f3: -1.0, f4: 1.0, ..Default::default() };
        apply(&mut f, &op).unwrap();
        assert_eq!((f.axes[0].x_min, f.axes[0].x_max, f.axes[0].y_min, f.axes[0].y_max), (-2.0, 2.0, -1.0, 1.0));
    }

    #[test]
    fn set_series_visible_toggles_flag() {
        let mut f = figure_with_one_axis_one_series();
        let op = DiffOp { op_type: DiffOpType::SetSeriesVisible, bool_val: false, ..Default::default() };
        apply(&mut f, &op).unwrap();
        assert!(!f.axes[0].series[0].visible);
    }

    #[test]
    fn set_series_data_replaces_points() {
        let mut f = figure_with_one_axis_one_series();
        let op = DiffOp { op_type: DiffOpType::SetSeriesData, data: vec![1.0, 2.0, 3.0], ..Default::default() };
        apply(&mut f, &op).unwrap();
        assert_eq!(f.axes[0].series[0].data, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn remove_series_shrinks_list() {
        let mut f = figure_with_one_axis_one_series();
        let op = DiffOp { op_type: DiffOpType::RemoveSeries, series_index: 0, ..Default::default() };
        apply(&mut f, &op).unwrap();
        assert!(f.axes[0].series.is_empty());
    }

    #[test]
    fn add_series_and_add_axes_are_rejected_at_this_layer() {
        let mut f = Figure::new(1, "f".to_owned());
        let add_series = DiffOp { op_type: DiffOpType::AddSeries, ..Default::default() };
        assert!(apply(&mut f, &add_series).is_err());
        let add_axes = DiffOp { op_type: DiffOpType::AddAxes, ..Default::default() };
        assert!(apply(&mut f, &add_axes).is_err());
        assert!(f.axes.is_empty(), "a rejected op must not mutate the figure");
    }

    #[test]
    fn add_axes_replay_is_idempotent() {
        let mut f = Figure::new(1, "f".to_owned());
        let op = DiffOp { op_type: DiffOpType::AddAxes, ..Default::default() };
        assert!(apply(&mut f, &op).is_err());
        let axes_after_first = f.axes.len();
        assert!(apply(&mut f, &op).is_err());
        assert_eq!(f.axes.len(), axes_after_first, "replaying the same op must not change final state");
    }

    #[test]
    fn set_axis_z_limits_updates_bounds() {
        let mut f = figure_with_one_axis_one_series();
        let op = DiffOp { op_type: DiffOpType::SetAxisZLimits, f1: -3.0, f2: 3.0, ..Default::default() };
        apply(&mut f, &op).unwrap();
        assert_eq!((f.axes[0].z_min, f.axes[0].z_max), (-3.0, 3.0));
    }

    #[test]
    fn unknown_axes_index_is_rejected() {
        let mut f = Figure::new(1, "f".to_owned());
        let op = DiffOp { op_type: DiffOpType::SetAxisLimits, axes_index: 5, ..Default::default() };
        assert!(apply(&mut f, &op).is_err());
    }

    #[test]
    fn add_figure_and_remove_figure_are_rejected_at_this_layer() {
        let mut f = Figure::new(1, "f".to_owned());
        let add = DiffOp { op_type: DiffOpType::AddFigure, ..Default::default() };
        assert!(apply(&mut f, &add).is_err());
        let remove = DiffOp { op_type: DiffOpType::RemoveFigure, ..Default::default() };
        assert!(apply(&mut f, &remove).is_err());
    }
}
