//! Authoritative figure store (the "C3" layer).
//!
//! Holds every figure and knob currently known to the broker, assigns
//! figure ids, and tracks a monotonic `revision` that increments on every
//! mutation. The broker wraps one [`FigureStore`] in an `Arc<Mutex<_>>` so
//! it can be reached from the connection-handling code in `broker::dispatch`
//! without threading a reference through every call; the store itself makes
//! no assumption about locking.
//!
//! Two ways to bring a figure's state in: [`FigureStore::load_snapshot`]
//! (used on initial figure creation from a `STATE_SNAPSHOT`-shaped bulk push,
//! or to replace a figure wholesale) and [`FigureStore::apply_diff_op`]
//! (used to replay one incremental mutation). `load_snapshot` always wipes
//! and reinserts, preserving the figure's id; `apply_diff_op` touches only
//! the field the op names.

use anyhow::{bail, Context, Result};

use crate::codec::diff::{DiffOp, DiffOpType};
use crate::codec::messages::{SnapshotFigureState, StateSnapshotPayload};

use super::diffop;
use super::figure::Figure;
use super::knob::Knob;

/// The authoritative in-memory figure/knob state.
#[derive(Debug, Default)]
pub struct FigureStore {
    figures: Vec<Figure>,
    /// Insertion order, kept separate from `figures`' own order so a figure
    /// removed from the middle doesn't change tab ordering for the rest —
    /// mirrors the original model's separate `figure_order_` vector.
    figure_order: Vec<u64>,
    knobs: Vec<Knob>,
    next_figure_id: u64,
    revision: u64,
}

impl FigureStore {
    /// Empty store with figure ids starting at 1 and revision 0.
    #[must_use]
    pub fn new() -> Self {
        Self { figures: Vec::new(), figure_order: Vec::new(), knobs: Vec::new(), next_figure_id: 1, revision: 0 }
    }

    fn bump_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Current revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn index_of(&self, figure_id: u64) -> Option<usize> {
        self.figures.iter().position(|f| f.id == figure_id)
    }

    fn figure_mut(&mut self, figure_id: u64) -> Result<&mut Figure> {
        let idx = self.index_of(figure_id).with_context(|| format!("unknown figure {figure_id}"))?;
        Ok(&mut self.figures[idx])
    }

    /// Look up a figure by id.
    #[must_use]
    pub fn figure(&self, figure_id: u64) -> Option<&Figure> {
        self.figures.iter().find(|f| f.id == figure_id)
    }

    /// Current `(x_min, x_max, y_min, y_max)` for one axes, used to preserve
    /// the other pair when a property update only names `xlim` or `ylim`.
    pub fn axis_limits(&self, figure_id: u64, axes_index: u32) -> Result<(f64, f64, f64, f64)> {
        let figure = self.figure(figure_id).with_context(|| format!("unknown figure {figure_id}"))?;
        let axis = figure
            .axes
            .get(axes_index as usize)
            .with_context(|| format!("unknown axes {axes_index} on figure {figure_id}"))?;
        Ok((axis.x_min, axis.x_max, axis.y_min, axis.y_max))
    }

    /// All figure ids, in insertion order.
    #[must_use]
    pub fn figure_ids(&self) -> &[u64] {
        &self.figure_order
    }

    /// Number of live figures.
    #[must_use]
    pub fn figure_count(&self) -> usize {
        self.figures.len()
    }

    /// Create a new, empty figure and assign it the next monotonic id.
    ///
    /// Returns the new figure's id and the post-mutation revision.
    pub fn create_figure(&mut self, title: String, width: u32, height: u32, window_group: u64) -> (u64, u64) {
        let id = self.next_figure_id;
        self.next_figure_id += 1;
        let mut figure = Figure::new(id, title);
        figure.width = width;
        figure.height = height;
        figure.window_group = window_group;
        self.figures.push(figure);
        self.figure_order.push(id);
        (id, self.bump_revision())
    }

    /// Remove a figure entirely.
    ///
    /// # Errors
    ///
    /// Returns an error if `figure_id` does not exist.
    pub fn remove_figure(&mut self, figure_id: u64) -> Result<u64> {
        let idx = self.index_of(figure_id).with_context(|| format!("unknown figure {figure_id}"))?;
        self.figures.remove(idx);
        self.figure_order.retain(|&id| id != figure_id);
        Ok(self.bump_revision())
    }

    /// Append a new axes to `figure_id`, growing its grid if needed.
    ///
    /// `grid_rows`/`grid_cols` grow the figure's grid monotonically if the
    /// producer's requested layout is bigger than what's already there (never
    /// shrinking it, per [`super::figure::Figure::ensure_grid_fits`]).
    /// `grid_index` is a renderer layout hint only — the axes' actual index
    /// is always its position in `figure.axes`, matching every other
    /// axes-index field on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if `figure_id` does not exist.
    #[allow(clippy::too_many_arguments, reason = "mirrors REQ_CREATE_AXES's wire fields one for one")]
    pub fn create_axes(
        &mut self,
        figure_id: u64,
        grid_rows: u32,
        grid_cols: u32,
        _grid_index: u32,
        is_3d: bool,
        x_label: String,
        y_label: String,
        title: String,
    ) -> Result<(u32, u64)> {
        let figure = self.figure_mut(figure_id)?;
        if grid_rows > figure.grid_rows {
            figure.grid_rows = grid_rows;
        }
        if grid_cols > figure.grid_cols {
            figure.grid_cols = grid_cols;
        }
        figure.axes.push(super::figure::Axis { x_label, y_label, title, is_3d, ..Default::default() });
        let index = figure.axes.len() - 1;
        figure.ensure_grid_fits(index);
        #[allow(clippy::cast_possible_truncation, reason = "axes counts stay far below u32::MAX in practice")]
        Ok((index as u32, self.bump_revision()))
    }

    /// Add a series to an existing axes.
    ///
    /// # Errors
    ///
    /// Returns an error if `figure_id` or `axes_index` do not exist.
    pub fn add_series(&mut self, figure_id: u64, axes_index: u32, series: super::figure::Series) -> Result<(u32, u64)> {
        let figure = self.figure_mut(figure_id)?;
        let axis = figure
            .axes
            .get_mut(axes_index as usize)
            .with_context(|| format!("unknown axes index {axes_index} on figure {figure_id}"))?;
        axis.series.push(series);
        #[allow(clippy::cast_possible_truncation, reason = "series counts stay far below u32::MAX in practice")]
        let series_index = (axis.series.len() - 1) as u32;
        Ok((series_index, self.bump_revision()))
    }

    /// Apply one incremental mutation to the store.
    ///
    /// `AddFigure`/`RemoveFigure`/`SetKnobValue` are handled here rather than
    /// delegated to [`diffop::apply`] because they act on the store's
    /// top-level collections rather than a single figure's fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the op references a figure, axes, series, or
    /// knob that does not exist.
    pub fn apply_diff_op(&mut self, op: &DiffOp) -> Result<u64> {
        match op.op_type {
            DiffOpType::AddFigure => {
                if self.index_of(op.figure_id).is_some() {
                    bail!("figure {} already exists", op.figure_id);
                }
                let mut figure = Figure::new(op.figure_id, op.str_val.clone());
                if self.next_figure_id <= op.figure_id {
                    self.next_figure_id = op.figure_id + 1;
                }
                figure.axes.push(super::figure::Axis::default());
                self.figures.push(figure);
                self.figure_order.push(op.figure_id);
            }
            DiffOpType::RemoveFigure => {
                return self.remove_figure(op.figure_id);
            }
            DiffOpType::SetKnobValue => {
                let knob = self
                    .knobs
                    .iter_mut()
                    .find(|k| k.name == op.str_val)
                    .with_context(|| format!("unknown knob {:?}", op.str_val))?;
                knob.set_value_clamped(op.f1);
            }
            _ => {
                let figure = self.figure_mut(op.figure_id)?;
                diffop::apply(figure, op)?;
            }
        }
        Ok(self.bump_revision())
    }

    /// Replace a figure's entire contents from a snapshot, preserving its
    /// id. If no figure with `snapshot.figure_id` exists yet, inserts one.
    pub fn load_snapshot(&mut self, snapshot: SnapshotFigureState) -> u64 {
        let id = snapshot.figure_id;
        let figure = Figure::from_snapshot(snapshot);
        if let Some(idx) = self.index_of(id) {
            self.figures[idx] = figure;
        } else {
            self.figures.push(figure);
            self.figure_order.push(id);
            if self.next_figure_id <= id {
                self.next_figure_id = id + 1;
            }
        }
        self.bump_revision()
    }

    /// Replace the entire store's contents from a bulk `STATE_SNAPSHOT` push
    /// (the producer's authoritative "here is everything" message, sent once
    /// at connect time and whenever it wants to force a full resync).
    ///
    /// Wipes every figure and knob currently held, reinserts each figure from
    /// `snapshot` preserving its producer-assigned id, and moves
    /// `next_figure_id` above the largest id seen so ids assigned afterward
    /// (e.g. by `create_figure`) never collide with one the producer already
    /// chose. Returns the ids of every figure now in the store, in the order
    /// `snapshot` provided them.
    pub fn load_full_snapshot(&mut self, snapshot: StateSnapshotPayload) -> Vec<u64> {
        self.figures.clear();
        self.figure_order.clear();
        self.knobs.clear();

        let mut max_id = 0u64;
        let mut ids = Vec::with_capacity(snapshot.figures.len());
        for figure_state in snapshot.figures {
            let id = figure_state.figure_id;
            max_id = max_id.max(id);
            ids.push(id);
            self.figures.push(Figure::from_snapshot(figure_state));
            self.figure_order.push(id);
        }
        self.next_figure_id = self.next_figure_id.max(max_id + 1);

        for knob_state in snapshot.knobs {
            self.knobs.push(Knob::from(knob_state));
        }

        self.bump_revision();
        ids
    }

    /// Register a knob (idempotent by name: re-registering an existing name
    /// replaces its bounds/type but is a no-op revision-wise if the value
    /// doesn't change visible state — callers still get a revision bump for
    /// simplicity, matching every other mutator here).
    pub fn upsert_knob(&mut self, knob: Knob) -> u64 {
        if let Some(existing) = self.knobs.iter_mut().find(|k| k.name == knob.name) {
            *existing = knob;
        } else {
            self.knobs.push(knob);
        }
        self.bump_revision()
    }

    /// Snapshot every figure and knob currently in the store.
    #[must_use]
    pub fn snapshot_all(&self) -> (u64, Vec<SnapshotFigureState>, Vec<Knob>) {
        let figures = self.figure_order.iter().filter_map(|id| self.figure(*id)).map(Figure::to_snapshot).collect();
        (self.revision, figures, self.knobs.clone())
    }

    /// Snapshot only the named figures (renderer assignment is usually a
    /// subset of the whole store).
    ///
    /// # Errors
    ///
    /// Returns an error if any requested figure id does not exist.
    pub fn snapshot_figures(&self, figure_ids: &[u64]) -> Result<(u64, Vec<SnapshotFigureState>)> {
        let mut figures = Vec::with_capacity(figure_ids.len());
        for id in figure_ids {
            let figure = self.figure(*id).with_context(|| format!("unknown figure {id}"))?;
            figures.push(figure.to_snapshot());
        }
        Ok((self.revision, figures))
    }
}
