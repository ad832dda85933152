//! The figure model (the "C3" layer): the authoritative, revisioned state
//! the broker replicates to renderers — figures, axes, series, and knobs —
//! plus the diff-op machinery that mutates it.

pub mod diffop;
pub mod figure;
pub mod knob;
pub mod store;

pub use figure::{Axis, Figure, Series};
pub use knob::Knob;
pub use store::FigureStore;
