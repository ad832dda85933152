//! Session graph (the "C4" layer's window/figure bookkeeping, kept separate
//! from the connections that carry traffic for it — see [`graph`]).

pub mod graph;

pub use graph::{SessionGraph, WindowEntry};
