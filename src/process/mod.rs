//! Renderer child-process supervision (the "C4" layer's spawn/reap side).

pub mod supervisor;

pub use supervisor::{ProcessEntry, ProcessSupervisor};
