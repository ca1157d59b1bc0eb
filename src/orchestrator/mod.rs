//! Health-gated startup of the dependency graph.

mod core;
mod launcher;
mod state;

pub use core::*;
pub use launcher::*;
pub use state::*;
