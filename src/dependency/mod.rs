//! Dependency graph: service, engine and resource nodes, cycle detection
//! and leveling.

mod builder;
mod graph;
mod node;

pub use builder::*;
pub use graph::*;
pub use node::*;
