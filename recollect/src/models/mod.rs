mod entity;
mod feedback;
mod graph;
mod memory;

pub use entity::*;
pub use feedback::*;
pub use graph::*;
pub use memory::*;
