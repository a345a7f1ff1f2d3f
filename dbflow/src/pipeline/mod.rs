//! Pipeline composition: the node tree and the validating builders.

mod builder;
mod tree;

pub use builder::{PipelineBuilder, SubProcessBuilder};
pub use tree::{ParallelGroup, Pipeline, Step, SubProcess};
