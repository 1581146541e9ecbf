#![forbid(unsafe_code)]
//! stageplan: compile a logical dataflow graph into ordered job stages.
//!
//! This facade re-exports the workspace crates so benches and downstream users
//! can depend on a single package.

pub use stageplan_core as core;
pub use stageplan_exec as exec;
pub use stageplan_planner as planner;
