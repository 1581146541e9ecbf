#![forbid(unsafe_code)]
//! stageplan-planner: computation graph → ordered job stages.
//!
//! Design:
//! - `factory` shadows the logical graph with an arena of physical nodes.
//! - `analyze` walks one path from a source and emits the stages for it,
//!   choosing between pass-through, materialization, shuffle-aggregate and
//!   the broadcast / hash-partition join strategies.
//! - `optimizer` drives it: cheapest source first, with penalties for
//!   sources whose analysis was refused.
//! - `dsl` reads a YAML job description; `explain` renders a plan.

pub mod analyze;
pub mod builder;
pub mod dsl;
pub mod explain;
pub mod factory;
pub mod node;
pub mod optimizer;
pub mod plan;

pub use analyze::{PhysicalOptimizerResult, Route};
pub use dsl::yaml::{parse_yaml_job, DslError, JobDescription};
pub use explain::explain_plan;
pub use factory::build_physical_graph;
pub use node::{JoinState, NodeKind, PhysicalGraph, PhysicalNode};
pub use optimizer::{plan_job, PhysicalOptimizer};
pub use plan::{JobPlan, PlanIncrement};
