//! Convenient re-exports for downstream crates.

pub use crate::config::{NodeResources, PlannerConfig, SchedulerConfig};
pub use crate::error::{Error, Result};
pub use crate::graph::{
    AtomicComputation, AtomicKind, Computation, ComputationGraph, ComputationType, JoinStrategy,
};
pub use crate::id::{NodeId, StageId};
pub use crate::manifest::{JobManifest, ManifestId};
pub use crate::set::{SetIdentifier, SetType};
pub use crate::stage::{
    AggregationJobStage, AllocatorPolicy, BroadcastJoinBuildHTJobStage,
    HashPartitionedJoinBuildHTJobStage, JobStage, TupleSetJobStage,
};
pub use crate::stats::{SetStats, Statistics};
