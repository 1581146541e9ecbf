//! Accumulators for the four job-stage variants.
//!
//! Each stage gets a fresh builder. `build()` checks that every required
//! field was set and derives the flags that follow from the others.

mod aggregation;
mod broadcast;
mod partitioned;
mod tuple_set;

pub use aggregation::AggregationStageBuilder;
pub use broadcast::BroadcastJoinBuildStageBuilder;
pub use partitioned::HashPartitionedJoinBuildStageBuilder;
pub use tuple_set::TupleSetStageBuilder;

use stageplan_core::error::Error;

pub(crate) fn missing(stage: &str, field: &str) -> Error {
    Error::Invariant(format!("{} built without {}", stage, field))
}
