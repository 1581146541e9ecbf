//! Job stages: the unit of work the planner hands to every cluster node.
//!
//! Planning fills in everything except the per-node fields (`node_id`,
//! partition counts, memory), which stay `None` until
//! [`JobStage::specialize_for`] runs at dispatch time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{NodeResources, SchedulerConfig};
use crate::id::StageId;
use crate::set::SetIdentifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocatorPolicy {
    #[default]
    Default,
    NoReuse,
    NoReferenceCount,
}

/// Runs a pipeline of tuple sets from one source into one sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleSetJobStage {
    pub id: StageId,
    pub job_id: String,
    pub source_tuple_set: String,
    pub source: SetIdentifier,
    /// Tuple sets computed in this pipeline, in traversal order.
    pub tuple_sets_to_build: Vec<String>,
    pub target_tuple_set: String,
    pub target_computation: String,
    pub output_type: String,
    pub sink: SetIdentifier,
    pub combiner: Option<SetIdentifier>,
    /// Join output tuple set -> hash set key probed to produce it.
    pub hash_sets_to_probe: Option<BTreeMap<String, String>>,
    pub probing: bool,
    pub combining: bool,
    pub broadcasting: bool,
    pub repartitioning: bool,
    pub repartition_join: bool,
    pub repartition_vector: bool,
    pub collect_as_map: bool,
    pub num_nodes_to_collect: usize,
    /// Source is an uncombined aggregation result.
    pub input_agg_hash_out: bool,
    /// The source set is consumed once and may be dropped afterwards.
    pub need_remove_input: bool,
    pub allocator_policy: AllocatorPolicy,
    pub node_id: Option<usize>,
    pub num_nodes: Option<usize>,
    pub num_total_partitions: Option<usize>,
    pub total_memory_on_node: Option<u64>,
}

/// Merges pre-shuffled keyed data into the final aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationJobStage {
    pub id: StageId,
    pub job_id: String,
    pub source: SetIdentifier,
    pub sink: SetIdentifier,
    pub aggregate_computation: String,
    pub materialize: bool,
    pub num_node_partitions: Option<usize>,
    pub total_memory_on_node: Option<u64>,
}

/// Builds a replicated hash table from broadcast data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastJoinBuildHTJobStage {
    pub id: StageId,
    pub job_id: String,
    pub source: SetIdentifier,
    pub hash_set_name: String,
    pub source_tuple_set: String,
    pub target_tuple_set: String,
    pub target_computation: String,
    pub total_memory_on_node: Option<u64>,
}

/// Builds a partitioned hash table from repartitioned join data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashPartitionedJoinBuildHTJobStage {
    pub id: StageId,
    pub job_id: String,
    pub source: SetIdentifier,
    pub hash_set_name: String,
    pub source_tuple_set: String,
    pub target_tuple_set: String,
    pub target_computation: String,
    pub num_node_partitions: Option<usize>,
    pub total_memory_on_node: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum JobStage {
    TupleSet(TupleSetJobStage),
    Aggregation(AggregationJobStage),
    BroadcastJoinBuild(BroadcastJoinBuildHTJobStage),
    HashPartitionedJoinBuild(HashPartitionedJoinBuildHTJobStage),
}

impl JobStage {
    pub fn id(&self) -> StageId {
        match self {
            JobStage::TupleSet(s) => s.id,
            JobStage::Aggregation(s) => s.id,
            JobStage::BroadcastJoinBuild(s) => s.id,
            JobStage::HashPartitionedJoinBuild(s) => s.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobStage::TupleSet(_) => "TupleSetJobStage",
            JobStage::Aggregation(_) => "AggregationJobStage",
            JobStage::BroadcastJoinBuild(_) => "BroadcastJoinBuildHTJobStage",
            JobStage::HashPartitionedJoinBuild(_) => "HashPartitionedJoinBuildHTJobStage",
        }
    }

    pub fn source(&self) -> &SetIdentifier {
        match self {
            JobStage::TupleSet(s) => &s.source,
            JobStage::Aggregation(s) => &s.source,
            JobStage::BroadcastJoinBuild(s) => &s.source,
            JobStage::HashPartitionedJoinBuild(s) => &s.source,
        }
    }

    /// The set this stage writes. Hash-table builds write none.
    pub fn sink(&self) -> Option<&SetIdentifier> {
        match self {
            JobStage::TupleSet(s) => Some(&s.sink),
            JobStage::Aggregation(s) => Some(&s.sink),
            JobStage::BroadcastJoinBuild(_) | JobStage::HashPartitionedJoinBuild(_) => None,
        }
    }

    pub fn as_tuple_set(&self) -> Option<&TupleSetJobStage> {
        match self {
            JobStage::TupleSet(s) => Some(s),
            _ => None,
        }
    }

    /// Copy of this stage with the per-node fields filled in for `node`.
    pub fn specialize_for(&self, node: &NodeResources, cluster: &SchedulerConfig) -> JobStage {
        let mut stage = self.clone();
        match &mut stage {
            JobStage::TupleSet(s) => {
                s.node_id = Some(node.id);
                s.num_nodes = Some(cluster.nodes.len());
                s.num_total_partitions = Some(cluster.total_partitions());
                s.total_memory_on_node = Some(node.memory_bytes);
            }
            JobStage::Aggregation(s) => {
                s.num_node_partitions = Some(node.num_partitions(cluster.partition_to_core_ratio));
                s.total_memory_on_node = Some(node.memory_bytes);
            }
            JobStage::BroadcastJoinBuild(s) => {
                s.total_memory_on_node = Some(node.memory_bytes);
            }
            JobStage::HashPartitionedJoinBuild(s) => {
                s.num_node_partitions = Some(node.num_partitions(cluster.partition_to_core_ratio));
                s.total_memory_on_node = Some(node.memory_bytes);
            }
        }
        stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregation_stage() -> JobStage {
        JobStage::Aggregation(AggregationJobStage {
            id: StageId::new(3),
            job_id: "job".into(),
            source: SetIdentifier::intermediate("job", "agg_aggregationData", 64),
            sink: SetIdentifier::new("db", "out"),
            aggregate_computation: "agg".into(),
            materialize: true,
            num_node_partitions: None,
            total_memory_on_node: None,
        })
    }

    #[test]
    fn test_specialize_fills_node_fields() {
        let node = NodeResources::new(2, "10.0.0.2", 8108)
            .with_cores(8)
            .with_memory(1 << 30);
        let cluster = SchedulerConfig::default().with_nodes(vec![node.clone()]);

        let stage = aggregation_stage();
        match stage.specialize_for(&node, &cluster) {
            JobStage::Aggregation(s) => {
                assert_eq!(s.num_node_partitions, Some(6));
                assert_eq!(s.total_memory_on_node, Some(1 << 30));
            }
            other => panic!("unexpected stage {:?}", other),
        }
        // the planned stage itself is untouched
        match stage {
            JobStage::Aggregation(s) => assert!(s.num_node_partitions.is_none()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_stage_serde_tag() {
        let json = serde_json::to_string(&aggregation_stage()).unwrap();
        assert!(json.contains("\"stage\":\"aggregation\""));
        let back: JobStage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), StageId::new(3));
        assert_eq!(back.kind(), "AggregationJobStage");
        assert!(back.sink().is_some());
    }
}
