use stageplan_core::error::Result;
use stageplan_core::id::StageId;
use stageplan_core::set::SetIdentifier;
use stageplan_core::stage::HashPartitionedJoinBuildHTJobStage;

use super::missing;

const STAGE: &str = "HashPartitionedJoinBuildHTJobStage";

/// Builds the partitioned hash table for a hash-partitioned join.
///
/// Node-local partition count and memory are left for dispatch.
#[derive(Debug, Clone, Default)]
pub struct HashPartitionedJoinBuildStageBuilder {
    job_id: String,
    stage_id: Option<StageId>,
    source: Option<SetIdentifier>,
    hash_set_name: Option<String>,
    source_tuple_set: Option<String>,
    target_tuple_set: Option<String>,
    target_computation: Option<String>,
}

impl HashPartitionedJoinBuildStageBuilder {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Self::default()
        }
    }

    pub fn stage_id(&mut self, id: StageId) -> &mut Self {
        self.stage_id = Some(id);
        self
    }

    pub fn source(&mut self, set: SetIdentifier) -> &mut Self {
        self.source = Some(set);
        self
    }

    pub fn hash_set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.hash_set_name = Some(name.into());
        self
    }

    pub fn source_tuple_set(&mut self, name: impl Into<String>) -> &mut Self {
        self.source_tuple_set = Some(name.into());
        self
    }

    pub fn target_tuple_set(&mut self, name: impl Into<String>) -> &mut Self {
        self.target_tuple_set = Some(name.into());
        self
    }

    pub fn target_computation(&mut self, name: impl Into<String>) -> &mut Self {
        self.target_computation = Some(name.into());
        self
    }

    pub fn build(&self) -> Result<HashPartitionedJoinBuildHTJobStage> {
        Ok(HashPartitionedJoinBuildHTJobStage {
            id: self.stage_id.ok_or_else(|| missing(STAGE, "stage id"))?,
            job_id: self.job_id.clone(),
            source: self.source.clone().ok_or_else(|| missing(STAGE, "source"))?,
            hash_set_name: self
                .hash_set_name
                .clone()
                .ok_or_else(|| missing(STAGE, "hash set name"))?,
            source_tuple_set: self
                .source_tuple_set
                .clone()
                .ok_or_else(|| missing(STAGE, "source tuple set"))?,
            target_tuple_set: self
                .target_tuple_set
                .clone()
                .ok_or_else(|| missing(STAGE, "target tuple set"))?,
            target_computation: self
                .target_computation
                .clone()
                .ok_or_else(|| missing(STAGE, "target computation"))?,
            num_node_partitions: None,
            total_memory_on_node: None,
        })
    }
}
