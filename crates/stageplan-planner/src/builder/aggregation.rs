use stageplan_core::error::Result;
use stageplan_core::id::StageId;
use stageplan_core::set::SetIdentifier;
use stageplan_core::stage::AggregationJobStage;

use super::missing;

const STAGE: &str = "AggregationJobStage";

#[derive(Debug, Clone, Default)]
pub struct AggregationStageBuilder {
    job_id: String,
    stage_id: Option<StageId>,
    source: Option<SetIdentifier>,
    sink: Option<SetIdentifier>,
    aggregate_computation: Option<String>,
    materialize: bool,
}

impl AggregationStageBuilder {
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

    /// The shuffled, pre-aggregation data.
    pub fn source(&mut self, set: SetIdentifier) -> &mut Self {
        self.source = Some(set);
        self
    }

    pub fn sink(&mut self, set: SetIdentifier) -> &mut Self {
        self.sink = Some(set);
        self
    }

    pub fn aggregate_computation(&mut self, name: impl Into<String>) -> &mut Self {
        self.aggregate_computation = Some(name.into());
        self
    }

    pub fn materialize(&mut self, on: bool) -> &mut Self {
        self.materialize = on;
        self
    }

    pub fn build(&self) -> Result<AggregationJobStage> {
        Ok(AggregationJobStage {
            id: self.stage_id.ok_or_else(|| missing(STAGE, "stage id"))?,
            job_id: self.job_id.clone(),
            source: self.source.clone().ok_or_else(|| missing(STAGE, "source"))?,
            sink: self.sink.clone().ok_or_else(|| missing(STAGE, "sink"))?,
            aggregate_computation: self
                .aggregate_computation
                .clone()
                .ok_or_else(|| missing(STAGE, "aggregate computation"))?,
            materialize: self.materialize,
            num_node_partitions: None,
            total_memory_on_node: None,
        })
    }
}
