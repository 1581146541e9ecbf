use std::collections::BTreeMap;

use stageplan_core::error::Result;
use stageplan_core::id::StageId;
use stageplan_core::set::SetIdentifier;
use stageplan_core::stage::{AllocatorPolicy, TupleSetJobStage};

use super::missing;

const STAGE: &str = "TupleSetJobStage";

/// Accumulates one pipeline as analysis walks from a source towards a breaker.
#[derive(Debug, Clone, Default)]
pub struct TupleSetStageBuilder {
    job_id: String,
    stage_id: Option<StageId>,
    source_tuple_set: Option<String>,
    source: Option<SetIdentifier>,
    cost_basis: Option<SetIdentifier>,
    tuple_sets_to_build: Vec<String>,
    target_tuple_set: Option<String>,
    target_computation: Option<String>,
    output_type: Option<String>,
    sink: Option<SetIdentifier>,
    combiner: Option<SetIdentifier>,
    hash_sets_to_probe: BTreeMap<String, String>,
    broadcasting: bool,
    repartitioning: bool,
    repartition_join: bool,
    repartition_vector: bool,
    collect_as_map: bool,
    num_nodes_to_collect: usize,
    allocator_policy: AllocatorPolicy,
}

impl TupleSetStageBuilder {
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

    pub fn source_tuple_set(&mut self, name: impl Into<String>) -> &mut Self {
        self.source_tuple_set = Some(name.into());
        self
    }

    pub fn source(&mut self, set: SetIdentifier) -> &mut Self {
        self.source = Some(set);
        self
    }

    /// Rank join decisions by `set` instead of the source.
    ///
    /// A repartitioned probe side reads a fresh set with no statistics yet;
    /// its size is that of the set it was repartitioned from.
    pub fn cost_basis(&mut self, set: SetIdentifier) -> &mut Self {
        self.cost_basis = Some(set);
        self
    }

    pub fn add_tuple_set(&mut self, name: impl Into<String>) -> &mut Self {
        self.tuple_sets_to_build.push(name.into());
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

    pub fn output_type(&mut self, name: impl Into<String>) -> &mut Self {
        self.output_type = Some(name.into());
        self
    }

    pub fn sink(&mut self, set: SetIdentifier) -> &mut Self {
        self.sink = Some(set);
        self
    }

    pub fn combiner(&mut self, set: Option<SetIdentifier>) -> &mut Self {
        self.combiner = set;
        self
    }

    /// Probe `hash_set` to produce the join output `tuple_set`.
    pub fn add_hash_set_to_probe(
        &mut self,
        tuple_set: impl Into<String>,
        hash_set: impl Into<String>,
    ) -> &mut Self {
        self.hash_sets_to_probe
            .insert(tuple_set.into(), hash_set.into());
        self
    }

    pub fn broadcasting(&mut self, on: bool) -> &mut Self {
        self.broadcasting = on;
        self
    }

    pub fn repartitioning(&mut self, on: bool) -> &mut Self {
        self.repartitioning = on;
        self
    }

    pub fn repartition_join(&mut self, on: bool) -> &mut Self {
        self.repartition_join = on;
        self
    }

    pub fn repartition_vector(&mut self, on: bool) -> &mut Self {
        self.repartition_vector = on;
        self
    }

    pub fn collect_as_map(&mut self, on: bool) -> &mut Self {
        self.collect_as_map = on;
        self
    }

    pub fn num_nodes_to_collect(&mut self, n: usize) -> &mut Self {
        self.num_nodes_to_collect = n;
        self
    }

    pub fn allocator_policy(&mut self, policy: AllocatorPolicy) -> &mut Self {
        self.allocator_policy = policy;
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn get_source(&self) -> Option<&SetIdentifier> {
        self.source.as_ref()
    }

    pub fn get_source_tuple_set(&self) -> Option<&str> {
        self.source_tuple_set.as_deref()
    }

    /// The set whose statistics stand for this pipeline's input.
    pub fn cost_set(&self) -> Option<&SetIdentifier> {
        self.cost_basis.as_ref().or(self.source.as_ref())
    }

    pub fn tuple_sets(&self) -> &[String] {
        &self.tuple_sets_to_build
    }

    /// Last tuple set appended to the pipeline.
    pub fn last_tuple_set(&self) -> Option<&str> {
        self.tuple_sets_to_build.last().map(String::as_str)
    }

    pub fn is_probing(&self) -> bool {
        !self.hash_sets_to_probe.is_empty()
    }

    pub fn build(&self) -> Result<TupleSetJobStage> {
        let source = self.source.clone().ok_or_else(|| missing(STAGE, "source"))?;
        let input_agg_hash_out = source.is_aggregation_result;
        Ok(TupleSetJobStage {
            id: self.stage_id.ok_or_else(|| missing(STAGE, "stage id"))?,
            job_id: self.job_id.clone(),
            source_tuple_set: self
                .source_tuple_set
                .clone()
                .ok_or_else(|| missing(STAGE, "source tuple set"))?,
            source,
            tuple_sets_to_build: self.tuple_sets_to_build.clone(),
            target_tuple_set: self
                .target_tuple_set
                .clone()
                .ok_or_else(|| missing(STAGE, "target tuple set"))?,
            target_computation: self
                .target_computation
                .clone()
                .ok_or_else(|| missing(STAGE, "target computation"))?,
            output_type: self
                .output_type
                .clone()
                .ok_or_else(|| missing(STAGE, "output type"))?,
            sink: self.sink.clone().ok_or_else(|| missing(STAGE, "sink"))?,
            combining: self.combiner.is_some(),
            combiner: self.combiner.clone(),
            probing: self.is_probing(),
            hash_sets_to_probe: if self.hash_sets_to_probe.is_empty() {
                None
            } else {
                Some(self.hash_sets_to_probe.clone())
            },
            broadcasting: self.broadcasting,
            repartitioning: self.repartitioning,
            repartition_join: self.repartition_join,
            repartition_vector: self.repartition_vector,
            collect_as_map: self.collect_as_map,
            num_nodes_to_collect: self.num_nodes_to_collect,
            input_agg_hash_out,
            need_remove_input: input_agg_hash_out,
            allocator_policy: self.allocator_policy,
            node_id: None,
            num_nodes: None,
            num_total_partitions: None,
            total_memory_on_node: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stageplan_core::error::Error;

    fn ready() -> TupleSetStageBuilder {
        let mut b = TupleSetStageBuilder::new("job");
        b.stage_id(StageId::new(0))
            .source_tuple_set("in")
            .source(SetIdentifier::new("db", "input"))
            .add_tuple_set("in")
            .target_tuple_set("in")
            .target_computation("write")
            .output_type("Object")
            .sink(SetIdentifier::new("db", "out"));
        b
    }

    #[test]
    fn test_defaults() {
        let stage = ready().build().unwrap();
        assert!(!stage.probing);
        assert!(stage.hash_sets_to_probe.is_none());
        assert!(!stage.combining);
        assert!(!stage.input_agg_hash_out);
        assert!(!stage.need_remove_input);
        assert_eq!(stage.allocator_policy, AllocatorPolicy::Default);
        assert_eq!(stage.num_nodes_to_collect, 0);
    }

    #[test]
    fn test_probe_map_sets_probing() {
        let mut b = ready();
        assert!(!b.is_probing());
        b.add_hash_set_to_probe("joined", "job:j_broadcastData");
        assert!(b.is_probing());
        let stage = b.build().unwrap();
        assert!(stage.probing);
        assert_eq!(
            stage.hash_sets_to_probe.unwrap().get("joined").map(String::as_str),
            Some("job:j_broadcastData")
        );
    }

    #[test]
    fn test_aggregation_result_source_is_removed_after_read() {
        let mut b = ready();
        b.source(SetIdentifier::aggregation_result("job", "a_aggregationResult"));
        let stage = b.build().unwrap();
        assert!(stage.input_agg_hash_out);
        assert!(stage.need_remove_input);
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let mut b = TupleSetStageBuilder::new("job");
        b.source(SetIdentifier::new("db", "input"));
        assert!(matches!(b.build(), Err(Error::Invariant(_))));
    }

    #[test]
    fn test_cost_set_prefers_basis() {
        let mut b = ready();
        assert_eq!(b.cost_set().unwrap().key(), "db:input");
        b.cost_basis(SetIdentifier::new("db", "original"));
        assert_eq!(b.cost_set().unwrap().key(), "db:original");
        assert_eq!(b.last_tuple_set(), Some("in"));
    }
}
