//! Per-node analysis: turns one path through the physical graph into stages.
//!
//! Analysis starts at a source and walks consumer edges, appending tuple sets
//! to a [`TupleSetStageBuilder`] until it reaches a node that ends the
//! pipeline: an output, a node with several consumers, an aggregation, a
//! partition, or a join input. What happens there depends on the node kind
//! and, for joins, on what the other input already decided.

use tracing::{debug, trace};

use stageplan_core::config::PlannerConfig;
use stageplan_core::error::{Error, Result};
use stageplan_core::graph::{Computation, ComputationGraph, ComputationType, JoinStrategy};
use stageplan_core::id::{NodeId, StageId};
use stageplan_core::set::SetIdentifier;
use stageplan_core::stage::JobStage;
use stageplan_core::stats::Statistics;

use crate::builder::{
    AggregationStageBuilder, BroadcastJoinBuildStageBuilder, HashPartitionedJoinBuildStageBuilder,
    TupleSetStageBuilder,
};
use crate::node::{JoinState, NodeKind, PhysicalGraph};

/// Output type of every stage that writes shuffle or join-side data.
pub const INTERMEDIATE_OUTPUT_TYPE: &str = "IntermediateData";

/// What one analysis step produced.
#[derive(Debug, Clone, Default)]
pub struct PhysicalOptimizerResult {
    pub stages: Vec<JobStage>,
    /// Sets the dispatcher must create before running `stages`.
    pub intermediate_sets: Vec<SetIdentifier>,
    /// A breaker whose output is now a source for later increments.
    pub new_source: Option<NodeId>,
    pub success: bool,
}

impl PhysicalOptimizerResult {
    fn done(
        stages: Vec<JobStage>,
        intermediate_sets: Vec<SetIdentifier>,
        new_source: Option<NodeId>,
    ) -> Self {
        Self {
            stages,
            intermediate_sets,
            new_source,
            success: true,
        }
    }

    /// The join-ordering rollback: nothing planned, try another source.
    pub fn refused() -> Self {
        Self::default()
    }
}

/// How a node ends (or continues) the pipeline reaching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Output,
    PassThrough,
    Materialize,
    Aggregate,
    Partition,
    Join,
}

pub fn route(nodes: &PhysicalGraph, id: NodeId) -> Route {
    let node = nodes.node(id);
    match node.kind() {
        NodeKind::Aggregation => Route::Aggregate,
        NodeKind::Partition => Route::Partition,
        NodeKind::Join(_) => Route::Join,
        NodeKind::Pipeline => match node.active_consumers().len() {
            0 => Route::Output,
            1 => Route::PassThrough,
            _ => Route::Materialize,
        },
    }
}

/// Analysis state for one attempt from one source.
///
/// Stage ids are taken from a local counter; the driver commits it only when
/// the attempt succeeds.
pub struct Analyzer<'a> {
    nodes: &'a mut PhysicalGraph,
    graph: &'a mut ComputationGraph,
    stats: &'a Statistics,
    config: &'a PlannerConfig,
    job_id: &'a str,
    next_stage_id: StageId,
}

impl<'a> Analyzer<'a> {
    pub fn new(
        nodes: &'a mut PhysicalGraph,
        graph: &'a mut ComputationGraph,
        stats: &'a Statistics,
        config: &'a PlannerConfig,
        job_id: &'a str,
        next_stage_id: StageId,
    ) -> Self {
        Self {
            nodes,
            graph,
            stats,
            config,
            job_id,
            next_stage_id,
        }
    }

    pub fn next_stage_id(&self) -> StageId {
        self.next_stage_id
    }

    fn take_stage_id(&mut self) -> StageId {
        let id = self.next_stage_id;
        self.next_stage_id = id.next();
        id
    }

    fn computation(&self, id: NodeId) -> Result<Computation> {
        let name = self.nodes.node(id).computation_name();
        Ok(self.graph.computation(name)?.clone())
    }

    fn output_name(&self, id: NodeId) -> String {
        self.nodes.node(id).output_name().to_string()
    }

    fn front_consumer(&self, id: NodeId) -> Result<NodeId> {
        self.nodes.node(id).front_consumer().ok_or_else(|| {
            Error::Invariant(format!(
                "{} has no active consumer",
                self.nodes.node(id).output_name()
            ))
        })
    }

    /// Start a pipeline at a registered source and follow its front consumer.
    ///
    /// On refusal the tried consumer moves to the back of the queue.
    pub fn analyze_source(&mut self, source: NodeId) -> Result<PhysicalOptimizerResult> {
        let node = self.nodes.node(source);
        let set = node.source_set().cloned().ok_or_else(|| {
            Error::Invariant(format!("{} is not a source", node.output_name()))
        })?;

        let mut builder = TupleSetStageBuilder::new(self.job_id);
        builder
            .source_tuple_set(node.output_name())
            .source(set);

        let result = self.pass_through(source, builder)?;
        if !result.success {
            self.nodes.node_mut(source).rotate_consumers();
        }
        Ok(result)
    }

    fn analyze(
        &mut self,
        id: NodeId,
        builder: TupleSetStageBuilder,
        prev: NodeId,
    ) -> Result<PhysicalOptimizerResult> {
        let route = route(self.nodes, id);
        trace!(node = %self.nodes.node(id).output_name(), ?route, "analyze");
        match route {
            Route::Output => self.output(id, builder, prev),
            Route::PassThrough => self.pass_through(id, builder),
            Route::Materialize => self.materialize(id, builder, prev),
            Route::Aggregate => self.aggregate(id, builder, prev),
            Route::Partition => self.partition(id, builder, prev),
            Route::Join => self.join(id, builder, prev),
        }
    }

    fn pass_through(
        &mut self,
        id: NodeId,
        mut builder: TupleSetStageBuilder,
    ) -> Result<PhysicalOptimizerResult> {
        let consumer = self.front_consumer(id)?;
        builder.add_tuple_set(self.output_name(id));
        let result = self.analyze(consumer, builder, id)?;
        if result.success {
            self.nodes.node_mut(id).pop_front_consumer();
        }
        Ok(result)
    }

    fn output(
        &mut self,
        id: NodeId,
        mut builder: TupleSetStageBuilder,
        prev: NodeId,
    ) -> Result<PhysicalOptimizerResult> {
        let comp = self.computation(id)?;
        let sink = comp.sink_set()?;
        builder
            .stage_id(self.take_stage_id())
            .target_tuple_set(self.output_name(prev))
            .target_computation(&comp.name)
            .output_type(&comp.output_type)
            .sink(sink)
            .allocator_policy(comp.allocator_policy);
        let stage = builder.build()?;
        debug!(stage = %stage.id, sink = %stage.sink, "pipeline ends at output");
        Ok(PhysicalOptimizerResult::done(
            vec![JobStage::TupleSet(stage)],
            Vec::new(),
            None,
        ))
    }

    /// The persisted output set, or a fresh intermediate one the computation
    /// is redirected to.
    fn materialized_sink(
        &mut self,
        id: NodeId,
        comp: &Computation,
        intermediate_sets: &mut Vec<SetIdentifier>,
    ) -> Result<SetIdentifier> {
        if comp.needs_materialize_output() {
            return comp.sink_set();
        }
        let output = self.output_name(id);
        self.graph
            .computation_mut(&comp.name)?
            .set_output(self.job_id, &output);
        let sink = SetIdentifier::intermediate(self.job_id, output, self.config.page_size);
        intermediate_sets.push(sink.clone());
        Ok(sink)
    }

    fn materialize(
        &mut self,
        id: NodeId,
        mut builder: TupleSetStageBuilder,
        prev: NodeId,
    ) -> Result<PhysicalOptimizerResult> {
        let comp = self.computation(id)?;
        let mut intermediate_sets = Vec::new();
        let sink = self.materialized_sink(id, &comp, &mut intermediate_sets)?;

        builder
            .stage_id(self.take_stage_id())
            .target_tuple_set(self.output_name(prev))
            .target_computation(&comp.name)
            .output_type(&comp.output_type)
            .sink(sink.clone())
            .allocator_policy(comp.allocator_policy);
        let stage = builder.build()?;
        debug!(stage = %stage.id, sink = %sink, "materializing multi-consumer output");

        self.nodes.node_mut(id).set_source_set(sink);
        Ok(PhysicalOptimizerResult::done(
            vec![JobStage::TupleSet(stage)],
            intermediate_sets,
            Some(id),
        ))
    }

    fn aggregate(
        &mut self,
        id: NodeId,
        mut builder: TupleSetStageBuilder,
        prev: NodeId,
    ) -> Result<PhysicalOptimizerResult> {
        let comp = self.computation(id)?;
        let output = self.output_name(id);
        let consumers = self.nodes.node(id).active_consumers().len();
        let mut intermediate_sets = Vec::new();

        let (sink, materialize, new_source) = match consumers {
            0 => (comp.sink_set()?, true, None),
            1 if comp.needs_materialize_output() => (comp.sink_set()?, true, Some(id)),
            1 => (
                SetIdentifier::aggregation_result(
                    self.job_id,
                    format!("{}_aggregationResult", output),
                ),
                false,
                Some(id),
            ),
            _ => (
                self.materialized_sink(id, &comp, &mut intermediate_sets)?,
                true,
                Some(id),
            ),
        };

        let aggregator = SetIdentifier::intermediate(
            self.job_id,
            format!("{}_aggregationData", output),
            self.config.shuffle_page_size,
        );
        intermediate_sets.push(aggregator.clone());
        let combiner = comp.uses_combiner.then(|| {
            SetIdentifier::intermediate(
                self.job_id,
                format!("{}_combinerData", output),
                self.config.shuffle_page_size,
            )
        });
        if let Some(combiner) = &combiner {
            intermediate_sets.push(combiner.clone());
        }

        builder
            .stage_id(self.take_stage_id())
            .target_tuple_set(self.output_name(prev))
            .target_computation(&comp.name)
            .output_type(INTERMEDIATE_OUTPUT_TYPE)
            .combiner(combiner)
            .sink(aggregator.clone())
            .repartitioning(true)
            .allocator_policy(comp.allocator_policy)
            .collect_as_map(comp.collect_as_map)
            .num_nodes_to_collect(comp.num_nodes_to_collect);
        let shuffle = builder.build()?;

        let aggregation = AggregationStageBuilder::new(self.job_id)
            .stage_id(self.take_stage_id())
            .source(aggregator)
            .sink(sink.clone())
            .aggregate_computation(&comp.name)
            .materialize(materialize)
            .build()?;
        debug!(
            shuffle = %shuffle.id,
            aggregation = %aggregation.id,
            sink = %sink,
            "aggregation breaks the pipeline"
        );

        if new_source.is_some() {
            self.nodes.node_mut(id).set_source_set(sink);
        }
        Ok(PhysicalOptimizerResult::done(
            vec![JobStage::TupleSet(shuffle), JobStage::Aggregation(aggregation)],
            intermediate_sets,
            new_source,
        ))
    }

    fn partition(
        &mut self,
        id: NodeId,
        mut builder: TupleSetStageBuilder,
        prev: NodeId,
    ) -> Result<PhysicalOptimizerResult> {
        let comp = self.computation(id)?;
        let consumers = self.nodes.node(id).active_consumers().len();
        let mut intermediate_sets = Vec::new();

        let (sink, new_source) = if consumers == 0 {
            (comp.sink_set()?, None)
        } else {
            let sink = self.materialized_sink(id, &comp, &mut intermediate_sets)?;
            (sink.with_page_size(self.config.page_size), Some(id))
        };

        builder
            .stage_id(self.take_stage_id())
            .target_tuple_set(self.output_name(prev))
            .target_computation(&comp.name)
            .output_type(&comp.output_type)
            .sink(sink.clone())
            .repartitioning(true)
            .repartition_vector(true)
            .allocator_policy(comp.allocator_policy);
        let stage = builder.build()?;
        debug!(stage = %stage.id, sink = %sink, "partition breaks the pipeline");

        if new_source.is_some() {
            self.nodes.node_mut(id).set_source_set(sink);
        }
        Ok(PhysicalOptimizerResult::done(
            vec![JobStage::TupleSet(stage)],
            intermediate_sets,
            new_source,
        ))
    }

    fn join(
        &mut self,
        id: NodeId,
        builder: TupleSetStageBuilder,
        prev: NodeId,
    ) -> Result<PhysicalOptimizerResult> {
        if !self.nodes.node(id).has_consumers() {
            return Err(Error::UnsupportedSink {
                computation: self.nodes.node(id).computation_name().to_string(),
                kind: ComputationType::Join.to_string(),
            });
        }
        let state = self
            .nodes
            .node(id)
            .join_state()
            .cloned()
            .ok_or_else(|| Error::Invariant("join route on a non-join node".into()))?;

        match state {
            JoinState::NotStarted => self.join_build(id, builder, prev),
            JoinState::Started {
                strategy: JoinStrategy::HashPartitioned,
                hash_set_name,
            } => self.join_probe_partitioned(id, builder, prev, hash_set_name),
            JoinState::Started {
                strategy: JoinStrategy::Broadcast,
                hash_set_name,
            } => {
                let mut builder = builder;
                let output = self.output_name(id);
                builder
                    .add_tuple_set(&output)
                    .add_hash_set_to_probe(&output, hash_set_name);
                self.join_probe(id, builder, prev)
            }
        }
    }

    /// First visit: pick a strategy from the cost of the pipeline's input and
    /// build the hash table. Does not continue into the join's consumer.
    fn join_build(
        &mut self,
        id: NodeId,
        mut builder: TupleSetStageBuilder,
        prev: NodeId,
    ) -> Result<PhysicalOptimizerResult> {
        let cost = builder
            .cost_set()
            .map(|set| self.stats.cost_of(set))
            .unwrap_or(0.0);
        let threshold = self.config.broadcast_join_cost_threshold;
        let output = self.output_name(id);

        if builder.is_probing() && cost <= threshold {
            debug!(join = %output, cost, "probing pipeline reached an unbuilt join; refusing");
            return Ok(PhysicalOptimizerResult::refused());
        }

        let comp = self.computation(id)?;
        let target = self.output_name(prev);
        let strategy = if cost > threshold {
            JoinStrategy::HashPartitioned
        } else {
            JoinStrategy::Broadcast
        };
        let suffix = match strategy {
            JoinStrategy::HashPartitioned => "repartitionData",
            JoinStrategy::Broadcast => "broadcastData",
        };
        let sink = SetIdentifier::intermediate(
            self.job_id,
            format!("{}_{}", output, suffix),
            self.config.broadcast_page_size,
        );
        let hash_set_name = sink.key();

        builder
            .stage_id(self.take_stage_id())
            .target_tuple_set(&target)
            .target_computation(&comp.name)
            .output_type(INTERMEDIATE_OUTPUT_TYPE)
            .sink(sink.clone())
            .allocator_policy(comp.allocator_policy);
        match strategy {
            JoinStrategy::HashPartitioned => {
                builder.repartitioning(true).repartition_join(true);
            }
            JoinStrategy::Broadcast => {
                builder.broadcasting(true);
            }
        }
        let prep = builder.build()?;

        let build = match strategy {
            JoinStrategy::HashPartitioned => JobStage::HashPartitionedJoinBuild(
                HashPartitionedJoinBuildStageBuilder::new(self.job_id)
                    .stage_id(self.take_stage_id())
                    .source(sink.clone())
                    .hash_set_name(&hash_set_name)
                    .source_tuple_set(&prep.source_tuple_set)
                    .target_tuple_set(&target)
                    .target_computation(&comp.name)
                    .build()?,
            ),
            JoinStrategy::Broadcast => JobStage::BroadcastJoinBuild(
                BroadcastJoinBuildStageBuilder::new(self.job_id)
                    .stage_id(self.take_stage_id())
                    .source(sink.clone())
                    .hash_set_name(&hash_set_name)
                    .source_tuple_set(&prep.source_tuple_set)
                    .target_tuple_set(&target)
                    .target_computation(&comp.name)
                    .build()?,
            ),
        };

        let join_comp = self.graph.computation_mut(&comp.name)?;
        join_comp.join_strategy = Some(strategy);
        join_comp.partitioning_lhs = strategy == JoinStrategy::HashPartitioned;

        let node = self.nodes.node_mut(id);
        let state = node
            .join_state_mut()
            .ok_or_else(|| Error::Invariant("join route on a non-join node".into()))?;
        state.start(strategy, hash_set_name.clone())?;

        debug!(join = %output, cost, ?strategy, hash_set = %hash_set_name, "join side built");
        Ok(PhysicalOptimizerResult::done(
            vec![JobStage::TupleSet(prep), build],
            vec![sink],
            None,
        ))
    }

    /// Second visit of a hash-partitioned join: repartition this side, then
    /// start a new pipeline that probes the partitioned table.
    fn join_probe_partitioned(
        &mut self,
        id: NodeId,
        mut builder: TupleSetStageBuilder,
        prev: NodeId,
        hash_set_name: String,
    ) -> Result<PhysicalOptimizerResult> {
        let comp = self.computation(id)?;
        let output = self.output_name(id);
        let sink = SetIdentifier::intermediate(
            self.job_id,
            format!("{}_probeRepartitionData", output),
            self.config.broadcast_page_size,
        );

        builder
            .stage_id(self.take_stage_id())
            .target_tuple_set(self.output_name(prev))
            .target_computation(&comp.name)
            .output_type(INTERMEDIATE_OUTPUT_TYPE)
            .sink(sink.clone())
            .repartitioning(true)
            .repartition_join(true)
            .allocator_policy(comp.allocator_policy);
        let prep = builder.build()?;

        let mut probe = TupleSetStageBuilder::new(self.job_id);
        probe.source(sink.clone());
        if let Some(name) = builder.get_source_tuple_set() {
            probe.source_tuple_set(name);
        }
        if let Some(basis) = builder.cost_set() {
            probe.cost_basis(basis.clone());
        }
        if let Some(last) = builder.last_tuple_set() {
            probe.add_tuple_set(last);
        }
        probe
            .add_tuple_set(&output)
            .add_hash_set_to_probe(&output, hash_set_name);

        let mut result = self.join_probe(id, probe, prev)?;
        if !result.success {
            return Ok(result);
        }
        result.stages.insert(0, JobStage::TupleSet(prep));
        result.intermediate_sets.insert(0, sink);
        Ok(result)
    }

    /// Continue a pipeline that now probes the join's hash table.
    ///
    /// A join output read by several consumers is materialized here.
    fn join_probe(
        &mut self,
        id: NodeId,
        builder: TupleSetStageBuilder,
        prev: NodeId,
    ) -> Result<PhysicalOptimizerResult> {
        if self.nodes.node(id).active_consumers().len() > 1 {
            return self.materialize(id, builder, prev);
        }
        let consumer = self.front_consumer(id)?;
        self.analyze(consumer, builder, id)
    }
}
