//! The planning driver: picks the cheapest live source, analyzes it, and
//! folds the result into the job's running plan.
//!
//! State is a registry of sources keyed by `database:set_name` and a set of
//! penalized keys. A source whose analysis is refused is penalized: its
//! ranking cost is multiplied by the configured factor for the rest of the
//! session, so cheaper unprocessed sources go first. Within one increment a
//! source that just refused is not retried while another live source is
//! still untried.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use stageplan_core::config::PlannerConfig;
use stageplan_core::error::{Error, Result};
use stageplan_core::graph::ComputationGraph;
use stageplan_core::id::{NodeId, StageId};
use stageplan_core::stats::Statistics;

use crate::analyze::Analyzer;
use crate::factory::build_physical_graph;
use crate::node::{JoinState, PhysicalGraph, PhysicalNode};
use crate::plan::{JobPlan, PlanIncrement};

enum Attempt {
    Planned,
    Refused(String),
    Idle,
}

/// Skipped keys go last, then lower cost, then unpenalized.
fn ranks_before(a: (bool, f64, bool), b: (bool, f64, bool)) -> bool {
    if a.0 != b.0 {
        return !a.0;
    }
    if a.1 != b.1 {
        return a.1 < b.1;
    }
    !a.2 && b.2
}

pub struct PhysicalOptimizer {
    job_id: String,
    config: PlannerConfig,
    graph: ComputationGraph,
    nodes: PhysicalGraph,
    sources: BTreeMap<String, NodeId>,
    penalized: BTreeSet<String>,
    next_stage_id: StageId,
}

impl PhysicalOptimizer {
    pub fn new(
        job_id: impl Into<String>,
        graph: ComputationGraph,
        config: PlannerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (nodes, scans) = build_physical_graph(&graph)?;

        let mut sources = BTreeMap::new();
        for id in scans {
            let node = nodes.node(id);
            let key = node
                .source_set()
                .map(|s| s.key())
                .ok_or_else(|| Error::Invariant(format!("{} has no source set", node.output_name())))?;
            if sources.insert(key.clone(), id).is_some() {
                return Err(Error::Graph(format!("two scans read {}", key)));
            }
        }

        let job_id = job_id.into();
        info!(job = %job_id, sources = sources.len(), nodes = nodes.len(), "physical optimizer ready");
        Ok(Self {
            job_id,
            config,
            graph,
            nodes,
            sources,
            penalized: BTreeSet::new(),
            next_stage_id: StageId::new(0),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn graph(&self) -> &ComputationGraph {
        &self.graph
    }

    pub fn nodes(&self) -> &PhysicalGraph {
        &self.nodes
    }

    pub fn next_stage_id(&self) -> StageId {
        self.next_stage_id
    }

    /// True while some registered source still has consumers to plan.
    pub fn has_sources(&self) -> bool {
        self.sources
            .values()
            .any(|id| self.nodes.node(*id).has_consumers())
    }

    /// Whether the source registered under `key` still feeds unplanned consumers.
    pub fn has_consumers(&self, key: &str) -> bool {
        self.sources
            .get(key)
            .map(|id| self.nodes.node(*id).has_consumers())
            .unwrap_or(false)
    }

    pub fn source_keys(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn source(&self, key: &str) -> Option<&PhysicalNode> {
        self.sources.get(key).map(|id| self.nodes.node(*id))
    }

    pub fn is_penalized(&self, key: &str) -> bool {
        self.penalized.contains(key)
    }

    pub fn penalized(&self) -> &BTreeSet<String> {
        &self.penalized
    }

    /// Join state of the join producing `output_name`.
    pub fn join_state(&self, output_name: &str) -> Option<&JoinState> {
        self.nodes
            .lookup(output_name)
            .and_then(|id| self.nodes.node(id).join_state())
    }

    /// Cost used to rank the source under `key`, penalty included.
    pub fn ranking_cost(&self, key: &str, stats: &Statistics) -> Option<f64> {
        let id = self.sources.get(key)?;
        let mut cost = self.nodes.node(*id).cost(stats);
        if self.penalized.contains(key) {
            cost *= self.config.source_penalty_factor;
        }
        Some(cost)
    }

    /// The live source with the lowest ranking cost.
    ///
    /// On equal cost an unpenalized source wins, then the first key in
    /// order, so the answer is stable for unchanged statistics and penalties.
    pub fn best_source(&self, stats: &Statistics) -> Option<(String, NodeId)> {
        self.pick_source(stats, &BTreeSet::new())
    }

    /// Like `best_source`, but keys in `skip` only win when nothing else is live.
    fn pick_source(&self, stats: &Statistics, skip: &BTreeSet<String>) -> Option<(String, NodeId)> {
        let mut best: Option<(&String, NodeId, (bool, f64, bool))> = None;
        for (key, id) in &self.sources {
            if !self.nodes.node(*id).has_consumers() {
                continue;
            }
            let rank = (
                skip.contains(key),
                self.ranking_cost(key, stats).unwrap_or(0.0),
                self.penalized.contains(key),
            );
            if best.map_or(true, |(_, _, b)| ranks_before(rank, b)) {
                best = Some((key, *id, rank));
            }
        }
        best.map(|(key, id, _)| (key.clone(), id))
    }

    /// One attempt: analyze the best source and fold the outcome in.
    ///
    /// Returns `false` when the analysis was refused; the source is then
    /// penalized and stays registered.
    pub fn next_stages(&mut self, stats: &Statistics, out: &mut PlanIncrement) -> Result<bool> {
        Ok(matches!(
            self.attempt(stats, out, &BTreeSet::new())?,
            Attempt::Planned
        ))
    }

    fn attempt(
        &mut self,
        stats: &Statistics,
        out: &mut PlanIncrement,
        skip: &BTreeSet<String>,
    ) -> Result<Attempt> {
        let Some((key, source)) = self.pick_source(stats, skip) else {
            return Ok(Attempt::Idle);
        };
        debug!(
            source = %key,
            cost = self.nodes.node(source).cost(stats),
            penalized = self.penalized.contains(&key),
            "analyzing source"
        );

        let mut analyzer = Analyzer::new(
            &mut self.nodes,
            &mut self.graph,
            stats,
            &self.config,
            &self.job_id,
            self.next_stage_id,
        );
        let result = analyzer.analyze_source(source)?;
        let next_stage_id = analyzer.next_stage_id();

        if !result.success {
            warn!(source = %key, "analysis refused; penalizing source");
            self.penalized.insert(key.clone());
            return Ok(Attempt::Refused(key));
        }

        self.next_stage_id = next_stage_id;
        out.stages.extend(result.stages);
        out.intermediate_sets.extend(result.intermediate_sets);

        if let Some(new_source) = result.new_source {
            let node = self.nodes.node(new_source);
            let new_key = node
                .source_set()
                .map(|s| s.key())
                .ok_or_else(|| Error::Invariant(format!("{} has no source set", node.output_name())))?;
            debug!(source = %new_key, "registering new source");
            if let Some(previous) = self.sources.insert(new_key.clone(), new_source) {
                if previous != new_source {
                    warn!(source = %new_key, "new source replaces an existing one");
                }
            }
        }

        if !self.nodes.node(source).has_consumers() {
            self.sources.remove(&key);
        }
        Ok(Attempt::Planned)
    }

    /// Plan until one attempt succeeds or nothing is left to plan.
    ///
    /// Fails when every source keeps refusing: more consecutive refusals than
    /// live consumers across all sources means no order can make progress.
    pub fn plan_increment(&mut self, stats: &Statistics) -> Result<PlanIncrement> {
        self.prune_exhausted();
        let mut out = PlanIncrement::default();
        let budget: usize = self
            .sources
            .values()
            .map(|id| self.nodes.node(*id).active_consumers().len())
            .sum();
        let mut refusals = 0;
        // sources that refused this round; each live one is tried before any repeats
        let mut refused = BTreeSet::new();

        while self.has_sources() {
            match self.attempt(stats, &mut out, &refused)? {
                Attempt::Planned | Attempt::Idle => break,
                Attempt::Refused(key) => {
                    refused.insert(key);
                }
            }
            if self.live_keys().all(|k| refused.contains(k)) {
                refused.clear();
            }
            refusals += 1;
            if refusals > budget {
                return Err(Error::Plan(format!(
                    "planning stalled: {} consecutive refusals over sources {:?}",
                    refusals,
                    self.source_keys()
                )));
            }
        }
        Ok(out)
    }

    /// Plan the whole job against fixed statistics.
    pub fn plan_all(&mut self, stats: &Statistics) -> Result<JobPlan> {
        let mut plan = JobPlan::new(self.job_id.clone());
        while self.has_sources() {
            let increment = self.plan_increment(stats)?;
            plan.extend(increment);
        }
        self.prune_exhausted();
        info!(
            job = %self.job_id,
            stages = plan.stages.len(),
            intermediate_sets = plan.intermediate_sets.len(),
            "job planned"
        );
        Ok(plan)
    }

    fn live_keys(&self) -> impl Iterator<Item = &String> {
        self.sources
            .iter()
            .filter(|(_, id)| self.nodes.node(**id).has_consumers())
            .map(|(key, _)| key)
    }

    fn prune_exhausted(&mut self) {
        let nodes = &self.nodes;
        self.sources.retain(|_, id| nodes.node(*id).has_consumers());
    }
}

/// Plan `graph` in one go.
pub fn plan_job(
    job_id: impl Into<String>,
    graph: ComputationGraph,
    config: PlannerConfig,
    stats: &Statistics,
) -> Result<JobPlan> {
    PhysicalOptimizer::new(job_id, graph, config)?.plan_all(stats)
}
