//! Job scheduler: interleaves planning increments with execution.
//!
//! One round is
//! 1. refresh statistics from every node (in parallel),
//! 2. ask the optimizer for the next increment,
//! 3. create the increment's intermediate sets on every node,
//! 4. dispatch its stages in order, each to all nodes at once,
//! 5. drop intermediate sets that no remaining source reads.
//!
//! Whatever is still alive when the loop ends (or fails) is removed before
//! `run` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use tracing::{debug, info, warn};

use stageplan_core::config::SchedulerConfig;
use stageplan_core::hash::hash_serde;
use stageplan_core::manifest::JobManifest;
use stageplan_core::set::SetIdentifier;
use stageplan_core::stage::JobStage;
use stageplan_core::stats::Statistics;
use stageplan_planner::optimizer::PhysicalOptimizer;

use crate::cluster::{ClusterClient, ExecError};
use crate::metrics::emit_span;

/// Cooperative cancellation flag, checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct JobScheduler<C: ClusterClient> {
    cluster: Arc<C>,
    config: SchedulerConfig,
    cancel: CancelHandle,
}

/// What a run has done so far; survives a failed round for cleanup.
#[derive(Default)]
struct RunState {
    live_sets: Vec<SetIdentifier>,
    /// Uncombined aggregation outputs not yet read by their consumer.
    agg_results: Vec<SetIdentifier>,
    dispatched: Vec<JobStage>,
    increments: usize,
    sets_created: usize,
}

impl<C: ClusterClient> JobScheduler<C> {
    pub fn new(cluster: Arc<C>, config: SchedulerConfig) -> Result<Self, ExecError> {
        config.validate()?;
        Ok(Self {
            cluster,
            config,
            cancel: CancelHandle::default(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Ask every node for its sets and sum them into cluster-wide statistics.
    pub async fn refresh_stats(&self) -> Result<Statistics, ExecError> {
        let requests = self
            .config
            .nodes
            .iter()
            .map(|node| self.cluster.collect_stats(node));
        let replies = join_all(requests).await;

        let mut stats = Statistics::new();
        for (node, reply) in self.config.nodes.iter().zip(replies) {
            let reports = reply.map_err(|e| ExecError::Stats {
                node: node.id,
                reason: e.to_string(),
            })?;
            for r in reports {
                stats.record_pages(&r.database, &r.set_name, r.num_pages, r.page_size);
            }
        }
        debug!(sets = stats.len(), "statistics refreshed");
        Ok(stats)
    }

    /// Run one stage on all nodes, each with its own node-specific copy.
    pub async fn dispatch(&self, stage: &JobStage) -> Result<(), ExecError> {
        let runs = self.config.nodes.iter().map(|node| {
            let local = stage.specialize_for(node, &self.config);
            async move { (node.id, self.cluster.execute_stage(node, &local).await) }
        });
        for (node, result) in join_all(runs).await {
            if let Err(e) = result {
                return Err(ExecError::StageFailed {
                    stage: stage.id(),
                    node,
                    reason: e.to_string(),
                });
            }
        }
        emit_span(
            "stage",
            &[
                ("id", stage.id().to_string()),
                ("kind", stage.kind().to_string()),
                ("nodes", self.config.nodes.len().to_string()),
            ],
        );
        Ok(())
    }

    pub async fn create_set(&self, set: &SetIdentifier) -> Result<(), ExecError> {
        let requests = self
            .config
            .nodes
            .iter()
            .map(|node| self.cluster.create_set(node, set));
        join_all(requests).await.into_iter().collect()
    }

    pub async fn remove_set(&self, set: &SetIdentifier) -> Result<(), ExecError> {
        let requests = self
            .config
            .nodes
            .iter()
            .map(|node| self.cluster.remove_set(node, set));
        join_all(requests).await.into_iter().collect()
    }

    /// Plan and execute the optimizer's job to completion.
    pub async fn run(&self, optimizer: &mut PhysicalOptimizer) -> Result<JobManifest, ExecError> {
        let started_ms = now_millis();
        let mut state = RunState::default();

        let outcome = self.drive(optimizer, &mut state).await;

        let mut cleanup = Ok(());
        let leftovers = std::mem::take(&mut state.live_sets)
            .into_iter()
            .chain(std::mem::take(&mut state.agg_results));
        for set in leftovers {
            if let Err(e) = self.remove_set(&set).await {
                warn!(set = %set, error = %e, "failed to remove intermediate set");
                cleanup = Err(e);
            }
        }
        outcome?;
        cleanup?;

        let plan_hash = hash_serde(&state.dispatched).map_err(|e| ExecError::Hash(e.to_string()))?;
        let mut manifest = JobManifest::new(optimizer.job_id(), plan_hash, started_ms);
        manifest.num_stages = state.dispatched.len();
        manifest.num_increments = state.increments;
        manifest.intermediate_sets_created = state.sets_created;
        let manifest = manifest.finish(now_millis());

        info!(
            job = %manifest.job_id,
            stages = manifest.num_stages,
            increments = manifest.num_increments,
            plan = %manifest.plan_hash.short(),
            "job finished"
        );
        emit_span(
            "job",
            &[
                ("job_id", manifest.job_id.clone()),
                ("stages", manifest.num_stages.to_string()),
                ("elapsed_ms", (manifest.finished_ms - manifest.started_ms).to_string()),
            ],
        );
        Ok(manifest)
    }

    async fn drive(
        &self,
        optimizer: &mut PhysicalOptimizer,
        state: &mut RunState,
    ) -> Result<(), ExecError> {
        while optimizer.has_sources() {
            self.check_cancelled()?;
            let stats = self.refresh_stats().await?;
            let increment = optimizer.plan_increment(&stats)?;
            if increment.is_empty() {
                break;
            }
            state.increments += 1;
            debug!(
                increment = state.increments,
                stages = increment.stages.len(),
                sets = increment.intermediate_sets.len(),
                "planned increment"
            );

            // tracked before creation so a partial failure is still cleaned up
            for set in &increment.intermediate_sets {
                state.live_sets.push(set.clone());
                self.create_set(set).await?;
                state.sets_created += 1;
            }

            for stage in increment.stages {
                self.check_cancelled()?;
                if let Some(sink) = stage.sink().filter(|s| s.is_aggregation_result) {
                    state.agg_results.push(sink.clone());
                }
                self.dispatch(&stage).await?;
                state.dispatched.push(stage);
            }

            // the reading stage drops an aggregation result itself
            state
                .agg_results
                .retain(|set| optimizer.has_consumers(&set.key()));

            let (keep, consumed): (Vec<_>, Vec<_>) = std::mem::take(&mut state.live_sets)
                .into_iter()
                .partition(|set| optimizer.has_consumers(&set.key()));
            state.live_sets = keep;
            for set in consumed {
                debug!(set = %set, "removing consumed intermediate set");
                self.remove_set(&set).await?;
            }
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), ExecError> {
        if self.cancel.is_cancelled() {
            warn!("job cancelled");
            return Err(ExecError::Cancelled);
        }
        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
