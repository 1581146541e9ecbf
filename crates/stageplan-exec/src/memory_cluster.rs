//! In-process cluster for tests and dry runs.
//!
//! Holds per-node set sizes in a shared map and records every request. A
//! stage "writes" a configurable number of pages to its sink on each node,
//! which is what the next statistics refresh reports back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use stageplan_core::config::{NodeResources, DEFAULT_PAGE_SIZE};
use stageplan_core::id::StageId;
use stageplan_core::set::{SetIdentifier, SetType};
use stageplan_core::stage::JobStage;

use crate::cluster::{ClusterClient, ExecError, SetReport};

#[derive(Debug, Default)]
struct ClusterState {
    /// (node id, set key) -> report
    sets: HashMap<(usize, String), SetReport>,
    /// Pages every node writes to a sink, by set key.
    output_pages: HashMap<String, u64>,
    executed: Vec<(usize, JobStage)>,
    created: Vec<(usize, String)>,
    removed: Vec<(usize, String)>,
    fail_stage: Option<(usize, StageId)>,
    fail_stats: Option<usize>,
}

/// Thread-safe simulated cluster.
#[derive(Clone, Default)]
pub struct LocalCluster {
    state: Arc<Mutex<ClusterState>>,
    stage_delay: Option<Duration>,
}

impl LocalCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every stage execution.
    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = Some(delay);
        self
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pre-populate a user set on one node.
    pub fn seed_set(&self, node: usize, database: &str, set_name: &str, pages: u64, page_size: u64) {
        let set = SetIdentifier::new(database, set_name);
        self.state().sets.insert(
            (node, set.key()),
            SetReport {
                database: database.to_string(),
                set_name: set_name.to_string(),
                num_pages: pages,
                page_size,
            },
        );
    }

    /// Number of pages each node writes when a stage targets `set_key`.
    pub fn set_output_pages(&self, set_key: &str, pages: u64) {
        self.state().output_pages.insert(set_key.to_string(), pages);
    }

    /// Make `node` fail when asked to run `stage`.
    pub fn fail_stage_on(&self, node: usize, stage: StageId) {
        self.state().fail_stage = Some((node, stage));
    }

    /// Make `node` fail statistics requests.
    pub fn fail_stats_on(&self, node: usize) {
        self.state().fail_stats = Some(node);
    }

    pub fn executed_stages(&self) -> Vec<(usize, JobStage)> {
        self.state().executed.clone()
    }

    /// Stage ids in the order node `node` ran them.
    pub fn stage_order(&self, node: usize) -> Vec<StageId> {
        self.state()
            .executed
            .iter()
            .filter(|(n, _)| *n == node)
            .map(|(_, s)| s.id())
            .collect()
    }

    pub fn created_sets(&self) -> Vec<(usize, String)> {
        self.state().created.clone()
    }

    pub fn removed_sets(&self) -> Vec<(usize, String)> {
        self.state().removed.clone()
    }

    pub fn has_set(&self, node: usize, set_key: &str) -> bool {
        self.state().sets.contains_key(&(node, set_key.to_string()))
    }
}

#[async_trait]
impl ClusterClient for LocalCluster {
    async fn collect_stats(&self, node: &NodeResources) -> Result<Vec<SetReport>, ExecError> {
        let state = self.state();
        if state.fail_stats == Some(node.id) {
            return Err(ExecError::Node {
                node: node.id,
                reason: "statistics unavailable".into(),
            });
        }
        let mut reports: Vec<SetReport> = state
            .sets
            .iter()
            .filter(|((n, _), _)| *n == node.id)
            .map(|(_, r)| r.clone())
            .collect();
        reports.sort_by(|a, b| (&a.database, &a.set_name).cmp(&(&b.database, &b.set_name)));
        Ok(reports)
    }

    async fn create_set(&self, node: &NodeResources, set: &SetIdentifier) -> Result<(), ExecError> {
        let mut state = self.state();
        let key = (node.id, set.key());
        if state.sets.contains_key(&key) {
            return Err(ExecError::Storage {
                set: set.key(),
                node: node.id,
                reason: "set already exists".into(),
            });
        }
        state.sets.insert(
            key,
            SetReport {
                database: set.database.clone(),
                set_name: set.set_name.clone(),
                num_pages: 0,
                page_size: set.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            },
        );
        state.created.push((node.id, set.key()));
        Ok(())
    }

    async fn remove_set(&self, node: &NodeResources, set: &SetIdentifier) -> Result<(), ExecError> {
        let mut state = self.state();
        state.sets.remove(&(node.id, set.key()));
        state.removed.push((node.id, set.key()));
        Ok(())
    }

    async fn execute_stage(&self, node: &NodeResources, stage: &JobStage) -> Result<(), ExecError> {
        if let Some(delay) = self.stage_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.fail_stage == Some((node.id, stage.id())) {
            return Err(ExecError::Node {
                node: node.id,
                reason: format!("injected failure in {}", stage.kind()),
            });
        }
        let source = stage.source();
        if source.set_type == SetType::Intermediate
            && !state.sets.contains_key(&(node.id, source.key()))
        {
            return Err(ExecError::Storage {
                set: source.key(),
                node: node.id,
                reason: "stage reads a set that does not exist".into(),
            });
        }

        if let Some(sink) = stage.sink() {
            let pages = state.output_pages.get(&sink.key()).copied().unwrap_or(1);
            let page_size = sink.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
            let report = state
                .sets
                .entry((node.id, sink.key()))
                .or_insert_with(|| SetReport {
                    database: sink.database.clone(),
                    set_name: sink.set_name.clone(),
                    num_pages: 0,
                    page_size,
                });
            report.num_pages += pages;
        }
        if let JobStage::TupleSet(s) = stage {
            if s.need_remove_input {
                state.sets.remove(&(node.id, s.source.key()));
            }
        }

        state.executed.push((node.id, stage.clone()));
        Ok(())
    }
}
