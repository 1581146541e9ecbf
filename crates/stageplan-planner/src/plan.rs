//! Job plan: the ordered stages and intermediate sets for one job.
//!
//! The dispatcher creates every intermediate set before running the stages
//! that reference it and executes stages strictly in order.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use stageplan_core::error::{Error, Result};
use stageplan_core::hash::{hash_serde, Hash256};
use stageplan_core::set::{SetIdentifier, SetType};
use stageplan_core::stage::JobStage;

/// What one planning increment produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanIncrement {
    pub stages: Vec<JobStage>,
    pub intermediate_sets: Vec<SetIdentifier>,
}

impl PlanIncrement {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPlan {
    pub job_id: String,
    pub stages: Vec<JobStage>,
    pub intermediate_sets: Vec<SetIdentifier>,
}

impl JobPlan {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            stages: Vec::new(),
            intermediate_sets: Vec::new(),
        }
    }

    pub fn extend(&mut self, increment: PlanIncrement) {
        self.stages.extend(increment.stages);
        self.intermediate_sets.extend(increment.intermediate_sets);
    }

    /// Stable hash of the stage sequence.
    pub fn fingerprint(&self) -> Result<Hash256> {
        hash_serde(&self.stages)
    }

    /// Check the ordering contract of an emitted plan.
    ///
    /// Stage ids must strictly increase. Any non-user set a stage reads must
    /// be written by an earlier stage, and any hash set it probes must be
    /// built by an earlier stage.
    pub fn check_order(&self) -> Result<()> {
        let mut written: HashSet<String> = HashSet::new();
        let mut built: HashSet<String> = HashSet::new();
        let mut last = None;

        for stage in &self.stages {
            if let Some(prev) = last {
                if stage.id() <= prev {
                    return Err(Error::Invariant(format!(
                        "stage {} follows {}",
                        stage.id(),
                        prev
                    )));
                }
            }
            last = Some(stage.id());

            let source = stage.source();
            if source.set_type != SetType::UserSet && !written.contains(&source.key()) {
                return Err(Error::Invariant(format!(
                    "{} reads {} before it is written",
                    stage.id(),
                    source
                )));
            }

            match stage {
                JobStage::TupleSet(s) => {
                    for hash_set in s.hash_sets_to_probe.iter().flat_map(|m| m.values()) {
                        if !built.contains(hash_set) {
                            return Err(Error::Invariant(format!(
                                "{} probes {} before it is built",
                                s.id, hash_set
                            )));
                        }
                    }
                }
                JobStage::BroadcastJoinBuild(s) => {
                    built.insert(s.hash_set_name.clone());
                }
                JobStage::HashPartitionedJoinBuild(s) => {
                    built.insert(s.hash_set_name.clone());
                }
                JobStage::Aggregation(_) => {}
            }

            if let Some(sink) = stage.sink() {
                written.insert(sink.key());
            }
        }
        Ok(())
    }
}
