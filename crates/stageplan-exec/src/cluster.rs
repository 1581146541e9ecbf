//! The cluster collaborator: per-node storage and stage execution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stageplan_core::config::NodeResources;
use stageplan_core::error::Error as CoreError;
use stageplan_core::id::StageId;
use stageplan_core::set::SetIdentifier;
use stageplan_core::stage::JobStage;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("planning failed: {0}")]
    Plan(#[from] CoreError),

    #[error("stage {stage} failed on node {node}: {reason}")]
    StageFailed {
        stage: StageId,
        node: usize,
        reason: String,
    },

    #[error("statistics refresh failed on node {node}: {reason}")]
    Stats { node: usize, reason: String },

    #[error("set {set} on node {node}: {reason}")]
    Storage {
        set: String,
        node: usize,
        reason: String,
    },

    #[error("node {node}: {reason}")]
    Node { node: usize, reason: String },

    #[error("job cancelled")]
    Cancelled,

    #[error("hashing error: {0}")]
    Hash(String),
}

/// Size of one set as held by one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReport {
    pub database: String,
    pub set_name: String,
    pub num_pages: u64,
    pub page_size: u64,
}

/// Requests the scheduler sends to a single cluster node.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Every set the node holds, with its local page count.
    async fn collect_stats(&self, node: &NodeResources) -> Result<Vec<SetReport>, ExecError>;

    async fn create_set(&self, node: &NodeResources, set: &SetIdentifier) -> Result<(), ExecError>;

    async fn remove_set(&self, node: &NodeResources, set: &SetIdentifier) -> Result<(), ExecError>;

    /// Run `stage` (already specialized for `node`) to completion.
    async fn execute_stage(&self, node: &NodeResources, stage: &JobStage) -> Result<(), ExecError>;
}
