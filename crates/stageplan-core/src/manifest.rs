//! Job manifest recorded after a scheduled run, for audit and replay.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobManifest {
    pub id: ManifestId,
    pub job_id: String,

    /// Stable hash of every stage dispatched, in order.
    pub plan_hash: Hash256,

    pub engine_version: String,

    pub num_stages: usize,
    /// Planning increments; each one is followed by a statistics refresh.
    pub num_increments: usize,
    pub intermediate_sets_created: usize,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl JobManifest {
    pub fn new(job_id: impl Into<String>, plan_hash: Hash256, started_ms: u64) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            job_id: job_id.into(),
            plan_hash,
            engine_version: crate::VERSION.to_string(),
            num_stages: 0,
            num_increments: 0,
            intermediate_sets_created: 0,
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn finish(mut self, finished_ms: u64) -> Self {
        self.finished_ms = finished_ms;
        self
    }
}
