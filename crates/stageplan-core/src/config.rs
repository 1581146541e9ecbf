//! Planner configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default page size for materialized sets (64 MiB).
pub const DEFAULT_PAGE_SIZE: u64 = 64 * 1024 * 1024;

/// Sources at or below this cost are broadcast; above it, hash partitioned.
pub const BROADCAST_JOIN_COST_THRESHOLD: f64 = 15_000.0;

/// Multiplier applied to the ranking cost of a source that was refused.
pub const SOURCE_PENALIZE_FACTOR: f64 = 1_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Page size for intermediate sets written by materialization points.
    pub page_size: u64,

    /// Page size for broadcast and join-repartition data.
    pub broadcast_page_size: u64,

    /// Page size for the pre-aggregation shuffle.
    pub shuffle_page_size: u64,

    /// Cost above which a join side is hash partitioned instead of broadcast.
    pub broadcast_join_cost_threshold: f64,

    /// Factor applied to a penalized source's ranking cost.
    pub source_penalty_factor: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            broadcast_page_size: DEFAULT_PAGE_SIZE,
            shuffle_page_size: DEFAULT_PAGE_SIZE,
            broadcast_join_cost_threshold: BROADCAST_JOIN_COST_THRESHOLD,
            source_penalty_factor: SOURCE_PENALIZE_FACTOR,
        }
    }
}

impl PlannerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `STAGEPLAN_PAGE_SIZE`: intermediate set page size in bytes
    /// - `STAGEPLAN_BROADCAST_PAGE_SIZE`: broadcast/repartition page size
    /// - `STAGEPLAN_SHUFFLE_PAGE_SIZE`: aggregation shuffle page size
    /// - `STAGEPLAN_BROADCAST_JOIN_THRESHOLD`: broadcast vs. partition cutoff
    /// - `STAGEPLAN_SOURCE_PENALTY`: penalty multiplier for refused sources
    ///
    /// Values that fail to parse are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse::<u64>("STAGEPLAN_PAGE_SIZE") {
            cfg.page_size = v;
        }
        if let Some(v) = env_parse::<u64>("STAGEPLAN_BROADCAST_PAGE_SIZE") {
            cfg.broadcast_page_size = v;
        }
        if let Some(v) = env_parse::<u64>("STAGEPLAN_SHUFFLE_PAGE_SIZE") {
            cfg.shuffle_page_size = v;
        }
        if let Some(v) = env_parse::<f64>("STAGEPLAN_BROADCAST_JOIN_THRESHOLD") {
            cfg.broadcast_join_cost_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("STAGEPLAN_SOURCE_PENALTY") {
            cfg.source_penalty_factor = v;
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.broadcast_page_size == 0 || self.shuffle_page_size == 0 {
            return Err(Error::Config("page sizes must be non-zero".into()));
        }
        if !(self.broadcast_join_cost_threshold > 0.0) {
            return Err(Error::Config(format!(
                "broadcast join threshold must be positive, got {}",
                self.broadcast_join_cost_threshold
            )));
        }
        if !(self.source_penalty_factor >= 1.0) {
            return Err(Error::Config(format!(
                "source penalty factor must be at least 1, got {}",
                self.source_penalty_factor
            )));
        }
        Ok(())
    }
}

/// One worker the scheduler dispatches stages to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResources {
    pub id: usize,
    pub address: String,
    pub port: u16,
    pub num_cores: usize,
    /// Memory available to stages on this node, in bytes.
    pub memory_bytes: u64,
}

impl NodeResources {
    pub fn new(id: usize, address: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            address: address.into(),
            port,
            num_cores: 8,
            memory_bytes: 4 * 1024 * 1024 * 1024,
        }
    }

    pub fn with_cores(mut self, num_cores: usize) -> Self {
        self.num_cores = num_cores;
        self
    }

    pub fn with_memory(mut self, memory_bytes: u64) -> Self {
        self.memory_bytes = memory_bytes;
        self
    }

    /// Hash partitions this node hosts for aggregations and partitioned joins.
    pub fn num_partitions(&self, partition_to_core_ratio: f64) -> usize {
        let n = (self.num_cores as f64 * partition_to_core_ratio).floor() as usize;
        n.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Hash partitions per core on every node.
    pub partition_to_core_ratio: f64,
    pub nodes: Vec<NodeResources>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            partition_to_core_ratio: 0.75,
            nodes: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Reads `STAGEPLAN_PARTITION_TO_CORE_RATIO`; nodes must be supplied by the caller.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse::<f64>("STAGEPLAN_PARTITION_TO_CORE_RATIO") {
            cfg.partition_to_core_ratio = v;
        }
        cfg
    }

    pub fn with_nodes(mut self, nodes: Vec<NodeResources>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Total hash partitions across the cluster.
    pub fn total_partitions(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.num_partitions(self.partition_to_core_ratio))
            .sum()
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::Config("scheduler needs at least one node".into()));
        }
        if !(self.partition_to_core_ratio > 0.0) {
            return Err(Error::Config(format!(
                "partition to core ratio must be positive, got {}",
                self.partition_to_core_ratio
            )));
        }
        Ok(())
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}
