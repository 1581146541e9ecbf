//! Physical node arena: one node per atomic computation reachable from a scan.
//!
//! Nodes are addressed by [`NodeId`]; consumer edges are id vectors, so the
//! producer/consumer graph needs no shared ownership.

use std::collections::{HashMap, VecDeque};

use stageplan_core::error::{Error, Result};
use stageplan_core::graph::{AtomicComputation, AtomicKind, JoinStrategy};
use stageplan_core::id::NodeId;
use stageplan_core::set::SetIdentifier;
use stageplan_core::stats::Statistics;

/// Progress of a join through its two-visit protocol.
///
/// The first input analyzed picks the strategy and builds the hash table;
/// every later visit probes it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JoinState {
    #[default]
    NotStarted,
    Started {
        strategy: JoinStrategy,
        hash_set_name: String,
    },
}

impl JoinState {
    /// The only transition. Fails if a strategy was already recorded.
    pub fn start(&mut self, strategy: JoinStrategy, hash_set_name: String) -> Result<()> {
        match self {
            JoinState::NotStarted => {
                *self = JoinState::Started {
                    strategy,
                    hash_set_name,
                };
                Ok(())
            }
            JoinState::Started { hash_set_name, .. } => Err(Error::Invariant(format!(
                "join already built hash set {}",
                hash_set_name
            ))),
        }
    }

    pub fn is_transversed(&self) -> bool {
        matches!(self, JoinState::Started { .. })
    }

    pub fn strategy(&self) -> Option<JoinStrategy> {
        match self {
            JoinState::NotStarted => None,
            JoinState::Started { strategy, .. } => Some(*strategy),
        }
    }

    pub fn hash_set_name(&self) -> Option<&str> {
        match self {
            JoinState::NotStarted => None,
            JoinState::Started { hash_set_name, .. } => Some(hash_set_name),
        }
    }

    pub fn partitioning_lhs(&self) -> bool {
        self.strategy() == Some(JoinStrategy::HashPartitioned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Scans, selections and everything else that pipelines.
    Pipeline,
    Aggregation,
    Partition,
    Join(JoinState),
}

impl NodeKind {
    pub fn for_atomic(kind: AtomicKind) -> Self {
        match kind {
            AtomicKind::Aggregate => NodeKind::Aggregation,
            AtomicKind::JoinSets => NodeKind::Join(JoinState::NotStarted),
            AtomicKind::Partition => NodeKind::Partition,
            AtomicKind::Scan | AtomicKind::Other => NodeKind::Pipeline,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhysicalNode {
    id: NodeId,
    atomic: AtomicComputation,
    kind: NodeKind,
    consumers: Vec<NodeId>,
    active_consumers: VecDeque<NodeId>,
    source_set: Option<SetIdentifier>,
}

impl PhysicalNode {
    fn new(id: NodeId, atomic: AtomicComputation) -> Self {
        Self {
            id,
            kind: NodeKind::for_atomic(atomic.kind),
            atomic,
            consumers: Vec::new(),
            active_consumers: VecDeque::new(),
            source_set: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn atomic(&self) -> &AtomicComputation {
        &self.atomic
    }

    pub fn output_name(&self) -> &str {
        &self.atomic.output_name
    }

    pub fn computation_name(&self) -> &str {
        &self.atomic.computation_name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn join_state(&self) -> Option<&JoinState> {
        match &self.kind {
            NodeKind::Join(state) => Some(state),
            _ => None,
        }
    }

    pub fn join_state_mut(&mut self) -> Option<&mut JoinState> {
        match &mut self.kind {
            NodeKind::Join(state) => Some(state),
            _ => None,
        }
    }

    /// Every consumer ever attached, in attachment order.
    pub fn consumers(&self) -> &[NodeId] {
        &self.consumers
    }

    /// Consumers not yet folded into a pipeline.
    pub fn active_consumers(&self) -> &VecDeque<NodeId> {
        &self.active_consumers
    }

    pub fn has_consumers(&self) -> bool {
        !self.active_consumers.is_empty()
    }

    pub fn front_consumer(&self) -> Option<NodeId> {
        self.active_consumers.front().copied()
    }

    pub(crate) fn pop_front_consumer(&mut self) -> Option<NodeId> {
        self.active_consumers.pop_front()
    }

    /// Move the front consumer to the back so the next attempt tries another branch.
    pub(crate) fn rotate_consumers(&mut self) {
        if let Some(front) = self.active_consumers.pop_front() {
            self.active_consumers.push_back(front);
        }
    }

    pub fn source_set(&self) -> Option<&SetIdentifier> {
        self.source_set.as_ref()
    }

    pub(crate) fn set_source_set(&mut self, set: SetIdentifier) {
        self.source_set = Some(set);
    }

    /// Byte cost of the source set; 0 for nodes that are not sources.
    pub fn cost(&self, stats: &Statistics) -> f64 {
        self.source_set
            .as_ref()
            .map(|set| stats.cost_of(set))
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PhysicalGraph {
    nodes: Vec<PhysicalNode>,
    by_output: HashMap<String, NodeId>,
}

impl PhysicalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the node for `atomic`, and whether it was created by this call.
    pub fn get_or_insert(&mut self, atomic: &AtomicComputation) -> (NodeId, bool) {
        if let Some(id) = self.by_output.get(&atomic.output_name) {
            return (*id, false);
        }
        let id = NodeId::new(self.nodes.len() as u64);
        self.nodes.push(PhysicalNode::new(id, atomic.clone()));
        self.by_output.insert(atomic.output_name.clone(), id);
        (id, true)
    }

    pub fn lookup(&self, output_name: &str) -> Option<NodeId> {
        self.by_output.get(output_name).copied()
    }

    pub fn node(&self, id: NodeId) -> &PhysicalNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut PhysicalNode {
        &mut self.nodes[id.index()]
    }

    /// Appends to both the static and the active consumer list of `producer`.
    pub fn add_consumer(&mut self, producer: NodeId, consumer: NodeId) {
        let node = self.node_mut(producer);
        node.consumers.push(consumer);
        node.active_consumers.push_back(consumer);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhysicalNode> {
        self.nodes.iter()
    }
}
