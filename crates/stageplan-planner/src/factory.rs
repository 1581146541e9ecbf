//! Builds the physical node arena from a logical computation graph.

use stageplan_core::error::Result;
use stageplan_core::graph::ComputationGraph;
use stageplan_core::id::NodeId;

use crate::node::PhysicalGraph;

/// Walk the graph depth-first from every scan.
///
/// Each atomic gets exactly one node; an edge is added for every
/// producer/consumer pair and a node is descended into only when first seen.
/// Returns the arena and the scan nodes, each carrying its source set.
pub fn build_physical_graph(graph: &ComputationGraph) -> Result<(PhysicalGraph, Vec<NodeId>)> {
    graph.validate()?;

    let mut nodes = PhysicalGraph::new();
    let mut sources = Vec::new();

    for scan in graph.sources() {
        let set = graph.computation(&scan.computation_name)?.source_set()?;
        let (id, _) = nodes.get_or_insert(scan);
        nodes.node_mut(id).set_source_set(set);
        sources.push(id);

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let output = nodes.node(current).output_name().to_string();
            for consumer in graph.consumers_of(&output) {
                let (consumer_id, created) = nodes.get_or_insert(consumer);
                nodes.add_consumer(current, consumer_id);
                if created {
                    stack.push(consumer_id);
                }
            }
        }
    }

    Ok((nodes, sources))
}
