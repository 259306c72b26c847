//! Strongly connected component detection and cycle collapsing.
//!
//! Mutually recursive functions make inclusive time circular. Collapsing
//! every nontrivial strongly connected component into a single [`Cycle`]
//! node turns the node-level graph into a DAG, which is what the time
//! propagator needs.

use crate::graph::{Cycle, Graph, Node, NodeIndex, NodeKind};
use log::debug;
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;

/// Directed graph over `0..adjacency.len()`, one petgraph node per vertex.
pub(crate) fn digraph(adjacency: &[Vec<usize>]) -> DiGraph<(), ()> {
    let edges = adjacency.iter().map(Vec::len).sum();
    let mut graph = DiGraph::with_capacity(adjacency.len(), edges);
    let nodes: Vec<_> = adjacency.iter().map(|_| graph.add_node(())).collect();
    for (v, successors) in adjacency.iter().enumerate() {
        for &w in successors {
            graph.add_edge(nodes[v], nodes[w], ());
        }
    }
    graph
}

/// Strongly connected components of an adjacency list.
///
/// Components come out in reverse topological order: a component is only
/// emitted after every component reachable from it. Members of each
/// component are sorted.
pub fn strongly_connected_components(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    tarjan_scc(&digraph(adjacency))
        .into_iter()
        .map(|component| {
            let mut members: Vec<usize> = component.into_iter().map(|n| n.index()).collect();
            members.sort_unstable();
            members
        })
        .collect()
}

impl Graph {
    /// Node-level successors, ignoring self-edges.
    pub(crate) fn adjacency(&self) -> Vec<Vec<NodeIndex>> {
        (0..self.nodes.len())
            .map(|n| {
                self.outgoing(n)
                    .filter(|e| !e.is_self_edge())
                    .map(|e| e.callee)
                    .collect()
            })
            .collect()
    }

    /// Strongly connected components of the current node-level graph.
    pub fn node_components(&self) -> Vec<Vec<NodeIndex>> {
        strongly_connected_components(&self.adjacency())
    }

    /// Replace every nontrivial strongly connected component by one cycle
    /// node and return how many were formed.
    ///
    /// Boundary edges are rewritten onto the cycle node and merged; edges
    /// within the component become the cycle's internal calls. A function
    /// that only calls itself stays an ordinary node. Collapsing a graph
    /// with no multi-node component leaves it untouched.
    pub fn collapse_cycles(&mut self) -> usize {
        let mut components = self.node_components();
        let formed = components.iter().filter(|c| c.len() > 1).count();
        if formed == 0 {
            return 0;
        }

        // Keep first-seen order of the nodes.
        components.sort_unstable_by_key(|c| c[0]);

        let mut old: Vec<Option<Node>> = self.nodes.drain(..).map(Some).collect();
        let mut nodes = Vec::with_capacity(components.len());
        for component in components {
            if let [single] = component.as_slice() {
                if let Some(node) = old[*single].take() {
                    nodes.push(node);
                }
                continue;
            }

            let mut members = Vec::new();
            for n in component {
                if let Some(node) = old[n].take() {
                    members.extend_from_slice(node.members());
                }
            }
            members.sort_unstable();
            nodes.push(Node {
                kind: NodeKind::Cycle(Cycle {
                    members,
                    internal_calls: Vec::new(),
                }),
                self_time: 0.0,
                calls: 0,
                total_time: None,
                total_pct: None,
            });
        }

        self.nodes = nodes;
        self.rebuild_edges();

        debug!(
            "collapsed {} cycle(s), {} nodes remain",
            formed,
            self.nodes.len()
        );
        formed
    }
}
