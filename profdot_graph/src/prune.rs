//! Reduce the annotated graph to what is worth displaying.

use crate::error::{GraphError, Result};
use crate::graph::{CallIndex, FunctionIndex, Graph, NodeIndex};
use crate::propagate::percentage;
use crate::record::FunctionId;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// ============================================================================
// Options
// ============================================================================

/// Matches functions by a regular expression over their display name.
#[derive(Debug, Clone)]
pub struct Selector {
    pattern: Regex,
}

impl Selector {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|source| GraphError::InvalidSelector {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { pattern })
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn matches(&self, id: &FunctionId) -> bool {
        self.pattern.is_match(&id.to_string())
    }
}

/// Significance thresholds and subgraph bounds.
#[derive(Debug, Clone)]
pub struct PruneOptions {
    /// Nodes below this total percentage are dropped. 0 keeps all.
    pub node_threshold_pct: f64,
    /// Edges below this total percentage are dropped. 0 keeps all.
    pub edge_threshold_pct: f64,
    /// Keep only descendants of the matching nodes.
    pub root: Option<Selector>,
    /// Keep only ancestors of the matching nodes.
    pub leaf: Option<Selector>,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            node_threshold_pct: 0.5,
            edge_threshold_pct: 0.1,
            root: None,
            leaf: None,
        }
    }
}

impl PruneOptions {
    /// Options that keep the whole graph.
    pub fn keep_all() -> Self {
        Self {
            node_threshold_pct: 0.0,
            edge_threshold_pct: 0.0,
            root: None,
            leaf: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("node threshold", self.node_threshold_pct),
            ("edge threshold", self.edge_threshold_pct),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(GraphError::InvalidThreshold { name, value });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Display graph
// ============================================================================

/// A function as shown inside a display node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayFunction {
    pub index: FunctionIndex,
    pub id: FunctionId,
    pub self_time: f64,
    pub calls: u64,
}

/// A retained node: one function, or all members of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayNode {
    pub index: NodeIndex,
    pub functions: Vec<DisplayFunction>,
    pub is_cycle: bool,
    pub self_time: f64,
    pub total_time: f64,
    pub total_pct: f64,
    pub calls: u64,
}

/// A function-level call folded into a display edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayCall {
    pub caller: FunctionIndex,
    pub callee: FunctionIndex,
    pub calls: u64,
}

/// A retained edge.
///
/// Internal edges join two members of the same cycle; they have no total
/// percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayEdge {
    pub caller: NodeIndex,
    pub callee: NodeIndex,
    pub calls: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pct: Option<f64>,
    pub internal: bool,
    pub parts: Vec<DisplayCall>,
}

/// The pruned, annotated graph handed to renderers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DisplayGraph {
    pub total_time: f64,
    pub nodes: Vec<DisplayNode>,
    pub edges: Vec<DisplayEdge>,
}

impl DisplayGraph {
    pub fn node(&self, index: NodeIndex) -> Option<&DisplayNode> {
        self.nodes.iter().find(|n| n.index == index)
    }

    /// Display node containing the named function.
    pub fn node_for(&self, id: &FunctionId) -> Option<&DisplayNode> {
        self.nodes
            .iter()
            .find(|n| n.functions.iter().any(|f| &f.id == id))
    }

    pub fn function(&self, index: FunctionIndex) -> Option<&DisplayFunction> {
        self.nodes
            .iter()
            .flat_map(|n| n.functions.iter())
            .find(|f| f.index == index)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ============================================================================
// Pruning
// ============================================================================

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

impl Graph {
    fn matching_nodes(&self, selector: &Selector) -> Vec<NodeIndex> {
        (0..self.nodes.len())
            .filter(|&n| {
                self.nodes[n]
                    .members()
                    .iter()
                    .any(|&f| selector.matches(&self.functions[f].id))
            })
            .collect()
    }

    fn reachable(&self, seeds: &[NodeIndex], direction: Direction) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        for &seed in seeds {
            if !seen[seed] {
                seen[seed] = true;
                queue.push_back(seed);
            }
        }
        while let Some(node) = queue.pop_front() {
            let next: Vec<NodeIndex> = match direction {
                Direction::Forward => self.outgoing(node).map(|e| e.callee).collect(),
                Direction::Backward => self.incoming(node).map(|e| e.caller).collect(),
            };
            for n in next {
                if !seen[n] {
                    seen[n] = true;
                    queue.push_back(n);
                }
            }
        }
        seen
    }

    /// Share of the callee's calls made through one function-level call.
    fn call_share(&self, call: CallIndex) -> f64 {
        let call = &self.calls[call];
        let callee_calls = self.functions[call.callee].calls;
        percentage(call.calls as f64, callee_calls as f64)
    }

    /// Produce the display graph.
    ///
    /// Percentages are those of the full graph; nothing is re-propagated
    /// after nodes are dropped. Call [`Graph::propagate`] first, otherwise
    /// every node counts as 0%.
    pub fn prune(&self, options: &PruneOptions) -> Result<DisplayGraph> {
        options.validate()?;

        let mut keep = vec![true; self.nodes.len()];
        if let Some(root) = &options.root {
            let reach = self.reachable(&self.matching_nodes(root), Direction::Forward);
            keep.iter_mut().zip(reach).for_each(|(k, r)| *k &= r);
        }
        if let Some(leaf) = &options.leaf {
            let reach = self.reachable(&self.matching_nodes(leaf), Direction::Backward);
            keep.iter_mut().zip(reach).for_each(|(k, r)| *k &= r);
        }
        if options.node_threshold_pct > 0.0 {
            for (k, node) in keep.iter_mut().zip(&self.nodes) {
                *k &= node.total_pct.unwrap_or(0.0) >= options.node_threshold_pct;
            }
        }

        let nodes: Vec<DisplayNode> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|&(n, _)| keep[n])
            .map(|(n, node)| DisplayNode {
                index: n,
                functions: node
                    .members()
                    .iter()
                    .map(|&f| {
                        let function = &self.functions[f];
                        DisplayFunction {
                            index: f,
                            id: function.id.clone(),
                            self_time: function.self_time,
                            calls: function.calls,
                        }
                    })
                    .collect(),
                is_cycle: node.is_cycle(),
                self_time: node.self_time,
                total_time: node.total_time.unwrap_or(0.0),
                total_pct: node.total_pct.unwrap_or(0.0),
                calls: node.calls,
            })
            .collect();

        let edge_threshold = options.edge_threshold_pct;
        let mut edges = Vec::new();
        for edge in &self.edges {
            if !keep[edge.caller] || !keep[edge.callee] {
                continue;
            }
            if edge_threshold > 0.0 && edge.total_pct.unwrap_or(0.0) < edge_threshold {
                continue;
            }
            edges.push(DisplayEdge {
                caller: edge.caller,
                callee: edge.callee,
                calls: edge.calls,
                total_time: edge.total_time,
                total_pct: edge.total_pct,
                internal: false,
                parts: edge.parts.iter().map(|&c| self.display_call(c)).collect(),
            });
        }

        for (n, node) in self.nodes.iter().enumerate() {
            let Some(cycle) = node.cycle() else {
                continue;
            };
            if !keep[n] {
                continue;
            }
            for &c in &cycle.internal_calls {
                if edge_threshold > 0.0 && self.call_share(c) < edge_threshold {
                    continue;
                }
                let call = self.display_call(c);
                edges.push(DisplayEdge {
                    caller: n,
                    callee: n,
                    calls: call.calls,
                    total_time: None,
                    total_pct: None,
                    internal: true,
                    parts: vec![call],
                });
            }
        }

        debug!(
            "kept {} of {} nodes and {} edges",
            nodes.len(),
            self.nodes.len(),
            edges.len()
        );

        Ok(DisplayGraph {
            total_time: self.total_time,
            nodes,
            edges,
        })
    }

    fn display_call(&self, index: CallIndex) -> DisplayCall {
        let call = &self.calls[index];
        DisplayCall {
            caller: call.caller,
            callee: call.callee,
            calls: call.calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::propagate::TotalMethod;
    use crate::record::{CallRecord, FunctionRecord};

    fn id(name: &str) -> FunctionId {
        FunctionId::named(name)
    }

    fn annotated(calls: &[(&str, &str, u64)], self_times: &[(&str, f64)]) -> Graph {
        let mut builder = GraphBuilder::new();
        for &(caller, callee, n) in calls {
            builder.add_call(CallRecord::new(id(caller), id(callee), n));
        }
        for &(name, time) in self_times {
            builder.add_function(FunctionRecord::new(id(name)).with_self_time(time));
        }
        let mut graph = builder.build();
        graph.propagate(TotalMethod::CallRatio).unwrap();
        graph
    }

    fn chain() -> Graph {
        annotated(
            &[("main", "a", 1), ("a", "b", 1)],
            &[("main", 0.0), ("a", 30.0), ("b", 70.0)],
        )
    }

    fn names(display: &DisplayGraph) -> Vec<String> {
        display
            .nodes
            .iter()
            .flat_map(|n| n.functions.iter().map(|f| f.id.to_string()))
            .collect()
    }

    fn with_root(pattern: &str) -> PruneOptions {
        PruneOptions {
            root: Some(Selector::new(pattern).unwrap()),
            ..PruneOptions::keep_all()
        }
    }

    fn with_leaf(pattern: &str) -> PruneOptions {
        PruneOptions {
            leaf: Some(Selector::new(pattern).unwrap()),
            ..PruneOptions::keep_all()
        }
    }

    #[test]
    fn keep_all_matches_annotation() {
        let graph = annotated(
            &[("main", "f", 1), ("f", "g", 1), ("g", "f", 1), ("g", "g", 2)],
            &[("f", 1.0), ("g", 3.0)],
        );
        let display = graph.prune(&PruneOptions::keep_all()).unwrap();

        assert_eq!(display.nodes.len(), graph.nodes().len());
        for (shown, node) in display.nodes.iter().zip(graph.nodes()) {
            assert_eq!(Some(shown.total_pct), node.total_pct);
            assert_eq!(Some(shown.total_time), node.total_time);
            assert_eq!(shown.self_time, node.self_time);
        }
        let external: Vec<_> = display.edges.iter().filter(|e| !e.internal).collect();
        assert_eq!(external.len(), graph.edges().len());
        for (shown, edge) in external.iter().zip(graph.edges()) {
            assert_eq!((shown.caller, shown.callee), (edge.caller, edge.callee));
            assert_eq!(shown.total_pct, edge.total_pct);
        }
    }

    #[test]
    fn node_threshold_keeps_significant_nodes() {
        let options = PruneOptions {
            node_threshold_pct: 50.0,
            ..PruneOptions::keep_all()
        };
        let display = chain().prune(&options).unwrap();

        assert_eq!(names(&display), vec!["main", "a", "b"]);
        assert_eq!(display.edges.len(), 2);
    }

    #[test]
    fn node_threshold_drops_small_nodes_and_their_edges() {
        let options = PruneOptions {
            node_threshold_pct: 75.0,
            ..PruneOptions::keep_all()
        };
        let display = chain().prune(&options).unwrap();

        assert_eq!(names(&display), vec!["main", "a"]);
        assert_eq!(display.edges.len(), 1);
    }

    #[test]
    fn edge_threshold_drops_weak_edges() {
        let options = PruneOptions {
            edge_threshold_pct: 80.0,
            ..PruneOptions::keep_all()
        };
        let display = chain().prune(&options).unwrap();

        assert_eq!(display.nodes.len(), 3);
        assert_eq!(display.edges.len(), 1);
        assert_eq!(display.edges[0].total_pct, Some(100.0));
    }

    #[test]
    fn root_selector_keeps_descendants() {
        let display = chain().prune(&with_root("^a$")).unwrap();
        assert_eq!(names(&display), vec!["a", "b"]);
        assert_eq!(display.edges.len(), 1);
        // Percentages are not recomputed.
        assert_eq!(display.node_for(&id("b")).unwrap().total_pct, 70.0);
    }

    #[test]
    fn leaf_selector_keeps_ancestors() {
        let display = chain().prune(&with_leaf("^a$")).unwrap();
        assert_eq!(names(&display), vec!["main", "a"]);
    }

    #[test]
    fn root_and_leaf_intersect() {
        let graph = annotated(
            &[("main", "a", 1), ("a", "b", 1), ("b", "c", 1), ("main", "z", 1)],
            &[("c", 1.0), ("z", 1.0)],
        );
        let options = PruneOptions {
            root: Some(Selector::new("^a$").unwrap()),
            leaf: Some(Selector::new("^b$").unwrap()),
            ..PruneOptions::keep_all()
        };
        let display = graph.prune(&options).unwrap();
        assert_eq!(names(&display), vec!["a", "b"]);
    }

    #[test]
    fn selector_matching_nothing_empties_graph() {
        let display = chain().prune(&with_root("nope")).unwrap();
        assert!(display.is_empty());
        assert!(display.edges.is_empty());
    }

    #[test]
    fn cycle_matches_through_any_member() {
        let graph = annotated(
            &[("main", "f", 1), ("f", "g", 1), ("g", "f", 1), ("g", "h", 1)],
            &[("h", 1.0)],
        );
        let display = graph.prune(&with_root("^g$")).unwrap();
        assert_eq!(names(&display), vec!["f", "g", "h"]);
    }

    #[test]
    fn internal_edges_have_no_percentage() {
        let graph = annotated(
            &[("f", "g", 1), ("g", "f", 1)],
            &[("f", 10.0), ("g", 10.0)],
        );
        let display = graph.prune(&PruneOptions::keep_all()).unwrap();

        assert_eq!(display.nodes.len(), 1);
        assert!(display.nodes[0].is_cycle);
        assert_eq!(display.nodes[0].total_pct, 100.0);
        assert_eq!(display.edges.len(), 2);
        for edge in &display.edges {
            assert!(edge.internal);
            assert!(edge.total_pct.is_none());
        }
    }

    #[test]
    fn internal_edges_use_call_share_for_threshold() {
        let graph = annotated(
            &[("main", "f", 9), ("f", "g", 1), ("g", "f", 1)],
            &[("f", 10.0), ("g", 10.0)],
        );
        let options = PruneOptions {
            edge_threshold_pct: 20.0,
            ..PruneOptions::keep_all()
        };
        let display = graph.prune(&options).unwrap();

        // g→f carries 1 of f's 10 calls, f→g all of g's.
        let internal: Vec<_> = display.edges.iter().filter(|e| e.internal).collect();
        assert_eq!(internal.len(), 1);
        let f = graph.find(&id("f")).unwrap();
        assert_eq!(internal[0].parts[0].caller, f);
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let result = Selector::new("(unclosed");
        assert!(matches!(
            result,
            Err(GraphError::InvalidSelector { pattern, .. }) if pattern == "(unclosed"
        ));
    }

    #[test]
    fn negative_threshold_is_rejected() {
        let options = PruneOptions {
            node_threshold_pct: -1.0,
            ..PruneOptions::keep_all()
        };
        assert!(matches!(
            chain().prune(&options),
            Err(GraphError::InvalidThreshold { .. })
        ));
    }
}
