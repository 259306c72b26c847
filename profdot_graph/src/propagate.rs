//! Inclusive time accounting over the collapsed graph.
//!
//! Two policies are supported:
//!
//! - [`TotalMethod::CallRatio`] recomputes inclusive time bottom-up, giving
//!   each caller a share of the callee's total proportional to the calls it
//!   made.
//! - [`TotalMethod::CallStack`] trusts the cumulative time reported by the
//!   profiler, which is what stack-sampling formats provide.

use crate::cycles::{digraph, strongly_connected_components};
use crate::error::{GraphError, Result};
use crate::graph::{Graph, NodeIndex, NodeKind};
use log::{debug, warn};
use petgraph::algo::toposort;
use serde::{Deserialize, Serialize};

/// Relative spread tolerated between cycle members' cumulative times.
const CYCLE_TOLERANCE: f64 = 1e-6;

/// Accounting policy for inclusive time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TotalMethod {
    #[default]
    CallRatio,
    CallStack,
}

/// `part` as a percentage of `whole`, clamped for display.
pub fn percentage(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 || !part.is_finite() {
        return 0.0;
    }
    (part / whole * 100.0).clamp(0.0, 100.0)
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64).min(1.0)
    }
}

impl Graph {
    /// Nodes ordered so every node comes after all of its callees.
    ///
    /// Self-edges are ignored. On a graph that still has cycles the members
    /// of each cycle are kept together, after everything the cycle reaches.
    pub fn reverse_topological_order(&self) -> Vec<NodeIndex> {
        let graph = digraph(&self.adjacency());
        match toposort(&graph, None) {
            Ok(order) => order.into_iter().rev().map(|n| n.index()).collect(),
            Err(_) => strongly_connected_components(&self.adjacency())
                .into_iter()
                .flatten()
                .collect(),
        }
    }

    /// Annotate every node and edge with total time and percentage.
    ///
    /// Any cycles still present are collapsed first, so the graph the
    /// totals are computed on is always acyclic.
    pub fn propagate(&mut self, method: TotalMethod) -> Result<()> {
        if method == TotalMethod::CallStack
            && !self.functions.iter().any(|f| f.cumulative_time.is_some())
        {
            return Err(GraphError::MissingCumulativeTime);
        }

        self.collapse_cycles();
        self.total_time = self.overall_total();

        match method {
            TotalMethod::CallRatio => self.propagate_call_ratio(),
            TotalMethod::CallStack => self.propagate_call_stack(),
        }

        let total = self.total_time;
        for node in &mut self.nodes {
            node.total_pct = node.total_time.map(|t| percentage(t, total));
        }
        for edge in &mut self.edges {
            edge.total_pct = edge.total_time.map(|t| percentage(t, total));
        }

        debug!(
            "propagated totals over {} nodes ({:?}, overall {})",
            self.nodes.len(),
            method,
            total
        );
        Ok(())
    }

    fn propagate_call_ratio(&mut self) {
        let incoming: Vec<u64> = (0..self.nodes.len())
            .map(|n| self.external_calls_into(n))
            .collect();
        let mut totals = vec![0.0f64; self.nodes.len()];

        for node in self.reverse_topological_order() {
            let mut total = self.nodes[node].self_time;
            for edge in self.outgoing(node).filter(|e| !e.is_self_edge()) {
                total += totals[edge.callee] * ratio(edge.calls, incoming[edge.callee]);
            }
            totals[node] = total;
        }

        for edge in &mut self.edges {
            let share = if edge.caller == edge.callee {
                ratio(edge.calls, self.nodes[edge.caller].calls)
            } else {
                ratio(edge.calls, incoming[edge.callee])
            };
            edge.total_time = Some(totals[edge.callee] * share);
        }
        for (node, total) in self.nodes.iter_mut().zip(totals) {
            node.total_time = Some(total);
        }
    }

    fn propagate_call_stack(&mut self) {
        let mut totals = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let total = match &node.kind {
                NodeKind::Function(f) => {
                    let function = &self.functions[*f];
                    function.cumulative_time.unwrap_or_else(|| {
                        warn!(
                            "no cumulative time for {}, using its self time",
                            function.id
                        );
                        function.self_time
                    })
                }
                NodeKind::Cycle(cycle) => {
                    let reported: Vec<f64> = cycle
                        .members
                        .iter()
                        .filter_map(|&f| self.functions[f].cumulative_time)
                        .collect();
                    let max = reported.iter().copied().fold(f64::NAN, f64::max);
                    let min = reported.iter().copied().fold(f64::NAN, f64::min);
                    if max.is_nan() {
                        warn!("no cumulative time for any member of a cycle, using its self time");
                        node.self_time
                    } else {
                        if max - min > CYCLE_TOLERANCE * max.abs().max(1.0) {
                            warn!(
                                "cycle members report diverging cumulative times ({} to {}), using {}",
                                min, max, max
                            );
                        }
                        max
                    }
                }
            };
            totals.push(total);
        }

        let incoming: Vec<u64> = (0..self.nodes.len())
            .map(|n| self.external_calls_into(n))
            .collect();
        let edge_totals: Vec<f64> = self
            .edges
            .iter()
            .map(|edge| {
                if let Some(time) = edge.time {
                    return time;
                }
                let callee_total = totals[edge.callee];
                let callee_calls = if edge.is_self_edge() {
                    self.nodes[edge.callee].calls
                } else {
                    incoming[edge.callee]
                };
                if callee_calls == 0 || callee_total == 0.0 {
                    0.0
                } else if edge.calls == callee_calls {
                    callee_total
                } else {
                    (callee_total * ratio(edge.calls, callee_calls)).min(totals[edge.caller])
                }
            })
            .collect();

        for (edge, total) in self.edges.iter_mut().zip(edge_totals) {
            edge.total_time = Some(total);
        }
        for (node, total) in self.nodes.iter_mut().zip(totals) {
            node.total_time = Some(total);
        }
    }
}
