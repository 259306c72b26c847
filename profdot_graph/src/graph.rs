//! Index-based call graph representation.
//!
//! Functions and their function-level calls are fixed once the builder is
//! done. On top of them sits a partition into analytic [`Node`]s: each node
//! is either a single function or a [`Cycle`] of mutually recursive
//! functions. Node-level [`Edge`]s are derived from the calls whenever the
//! partition changes, so there is at most one edge per ordered node pair.

use crate::record::FunctionId;
use std::collections::HashMap;

/// Index into [`Graph::functions`].
pub type FunctionIndex = usize;
/// Index into [`Graph::nodes`].
pub type NodeIndex = usize;
/// Index into [`Graph::calls`].
pub type CallIndex = usize;
/// Index into [`Graph::edges`].
pub type EdgeIndex = usize;

// ============================================================================
// Function-level types
// ============================================================================

/// A profiled function.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub id: FunctionId,
    /// Time spent in the function itself, excluding callees.
    pub self_time: f64,
    /// Inclusive time as reported natively by the profiler, if any.
    pub cumulative_time: Option<f64>,
    /// Number of invocations, recursive ones included.
    pub calls: u64,
    pub samples: Option<u64>,
    /// Node currently owning this function.
    pub node: NodeIndex,
}

/// Aggregated calls from one function to another.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub caller: FunctionIndex,
    pub callee: FunctionIndex,
    pub calls: u64,
    /// Native time attributed to this pair, if the format reports it.
    pub time: Option<f64>,
}

impl Call {
    pub fn is_recursive(&self) -> bool {
        self.caller == self.callee
    }
}

// ============================================================================
// Node-level types
// ============================================================================

/// A set of mutually recursive functions treated as one accounting unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cycle {
    /// Member functions, in ascending index order.
    pub members: Vec<FunctionIndex>,
    /// Calls with both endpoints inside the cycle.
    pub internal_calls: Vec<CallIndex>,
}

/// What a node stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Function(FunctionIndex),
    Cycle(Cycle),
}

/// An analytic unit of the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub self_time: f64,
    pub calls: u64,
    pub total_time: Option<f64>,
    pub total_pct: Option<f64>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            self_time: 0.0,
            calls: 0,
            total_time: None,
            total_pct: None,
        }
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self.kind, NodeKind::Cycle(_))
    }

    pub fn cycle(&self) -> Option<&Cycle> {
        match &self.kind {
            NodeKind::Cycle(cycle) => Some(cycle),
            NodeKind::Function(_) => None,
        }
    }

    /// Functions represented by this node.
    pub fn members(&self) -> &[FunctionIndex] {
        match &self.kind {
            NodeKind::Function(index) => std::slice::from_ref(index),
            NodeKind::Cycle(cycle) => &cycle.members,
        }
    }
}

/// Aggregated calls between two nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub caller: NodeIndex,
    pub callee: NodeIndex,
    pub calls: u64,
    /// Native time, present only when every merged call reported one.
    pub time: Option<f64>,
    /// Function-level calls merged into this edge.
    pub parts: Vec<CallIndex>,
    pub total_time: Option<f64>,
    pub total_pct: Option<f64>,
}

impl Edge {
    pub fn is_self_edge(&self) -> bool {
        self.caller == self.callee
    }
}

// ============================================================================
// Graph
// ============================================================================

/// The call graph shared by every analysis phase.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub(crate) functions: Vec<Function>,
    pub(crate) index: HashMap<FunctionId, FunctionIndex>,
    pub(crate) calls: Vec<Call>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) out_edges: Vec<Vec<EdgeIndex>>,
    pub(crate) in_edges: Vec<Vec<EdgeIndex>>,
    pub(crate) declared_total: Option<f64>,
    pub(crate) total_time: f64,
}

impl Graph {
    /// Assemble a graph with one node per function.
    pub(crate) fn from_parts(
        functions: Vec<Function>,
        calls: Vec<Call>,
        declared_total: Option<f64>,
    ) -> Self {
        let index = functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id.clone(), i))
            .collect();
        let nodes = (0..functions.len())
            .map(|i| Node::new(NodeKind::Function(i)))
            .collect();

        let mut graph = Graph {
            functions,
            index,
            calls,
            nodes,
            declared_total,
            ..Default::default()
        };
        graph.rebuild_edges();
        graph.total_time = graph.overall_total();
        graph
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function(&self, index: FunctionIndex) -> &Function {
        &self.functions[index]
    }

    /// Look up a function by identifier.
    pub fn find(&self, id: &FunctionId) -> Option<FunctionIndex> {
        self.index.get(id).copied()
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index]
    }

    /// Node owning the given function.
    pub fn node_of(&self, function: FunctionIndex) -> NodeIndex {
        self.functions[function].node
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edge between two nodes, if any.
    pub fn edge_between(&self, caller: NodeIndex, callee: NodeIndex) -> Option<&Edge> {
        self.out_edges[caller]
            .iter()
            .map(|&e| &self.edges[e])
            .find(|e| e.callee == callee)
    }

    pub fn outgoing(&self, node: NodeIndex) -> impl Iterator<Item = &Edge> {
        self.out_edges[node].iter().map(move |&e| &self.edges[e])
    }

    pub fn incoming(&self, node: NodeIndex) -> impl Iterator<Item = &Edge> {
        self.in_edges[node].iter().map(move |&e| &self.edges[e])
    }

    pub fn cycles(&self) -> impl Iterator<Item = &Cycle> {
        self.nodes.iter().filter_map(Node::cycle)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Overall total the percentages are relative to.
    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Externally supplied total, when the input carried one.
    pub fn declared_total(&self) -> Option<f64> {
        self.declared_total
    }

    /// Sum of self times across all functions.
    pub fn self_time_sum(&self) -> f64 {
        self.functions.iter().map(|f| f.self_time).sum()
    }

    pub(crate) fn overall_total(&self) -> f64 {
        self.declared_total.unwrap_or_else(|| self.self_time_sum())
    }

    /// Re-derive node-level edges and node aggregates from the function-level
    /// calls and the current partition. Annotations are reset.
    pub(crate) fn rebuild_edges(&mut self) {
        for (n, node) in self.nodes.iter_mut().enumerate() {
            if let NodeKind::Cycle(cycle) = &mut node.kind {
                cycle.internal_calls.clear();
            }
            for &f in node.members() {
                self.functions[f].node = n;
            }
        }

        self.edges.clear();
        let mut edge_map: HashMap<(NodeIndex, NodeIndex), EdgeIndex> = HashMap::new();
        for (c, call) in self.calls.iter().enumerate() {
            let caller = self.functions[call.caller].node;
            let callee = self.functions[call.callee].node;

            if caller == callee {
                if let NodeKind::Cycle(cycle) = &mut self.nodes[caller].kind {
                    cycle.internal_calls.push(c);
                    continue;
                }
            }

            match edge_map.get(&(caller, callee)) {
                Some(&e) => {
                    let edge = &mut self.edges[e];
                    edge.calls += call.calls;
                    edge.time = match (edge.time, call.time) {
                        (Some(a), Some(b)) => Some(a + b),
                        _ => None,
                    };
                    edge.parts.push(c);
                }
                None => {
                    edge_map.insert((caller, callee), self.edges.len());
                    self.edges.push(Edge {
                        caller,
                        callee,
                        calls: call.calls,
                        time: call.time,
                        parts: vec![c],
                        total_time: None,
                        total_pct: None,
                    });
                }
            }
        }

        self.out_edges = vec![Vec::new(); self.nodes.len()];
        self.in_edges = vec![Vec::new(); self.nodes.len()];
        for (e, edge) in self.edges.iter().enumerate() {
            self.out_edges[edge.caller].push(e);
            self.in_edges[edge.callee].push(e);
        }

        for n in 0..self.nodes.len() {
            let self_time: f64 = self.nodes[n]
                .members()
                .iter()
                .map(|&f| self.functions[f].self_time)
                .sum();
            let calls: u64 = match &self.nodes[n].kind {
                NodeKind::Function(f) => self.functions[*f].calls,
                NodeKind::Cycle(_) => self.in_edges[n]
                    .iter()
                    .map(|&e| self.edges[e].calls)
                    .sum(),
            };
            let node = &mut self.nodes[n];
            node.self_time = self_time;
            node.calls = calls;
            node.total_time = None;
            node.total_pct = None;
        }
    }

    /// Sum of call counts on edges entering `node` from other nodes.
    pub(crate) fn external_calls_into(&self, node: NodeIndex) -> u64 {
        self.incoming(node)
            .filter(|e| !e.is_self_edge())
            .map(|e| e.calls)
            .sum()
    }
}
