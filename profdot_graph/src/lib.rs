//! Call graph assembly and analysis for profile data.
//!
//! Profilers disagree on how they report calls, but every report can be
//! reduced to caller→callee [`Record`]s. This crate turns such records into
//! a weighted call graph ready for display:
//!
//! 1. [`GraphBuilder`] merges records into functions and calls.
//! 2. [`Graph::collapse_cycles`] replaces mutually recursive functions by a
//!    single [`Cycle`] node.
//! 3. [`Graph::propagate`] computes inclusive time under a [`TotalMethod`].
//! 4. [`Graph::prune`] drops insignificant or out-of-scope nodes and edges,
//!    producing a [`DisplayGraph`].
//!
//! [`analyze`] runs all four steps.
//!
//! # Example
//!
//! ```
//! use profdot_graph::{analyze, CallRecord, FunctionId, FunctionRecord, GraphConfig, Record};
//!
//! let records = vec![
//!     Record::Call(CallRecord::new(FunctionId::named("main"), FunctionId::named("a"), 1)),
//!     Record::Call(CallRecord::new(FunctionId::named("a"), FunctionId::named("b"), 1)),
//!     Record::Function(FunctionRecord::new(FunctionId::named("a")).with_self_time(30.0)),
//!     Record::Function(FunctionRecord::new(FunctionId::named("b")).with_self_time(70.0)),
//! ];
//!
//! let display = analyze(records, &GraphConfig::default()).unwrap();
//! let a = display.node_for(&FunctionId::named("a")).unwrap();
//! assert_eq!(a.total_pct, 100.0);
//! ```

pub mod builder;
pub mod config;
pub mod cycles;
pub mod error;
pub mod graph;
pub mod propagate;
pub mod prune;
pub mod record;

pub use builder::GraphBuilder;
pub use config::GraphConfig;
pub use error::{GraphError, Result};
pub use graph::{
    Call, CallIndex, Cycle, Edge, EdgeIndex, Function, FunctionIndex, Graph, Node, NodeIndex,
    NodeKind,
};
pub use propagate::{TotalMethod, percentage};
pub use prune::{
    DisplayCall, DisplayEdge, DisplayFunction, DisplayGraph, DisplayNode, PruneOptions, Selector,
};
pub use record::{CallRecord, FunctionId, FunctionRecord, Record, TotalRecord};

/// Run the whole pipeline over a record stream.
///
/// The configuration is checked before any record is consumed, so a bad
/// selector fails fast.
pub fn analyze<I>(records: I, config: &GraphConfig) -> Result<DisplayGraph>
where
    I: IntoIterator<Item = Record>,
{
    let options = config.prune_options()?;

    let mut builder = GraphBuilder::new();
    builder.extend(records);
    let mut graph = builder.build();

    graph.collapse_cycles();
    graph.propagate(config.total_method)?;
    graph.prune(&options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> FunctionId {
        FunctionId::named(name)
    }

    fn call(caller: &str, callee: &str) -> Record {
        Record::Call(CallRecord::new(id(caller), id(callee), 1))
    }

    fn self_time(name: &str, time: f64) -> Record {
        Record::Function(FunctionRecord::new(id(name)).with_self_time(time))
    }

    fn keep_all() -> GraphConfig {
        GraphConfig {
            node_threshold_pct: 0.0,
            edge_threshold_pct: 0.0,
            ..GraphConfig::default()
        }
    }

    fn chain() -> Vec<Record> {
        vec![
            call("main", "a"),
            call("a", "b"),
            self_time("main", 0.0),
            self_time("a", 30.0),
            self_time("b", 70.0),
        ]
    }

    #[test]
    fn mutual_recursion_scenario() {
        let records = vec![
            call("f", "g"),
            call("g", "f"),
            self_time("f", 10.0),
            self_time("g", 10.0),
        ];
        let display = analyze(records, &keep_all()).unwrap();

        assert_eq!(display.nodes.len(), 1);
        let cycle = &display.nodes[0];
        assert!(cycle.is_cycle);
        assert_eq!(cycle.functions.len(), 2);
        assert_eq!(cycle.self_time, 20.0);
        assert_eq!(cycle.total_time, 20.0);
        assert_eq!(cycle.total_pct, 100.0);

        assert_eq!(display.edges.len(), 2);
        assert!(display.edges.iter().all(|e| e.internal && e.total_pct.is_none()));
    }

    #[test]
    fn linear_chain_scenario() {
        let display = analyze(chain(), &keep_all()).unwrap();

        assert!(display.nodes.iter().all(|n| !n.is_cycle));
        let total = |name: &str| display.node_for(&id(name)).unwrap().total_time;
        assert_eq!(total("b"), 70.0);
        assert_eq!(total("a"), 100.0);
        assert_eq!(total("main"), 100.0);

        let pct = |caller: &str, callee: &str| {
            let caller = display.node_for(&id(caller)).unwrap().index;
            let callee = display.node_for(&id(callee)).unwrap().index;
            display
                .edges
                .iter()
                .find(|e| e.caller == caller && e.callee == callee)
                .and_then(|e| e.total_pct)
        };
        assert_eq!(pct("main", "a"), Some(100.0));
        assert_eq!(pct("a", "b"), Some(70.0));
    }

    #[test]
    fn half_threshold_keeps_chain() {
        let config = GraphConfig {
            node_threshold_pct: 50.0,
            ..keep_all()
        };
        let display = analyze(chain(), &config).unwrap();
        assert_eq!(display.nodes.len(), 3);
    }

    #[test]
    fn root_selector_scenario() {
        let config = GraphConfig {
            root_selector: Some("^a$".to_string()),
            ..keep_all()
        };
        let display = analyze(chain(), &config).unwrap();

        assert!(display.node_for(&id("main")).is_none());
        assert!(display.node_for(&id("a")).is_some());
        assert!(display.node_for(&id("b")).is_some());
    }

    #[test]
    fn empty_input_is_not_an_error() {
        let display = analyze(Vec::new(), &GraphConfig::default()).unwrap();
        assert!(display.is_empty());
    }

    #[test]
    fn call_stack_without_cumulative_times_fails() {
        let config = GraphConfig {
            total_method: TotalMethod::CallStack,
            ..keep_all()
        };
        assert!(matches!(
            analyze(chain(), &config),
            Err(GraphError::MissingCumulativeTime)
        ));
    }

    #[test]
    fn call_stack_with_untimed_calls() {
        let records = vec![
            Record::Function(FunctionRecord::new(id("main")).with_total_time(100.0)),
            Record::Function(FunctionRecord::new(id("a")).with_total_time(100.0)),
            call("main", "a"),
        ];
        let config = GraphConfig {
            total_method: TotalMethod::CallStack,
            ..keep_all()
        };
        let display = analyze(records, &config).unwrap();

        assert_eq!(display.total_time, 100.0);
        let main = display.node_for(&id("main")).unwrap();
        assert_eq!(main.self_time, 0.0);
        assert_eq!(main.total_pct, 100.0);
    }

    #[test]
    fn bad_selector_fails_before_building() {
        let config = GraphConfig {
            root_selector: Some("(".to_string()),
            ..keep_all()
        };
        assert!(analyze(chain(), &config).is_err());
    }
}
