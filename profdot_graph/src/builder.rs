//! Accumulate normalized records into a [`Graph`].

use crate::graph::{Call, CallIndex, Function, FunctionIndex, Graph};
use crate::record::{CallRecord, FunctionId, FunctionRecord, Record};
use log::debug;
use std::collections::HashMap;

/// Per-function figures as declared by the input, before derivation.
#[derive(Debug, Clone)]
struct FunctionEntry {
    id: FunctionId,
    self_time: Option<f64>,
    cumulative_time: Option<f64>,
    calls: Option<u64>,
    samples: Option<u64>,
}

/// Builds a call graph from records arriving in any order.
///
/// # Example
///
/// ```
/// use profdot_graph::{CallRecord, FunctionId, FunctionRecord, GraphBuilder};
///
/// let mut builder = GraphBuilder::new();
/// builder.add_function(FunctionRecord::new(FunctionId::named("main")).with_self_time(1.0));
/// builder.add_call(CallRecord::new(FunctionId::named("main"), FunctionId::named("work"), 2));
/// let graph = builder.build();
///
/// assert_eq!(graph.functions().len(), 2);
/// assert_eq!(graph.calls().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    functions: Vec<FunctionEntry>,
    index: HashMap<FunctionId, FunctionIndex>,
    calls: Vec<Call>,
    call_index: HashMap<(FunctionIndex, FunctionIndex), CallIndex>,
    total_time: Option<f64>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add any kind of record.
    pub fn add_record(&mut self, record: Record) {
        match record {
            Record::Call(call) => self.add_call(call),
            Record::Function(function) => self.add_function(function),
            Record::Total(total) => self.set_total_time(total.time),
        }
    }

    /// Add a call observation. Repeated observations of the same pair merge.
    pub fn add_call(&mut self, record: CallRecord) {
        let caller = self.intern(record.caller);
        let callee = self.intern(record.callee);

        let entry = &mut self.functions[callee];
        if record.self_time.is_some() {
            entry.self_time = record.self_time;
        }
        if record.total_time.is_some() {
            entry.cumulative_time = record.total_time;
        }

        match self.call_index.get(&(caller, callee)) {
            Some(&c) => {
                let call = &mut self.calls[c];
                call.calls += record.calls;
                call.time = match (call.time, record.edge_time) {
                    (Some(a), Some(b)) => Some(a + b),
                    (a, b) => a.or(b),
                };
            }
            None => {
                self.call_index.insert((caller, callee), self.calls.len());
                self.calls.push(Call {
                    caller,
                    callee,
                    calls: record.calls,
                    time: record.edge_time,
                });
            }
        }
    }

    /// Declare per-function figures. Declared values replace earlier ones.
    pub fn add_function(&mut self, record: FunctionRecord) {
        let index = self.intern(record.id);
        let entry = &mut self.functions[index];
        if record.self_time.is_some() {
            entry.self_time = record.self_time;
        }
        if record.total_time.is_some() {
            entry.cumulative_time = record.total_time;
        }
        if record.calls.is_some() {
            entry.calls = record.calls;
        }
        if record.samples.is_some() {
            entry.samples = record.samples;
        }
    }

    /// Supply the overall total instead of summing self times.
    pub fn set_total_time(&mut self, time: f64) {
        self.total_time = Some(time);
    }

    fn intern(&mut self, id: FunctionId) -> FunctionIndex {
        if let Some(&index) = self.index.get(&id) {
            return index;
        }
        let index = self.functions.len();
        self.index.insert(id.clone(), index);
        self.functions.push(FunctionEntry {
            id,
            self_time: None,
            cumulative_time: None,
            calls: None,
            samples: None,
        });
        index
    }

    /// Finish building, deriving missing self times and call counts.
    ///
    /// A function with a cumulative time but no self time keeps what its
    /// outgoing calls do not account for. Calls without a measured time are
    /// charged an estimate from the callee's cumulative time.
    pub fn build(self) -> Graph {
        let mut incoming = vec![0u64; self.functions.len()];
        let mut external = vec![0u64; self.functions.len()];
        for call in &self.calls {
            incoming[call.callee] += call.calls;
            if !call.is_recursive() {
                external[call.callee] += call.calls;
            }
        }

        let mut callee_time = vec![0.0f64; self.functions.len()];
        for call in self.calls.iter().filter(|c| !c.is_recursive()) {
            callee_time[call.caller] += call
                .time
                .unwrap_or_else(|| self.estimate_call_time(call, &external));
        }

        let functions: Vec<Function> = self
            .functions
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let self_time = entry.self_time.unwrap_or_else(|| {
                    entry
                        .cumulative_time
                        .map(|total| (total - callee_time[i]).max(0.0))
                        .unwrap_or(0.0)
                });
                Function {
                    id: entry.id,
                    self_time,
                    cumulative_time: entry.cumulative_time,
                    calls: entry.calls.unwrap_or(incoming[i]),
                    samples: entry.samples,
                    node: i,
                }
            })
            .collect();

        debug!(
            "built graph with {} functions and {} calls",
            functions.len(),
            self.calls.len()
        );

        Graph::from_parts(functions, self.calls, self.total_time)
    }

    /// Share of the callee's cumulative time attributed to one call site.
    fn estimate_call_time(&self, call: &Call, external: &[u64]) -> f64 {
        let callee = &self.functions[call.callee];
        let Some(callee_total) = callee.cumulative_time.or(callee.self_time) else {
            return 0.0;
        };
        let callee_calls = external[call.callee];
        if callee_calls == 0 || callee_total == 0.0 {
            0.0
        } else if call.calls == callee_calls {
            callee_total
        } else {
            let share = callee_total * (call.calls as f64 / callee_calls as f64).min(1.0);
            match self.functions[call.caller].cumulative_time {
                Some(caller_total) => share.min(caller_total),
                None => share,
            }
        }
    }
}

impl Extend<Record> for GraphBuilder {
    fn extend<I: IntoIterator<Item = Record>>(&mut self, records: I) {
        for record in records {
            self.add_record(record);
        }
    }
}

impl FromIterator<Record> for Graph {
    fn from_iter<I: IntoIterator<Item = Record>>(records: I) -> Self {
        let mut builder = GraphBuilder::new();
        builder.extend(records);
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TotalRecord;

    fn id(name: &str) -> FunctionId {
        FunctionId::named(name)
    }

    #[test]
    fn creates_functions_on_first_sight() {
        let mut builder = GraphBuilder::new();
        builder.add_call(CallRecord::new(id("main"), id("a"), 1));
        builder.add_call(CallRecord::new(id("a"), id("b"), 1));
        let graph = builder.build();

        assert_eq!(graph.functions().len(), 3);
        assert_eq!(graph.find(&id("main")), Some(0));
        assert_eq!(graph.find(&id("b")), Some(2));
        assert_eq!(graph.find(&id("zzz")), None);
    }

    #[test]
    fn repeated_pairs_merge_by_summation() {
        let mut builder = GraphBuilder::new();
        builder.add_call(CallRecord::new(id("f"), id("g"), 2).with_edge_time(1.0));
        builder.add_call(CallRecord::new(id("f"), id("g"), 3).with_edge_time(0.5));
        let graph = builder.build();

        assert_eq!(graph.calls().len(), 1);
        assert_eq!(graph.calls()[0].calls, 5);
        assert_eq!(graph.calls()[0].time, Some(1.5));
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.function(1).calls, 5);
    }

    #[test]
    fn self_edges_are_kept() {
        let mut builder = GraphBuilder::new();
        builder.add_call(CallRecord::new(id("fact"), id("fact"), 9));
        let graph = builder.build();

        assert_eq!(graph.functions().len(), 1);
        assert_eq!(graph.edges().len(), 1);
        assert!(graph.edges()[0].is_self_edge());
        assert_eq!(graph.function(0).calls, 9);
    }

    #[test]
    fn declared_self_time_wins() {
        let mut builder = GraphBuilder::new();
        builder.add_function(
            FunctionRecord::new(id("f"))
                .with_self_time(4.0)
                .with_total_time(10.0),
        );
        builder.add_call(CallRecord::new(id("f"), id("g"), 1).with_edge_time(3.0));
        let graph = builder.build();

        assert_eq!(graph.function(0).self_time, 4.0);
    }

    #[test]
    fn self_time_derived_from_cumulative_time() {
        let mut builder = GraphBuilder::new();
        builder.add_function(FunctionRecord::new(id("f")).with_total_time(10.0));
        builder.add_call(CallRecord::new(id("f"), id("g"), 1).with_edge_time(3.0));
        builder.add_call(CallRecord::new(id("f"), id("f"), 1).with_edge_time(8.0));
        let graph = builder.build();

        // The recursive call is not callee time.
        assert_eq!(graph.function(0).self_time, 7.0);
        assert_eq!(graph.function(1).self_time, 0.0);
    }

    #[test]
    fn self_time_derived_without_edge_times() {
        let mut builder = GraphBuilder::new();
        builder.add_function(FunctionRecord::new(id("main")).with_total_time(100.0));
        builder.add_function(FunctionRecord::new(id("a")).with_total_time(100.0));
        builder.add_call(CallRecord::new(id("main"), id("a"), 1));
        let graph = builder.build();

        // The only call into `a` carries all of its time.
        assert_eq!(graph.function(0).self_time, 0.0);
        assert_eq!(graph.function(1).self_time, 100.0);
        assert_eq!(graph.self_time_sum(), 100.0);
    }

    #[test]
    fn untimed_calls_share_callee_time_by_count() {
        let mut builder = GraphBuilder::new();
        builder.add_function(FunctionRecord::new(id("x")).with_total_time(50.0));
        builder.add_function(FunctionRecord::new(id("y")).with_total_time(10.0));
        builder.add_function(FunctionRecord::new(id("work")).with_total_time(40.0));
        builder.add_call(CallRecord::new(id("x"), id("work"), 1));
        builder.add_call(CallRecord::new(id("y"), id("work"), 3));
        let graph = builder.build();

        // x is charged a quarter of 40; y's three quarters are capped at its own 10.
        assert_eq!(graph.function(0).self_time, 40.0);
        assert_eq!(graph.function(1).self_time, 0.0);
    }

    #[test]
    fn declared_calls_override_incoming_sum() {
        let mut builder = GraphBuilder::new();
        builder.add_call(CallRecord::new(id("f"), id("g"), 2));
        builder.add_function(FunctionRecord {
            calls: Some(7),
            ..FunctionRecord::new(id("g"))
        });
        let graph = builder.build();

        assert_eq!(graph.function(1).calls, 7);
    }

    #[test]
    fn total_record_sets_overall_total() {
        let records = vec![
            Record::Function(FunctionRecord::new(id("f")).with_self_time(2.0)),
            Record::Total(TotalRecord { time: 8.0 }),
        ];
        let graph: Graph = records.into_iter().collect();

        assert_eq!(graph.declared_total(), Some(8.0));
        assert_eq!(graph.total_time(), 8.0);
        assert_eq!(graph.self_time_sum(), 2.0);
    }

    #[test]
    fn empty_input_builds_empty_graph() {
        let graph = GraphBuilder::new().build();
        assert!(graph.is_empty());
        assert!(graph.nodes().is_empty());
        assert_eq!(graph.total_time(), 0.0);
    }
}
