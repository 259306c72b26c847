//! Normalized call records consumed by the graph builder.
//!
//! Every input adapter reduces its profiler's native dump to a stream of
//! [`Record`]s. Only the caller, callee and call count of a call are
//! mandatory; the timing fields are filled in when the source format reports
//! them natively.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a profiled function.
///
/// The module (or file), line and name together form the key, so two
/// functions with the same name in different files never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub module: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub line: u32,
    pub name: String,
}

fn is_zero(line: &u32) -> bool {
    *line == 0
}

impl FunctionId {
    pub fn new(module: impl Into<String>, line: u32, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            line,
            name: name.into(),
        }
    }

    /// An identifier with no module or line information.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(String::new(), 0, name)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.module.is_empty(), self.line) {
            (true, 0) => write!(f, "{}", self.name),
            (true, line) => write!(f, "{}:{}", line, self.name),
            (false, 0) => write!(f, "{}:{}", self.module, self.name),
            (false, line) => write!(f, "{}:{}:{}", self.module, line, self.name),
        }
    }
}

/// One observed caller→callee relation.
///
/// `self_time` and `total_time` describe the callee, as reported by formats
/// that list each function together with its callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub caller: FunctionId,
    pub callee: FunctionId,
    #[serde(default)]
    pub calls: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time: Option<f64>,
}

impl CallRecord {
    pub fn new(caller: FunctionId, callee: FunctionId, calls: u64) -> Self {
        Self {
            caller,
            callee,
            calls,
            edge_time: None,
            self_time: None,
            total_time: None,
        }
    }

    pub fn with_edge_time(mut self, time: f64) -> Self {
        self.edge_time = Some(time);
        self
    }
}

/// Per-function figures, for functions that are never called (roots) or for
/// formats that report function data apart from call data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub id: FunctionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calls: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<u64>,
}

impl FunctionRecord {
    pub fn new(id: FunctionId) -> Self {
        Self {
            id,
            self_time: None,
            total_time: None,
            calls: None,
            samples: None,
        }
    }

    pub fn with_self_time(mut self, time: f64) -> Self {
        self.self_time = Some(time);
        self
    }

    pub fn with_total_time(mut self, time: f64) -> Self {
        self.total_time = Some(time);
        self
    }
}

/// Externally supplied overall total, e.g. the wall-clock time of the run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TotalRecord {
    pub time: f64,
}

/// A normalized input record, tagged by its `type` field when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Call(CallRecord),
    Function(FunctionRecord),
    Total(TotalRecord),
}

impl From<CallRecord> for Record {
    fn from(record: CallRecord) -> Self {
        Record::Call(record)
    }
}

impl From<FunctionRecord> for Record {
    fn from(record: FunctionRecord) -> Self {
        Record::Function(record)
    }
}

impl From<TotalRecord> for Record {
    fn from(record: TotalRecord) -> Self {
        Record::Total(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_omits_missing_parts() {
        assert_eq!(FunctionId::named("main").to_string(), "main");
        assert_eq!(FunctionId::new("app", 0, "main").to_string(), "app:main");
        assert_eq!(FunctionId::new("app", 12, "main").to_string(), "app:12:main");
    }

    #[test]
    fn ids_with_same_name_differ_by_module() {
        let a = FunctionId::new("a.py", 1, "run");
        let b = FunctionId::new("b.py", 1, "run");
        assert_ne!(a, b);
    }

    #[test]
    fn records_are_tagged_by_type() {
        let record: Record = CallRecord::new(FunctionId::named("f"), FunctionId::named("g"), 3)
            .with_edge_time(1.5)
            .into();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"call\""));
        assert!(json.contains("\"edge_time\":1.5"));
        assert!(!json.contains("self_time"));
    }

    #[test]
    fn optional_fields_default_when_absent() {
        let json = r#"{"type":"call","caller":{"name":"f"},"callee":{"module":"m","line":4,"name":"g"}}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        match record {
            Record::Call(call) => {
                assert_eq!(call.calls, 0);
                assert_eq!(call.callee, FunctionId::new("m", 4, "g"));
                assert!(call.edge_time.is_none());
                assert!(call.total_time.is_none());
            }
            other => panic!("unexpected record {:?}", other),
        }
    }
}
