//! Convert the call graph section of GNU `gprof` output to call records.
//!
//! Only the call graph is read; the flat profile and the function index
//! that follow it are skipped. The granularity line supplies the overall
//! total, each primary line becomes a function record, and each child line
//! becomes a call record whose edge time is the child's self plus
//! descendant time.
//!
//! # Example
//!
//! ```no_run
//! use profdot::gprof::GprofParser;
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! let input = BufReader::new(File::open("gprof.txt").unwrap());
//!
//! let mut parser = GprofParser::new();
//! parser.parse(input).unwrap();
//! let records = parser.records().unwrap();
//! ```

use log::{debug, warn};
use profdot_graph::{CallRecord, FunctionId, FunctionRecord, Record, TotalRecord};
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Read};
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during gprof parsing.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("no granularity line found; is this gprof call graph output?")]
    MissingTotal,

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

// ============================================================================
// Line patterns
// ============================================================================

struct Patterns {
    granularity: Regex,
    header: Regex,
    ignore: Regex,
    primary: Regex,
    child: Regex,
    cycle_header: Regex,
    separator: Regex,
}

impl Patterns {
    fn new() -> Result<Self> {
        Ok(Self {
            granularity: Regex::new(r"^n?granularity:.*\s(?P<total>\d+\.\d+)\sseconds$")?,
            header: Regex::new(concat!(
                r"^\s+called/total\s+parents\s*$|",
                r"^index\s+%time\s+self\s+descendents\s+called\+self\s+name\s+index\s*$|",
                r"^\s+called/total\s+children\s*$|",
                r"^index\s+%\s+time\s+self\s+children\s+called\s+name\s*$",
            ))?,
            // <spontaneous> callers and internal calls such as mcount
            ignore: Regex::new(r"^\s+<spontaneous>\s*$|^.*\((\d+)\)$")?,
            primary: Regex::new(concat!(
                r"^\[(?P<index>\d+)\]",
                r"\s+(?P<percentage_time>\d+\.\d+)",
                r"\s+(?P<self>\d+\.\d+)",
                r"\s+(?P<descendants>\d+\.\d+)",
                r"\s+(?:(?P<called>\d+)(?:\+(?P<called_self>\d+))?)?",
                r"\s+(?P<name>\S.*?)",
                r"(?:\s+<cycle\s(?P<cycle>\d+)>)?",
                r"\s\[(\d+)\]$",
            ))?,
            child: Regex::new(concat!(
                r"^\s+(?P<self>\d+\.\d+)?",
                r"\s+(?P<descendants>\d+\.\d+)?",
                r"\s+(?P<called>\d+)(?:/(?P<called_total>\d+))?",
                r"\s+(?P<name>\S.*?)",
                r"(?:\s+<cycle\s(?P<cycle>\d+)>)?",
                r"\s\[(?P<index>\d+)\]$",
            ))?,
            cycle_header: Regex::new(concat!(
                r"^\[(?P<index>\d+)\]",
                r"\s+(?P<percentage_time>\d+\.\d+)",
                r"\s+(?P<self>\d+\.\d+)",
                r"\s+(?P<descendants>\d+\.\d+)",
                r"\s+(?:(?P<called>\d+)(?:\+(?P<called_self>\d+))?)?",
                r"\s+<cycle\s(?P<cycle>\d+)\sas\sa\swhole>",
                r"\s\[(\d+)\]$",
            ))?,
            separator: Regex::new(r"^--+$")?,
        })
    }
}

/// Parse an optional capture group.
fn field<T: FromStr>(caps: &Captures<'_>, name: &str, line: usize) -> Result<Option<T>> {
    match caps.name(name) {
        None => Ok(None),
        Some(m) => m.as_str().parse().map(Some).map_err(|_| ConvertError::Parse {
            line,
            message: format!("invalid {} '{}'", name, m.as_str()),
        }),
    }
}

/// Parse a capture group the pattern guarantees.
fn required<T: FromStr>(caps: &Captures<'_>, name: &str, line: usize) -> Result<T> {
    field(caps, name, line)?.ok_or_else(|| ConvertError::Parse {
        line,
        message: format!("missing {}", name),
    })
}

// ============================================================================
// Parsed entries
// ============================================================================

/// A primary line together with its child lines.
#[derive(Debug, Clone)]
struct Entry {
    name: String,
    self_time: f64,
    descendants: f64,
    called: Option<u64>,
    called_self: Option<u64>,
    cycle: Option<u32>,
    children: Vec<ChildLine>,
}

#[derive(Debug, Clone)]
struct ChildLine {
    index: usize,
    name: String,
    self_time: Option<f64>,
    descendants: Option<f64>,
    called: u64,
}

#[derive(Debug, Clone, Copy)]
struct CycleTotals {
    self_time: f64,
    descendants: f64,
}

type Line = (usize, String);

/// Parser for the call graph printed by `gprof`.
pub struct GprofParser {
    total: Option<f64>,
    functions: BTreeMap<usize, Entry>,
    cycles: HashMap<u32, CycleTotals>,
}

impl GprofParser {
    pub fn new() -> Self {
        Self {
            total: None,
            functions: BTreeMap::new(),
            cycles: HashMap::new(),
        }
    }

    /// Parse gprof output from a reader.
    pub fn parse<R: Read>(&mut self, reader: R) -> Result<()> {
        let patterns = Patterns::new()?;
        let mut lines = BufReader::new(reader)
            .lines()
            .enumerate()
            .map(|(n, line)| line.map(|l| (n + 1, l.trim_end_matches(['\r', '\n']).to_string())));

        // Total time from the granularity line
        let total = loop {
            let Some(next) = lines.next() else {
                return Err(ConvertError::MissingTotal);
            };
            let (line_num, line) = next?;
            if let Some(caps) = patterns.granularity.captures(&line) {
                break required::<f64>(&caps, "total", line_num)?;
            }
        };
        self.total = Some(total);

        // Skip the column headers
        let mut last_line = 0;
        let mut current = loop {
            let Some(next) = lines.next() else {
                return Err(ConvertError::Parse {
                    line: last_line,
                    message: "call graph header not found".into(),
                });
            };
            let (line_num, line) = next?;
            last_line = line_num;
            if patterns.header.is_match(&line) {
                break None;
            }
        };
        loop {
            match lines.next() {
                None => break,
                Some(next) => {
                    let (line_num, line) = next?;
                    if !patterns.header.is_match(&line) {
                        current = Some((line_num, line));
                        break;
                    }
                }
            }
        }

        // Entries are separated by dashed lines; a form feed ends the graph
        let mut entry: Vec<Line> = Vec::new();
        while let Some((line_num, line)) = current {
            if line.starts_with('\x0c') {
                break;
            }
            if !line.trim().is_empty() {
                if patterns.separator.is_match(&line) {
                    self.parse_entry(&patterns, &entry)?;
                    entry.clear();
                } else {
                    entry.push((line_num, line));
                }
            }
            current = lines.next().transpose()?;
        }
        if !entry.is_empty() {
            self.parse_entry(&patterns, &entry)?;
        }

        debug!(
            "gprof: {} functions, {} cycles, total {}",
            self.functions.len(),
            self.cycles.len(),
            total
        );
        Ok(())
    }

    fn parse_entry(&mut self, patterns: &Patterns, lines: &[Line]) -> Result<()> {
        let Some((line_num, first)) = lines.first() else {
            return Ok(());
        };

        if let Some(caps) = patterns.cycle_header.captures(first) {
            let cycle: u32 = required(&caps, "cycle", *line_num)?;
            let totals = CycleTotals {
                self_time: required(&caps, "self", *line_num)?,
                descendants: required(&caps, "descendants", *line_num)?,
            };
            self.cycles.insert(cycle, totals);
            return Ok(());
        }

        self.parse_function_entry(patterns, lines)
    }

    fn parse_function_entry(&mut self, patterns: &Patterns, lines: &[Line]) -> Result<()> {
        // Parent lines precede the primary line and are not needed
        let Some(primary_pos) = lines.iter().position(|(_, l)| l.starts_with('[')) else {
            if let Some((line_num, line)) = lines.last() {
                warn!("unexpected end of call graph entry at line {}: {:?}", line_num, line);
            }
            return Ok(());
        };
        for (line_num, line) in &lines[..primary_pos] {
            if !patterns.child.is_match(line) && !patterns.ignore.is_match(line) {
                warn!("unrecognized call graph entry at line {}: {:?}", line_num, line);
            }
        }

        let (line_num, line) = &lines[primary_pos];
        let Some(caps) = patterns.primary.captures(line) else {
            warn!("unrecognized call graph entry at line {}: {:?}", line_num, line);
            return Ok(());
        };
        let index: usize = required(&caps, "index", *line_num)?;
        let mut entry = Entry {
            name: caps["name"].to_string(),
            self_time: required(&caps, "self", *line_num)?,
            descendants: required(&caps, "descendants", *line_num)?,
            called: field(&caps, "called", *line_num)?,
            called_self: field(&caps, "called_self", *line_num)?,
            cycle: field(&caps, "cycle", *line_num)?,
            children: Vec::new(),
        };

        for (line_num, line) in &lines[primary_pos + 1..] {
            match patterns.child.captures(line) {
                Some(caps) => entry.children.push(ChildLine {
                    index: required(&caps, "index", *line_num)?,
                    name: caps["name"].to_string(),
                    self_time: field(&caps, "self", *line_num)?,
                    descendants: field(&caps, "descendants", *line_num)?,
                    called: required(&caps, "called", *line_num)?,
                }),
                None if patterns.ignore.is_match(line) => {}
                None => warn!("unrecognized call graph entry at line {}: {:?}", line_num, line),
            }
        }

        self.functions.insert(index, entry);
        Ok(())
    }

    /// Time spent in a function and its descendants. Members of a cycle
    /// report the time of the cycle as a whole.
    fn function_total(&self, entry: &Entry) -> f64 {
        match entry.cycle {
            // Cycles found only by static analysis have no entry of their own.
            Some(cycle) => self
                .cycles
                .get(&cycle)
                .map_or(0.0, |c| c.self_time + c.descendants),
            None => entry.self_time + entry.descendants,
        }
    }

    /// The parsed call graph as normalized records.
    pub fn records(&self) -> Result<Vec<Record>> {
        let total = self.total.ok_or(ConvertError::MissingTotal)?;
        let mut records = vec![Record::from(TotalRecord { time: total })];

        for entry in self.functions.values() {
            let id = FunctionId::named(entry.name.as_str());

            let mut function = FunctionRecord::new(id.clone())
                .with_self_time(entry.self_time)
                .with_total_time(self.function_total(entry));
            function.calls = entry.called;
            records.push(function.into());

            // Outside a cycle, "+n" counts direct recursion.
            if entry.cycle.is_none() {
                if let Some(n) = entry.called_self.filter(|&n| n > 0) {
                    records.push(CallRecord::new(id.clone(), id.clone(), n).into());
                }
            }

            for child in &entry.children {
                let callee = self
                    .functions
                    .get(&child.index)
                    .map_or(child.name.as_str(), |e| e.name.as_str());
                let mut call = CallRecord::new(id.clone(), FunctionId::named(callee), child.called);
                if let (Some(self_time), Some(descendants)) = (child.self_time, child.descendants) {
                    call = call.with_edge_time(self_time + descendants);
                }
                records.push(call.into());
            }
        }

        Ok(records)
    }
}

impl Default for GprofParser {
    fn default() -> Self {
        Self::new()
    }
}
