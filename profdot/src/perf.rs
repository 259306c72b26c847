//! Convert Linux `perf script` output to call records.
//!
//! Each sample's stack is folded into the call graph: the sample period is
//! charged as self time to the leaf frame, as cumulative time to every
//! distinct function on the stack, and as edge time to every distinct
//! caller→callee pair of adjacent frames. A pair seen in `n` samples is
//! reported as `n` calls.
//!
//! # Example
//!
//! ```no_run
//! use profdot::perf::PerfConverter;
//! use profdot::records::RecordWriter;
//! use std::fs::File;
//! use std::io::{BufReader, BufWriter};
//!
//! let input = BufReader::new(File::open("perf.txt").unwrap());
//!
//! let mut converter = PerfConverter::new();
//! converter.parse(input).unwrap();
//!
//! let mut writer = RecordWriter::new(BufWriter::new(File::create("perf.jsonl").unwrap()));
//! writer.write_all(&converter.records().unwrap()).unwrap();
//! ```

use log::{debug, warn};
use profdot_graph::{CallRecord, FunctionId, FunctionRecord, Record, TotalRecord};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during perf script parsing.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("no samples found in input")]
    NoSamples,
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// A parsed sample from perf script output.
#[derive(Debug, Clone)]
struct PerfSample {
    comm: String,
    pid: u64,
    tid: u64,
    period: u64,
    event: String,
    /// Leaf first.
    frames: Vec<PerfFrame>,
}

/// A parsed stack frame from perf script output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PerfFrame {
    symbol: String,
    dso: String,
}

impl PerfFrame {
    /// Functions are keyed by symbol within the file name of their DSO.
    fn function_id(&self) -> FunctionId {
        let module = Path::new(&self.dso)
            .file_name()
            .map_or(self.dso.as_str(), |name| name.to_str().unwrap_or(&self.dso));
        FunctionId::new(module, 0, self.symbol.as_str())
    }
}

#[derive(Debug, Clone, Default)]
struct FunctionData {
    self_period: u64,
    total_period: u64,
    samples: u64,
}

#[derive(Debug, Clone, Default)]
struct CallData {
    samples: u64,
    period: u64,
}

/// Converter from perf script output to call records.
pub struct PerfConverter {
    sample_count: usize,
    total_period: u64,
    events: BTreeSet<String>,
    threads: HashSet<(u64, u64)>,
    functions: BTreeMap<FunctionId, FunctionData>,
    calls: BTreeMap<(FunctionId, FunctionId), CallData>,
}

impl PerfConverter {
    /// Create a new converter.
    pub fn new() -> Self {
        Self {
            sample_count: 0,
            total_period: 0,
            events: BTreeSet::new(),
            threads: HashSet::new(),
            functions: BTreeMap::new(),
            calls: BTreeMap::new(),
        }
    }

    /// Parse perf script output from a reader.
    pub fn parse<R: Read>(&mut self, reader: R) -> Result<()> {
        let buf_reader = BufReader::new(reader);
        let mut current_sample: Option<PerfSample> = None;
        let mut line_num = 0;

        for line_result in buf_reader.lines() {
            line_num += 1;
            let line = line_result?;

            // Blank lines end a sample; comments carry the perf header
            if line.trim().is_empty() || line.starts_with('#') {
                if let Some(sample) = current_sample.take() {
                    self.add_sample(sample);
                }
                continue;
            }

            if !line.starts_with('\t') && !line.starts_with(' ') {
                if let Some(sample) = current_sample.take() {
                    self.add_sample(sample);
                }

                match Self::parse_sample_header(&line) {
                    Ok(sample) => current_sample = Some(sample),
                    Err(msg) => {
                        if !line.contains(':') {
                            continue;
                        }
                        return Err(ConvertError::Parse {
                            line: line_num,
                            message: msg,
                        });
                    }
                }
            } else if let Some(ref mut sample) = current_sample {
                if let Some(frame) = Self::parse_frame(&line) {
                    sample.frames.push(frame);
                }
            }
        }

        if let Some(sample) = current_sample {
            self.add_sample(sample);
        }

        if self.events.len() > 1 {
            warn!(
                "samples from {} events are mixed: {:?}",
                self.events.len(),
                self.events
            );
        }
        debug!(
            "perf: {} samples from {} threads, {} functions, {} calls",
            self.sample_count,
            self.threads.len(),
            self.functions.len(),
            self.calls.len()
        );
        Ok(())
    }

    fn add_sample(&mut self, sample: PerfSample) {
        if sample.frames.is_empty() {
            debug!("skipping {} sample without stack for {}", sample.event, sample.comm);
            return;
        }

        self.sample_count += 1;
        self.total_period += sample.period;
        self.threads.insert((sample.pid, sample.tid));
        if !self.events.contains(&sample.event) {
            self.events.insert(sample.event.clone());
        }

        let ids: Vec<FunctionId> = sample.frames.iter().map(PerfFrame::function_id).collect();

        // Recursion repeats frames; charge each function and pair once.
        let mut seen_functions = HashSet::new();
        for (depth, id) in ids.iter().enumerate() {
            if !seen_functions.insert(id) {
                continue;
            }
            let data = self.functions.entry(id.clone()).or_default();
            data.total_period += sample.period;
            data.samples += 1;
            if depth == 0 {
                data.self_period += sample.period;
            }
        }

        let mut seen_calls = HashSet::new();
        for pair in ids.windows(2) {
            let (callee, caller) = (&pair[0], &pair[1]);
            if !seen_calls.insert((caller, callee)) {
                continue;
            }
            let data = self
                .calls
                .entry((caller.clone(), callee.clone()))
                .or_default();
            data.samples += 1;
            data.period += sample.period;
        }
    }

    /// Parse a sample header line.
    /// Format: `comm pid[/tid] [cpu] timestamp: period event:`
    /// Examples:
    ///   `myapp  1234 [000] 12345.678901:     123456 cycles:`
    ///   `myapp  1234/5678 [000] 12345.678901:     123456 cycles:`
    fn parse_sample_header(line: &str) -> std::result::Result<PerfSample, String> {
        let line = line.trim();

        let colon_pos = line.find(':').ok_or("no colon found")?;
        let before_colon = &line[..colon_pos];
        let after_colon = &line[colon_pos + 1..];

        let after_parts: Vec<&str> = after_colon.split_whitespace().collect();
        if after_parts.is_empty() {
            return Err("no event info after colon".into());
        }

        // Without -F period, only the event name follows
        let (period, event) = if after_parts.len() >= 2 {
            let period = after_parts[0].parse::<u64>().unwrap_or(1);
            (period, after_parts[1].trim_end_matches(':').to_string())
        } else {
            (1, after_parts[0].trim_end_matches(':').to_string())
        };

        let parts: Vec<&str> = before_colon.split_whitespace().collect();
        if parts.len() < 2 {
            return Err("not enough fields before colon".into());
        }

        let comm = parts[0].to_string();
        let (pid, tid) = Self::parse_pid_tid(parts[1])?;

        Ok(PerfSample {
            comm,
            pid,
            tid,
            period,
            event,
            frames: Vec::new(),
        })
    }

    fn parse_pid_tid(s: &str) -> std::result::Result<(u64, u64), String> {
        if let Some((pid, tid)) = s.split_once('/') {
            let pid = pid.parse().map_err(|_| "invalid pid")?;
            let tid = tid.parse().map_err(|_| "invalid tid")?;
            Ok((pid, tid))
        } else {
            let pid = s.parse().map_err(|_| "invalid pid")?;
            Ok((pid, pid))
        }
    }

    /// Parse a stack frame line.
    /// Format: `\t ip symbol+offset (dso)`
    /// Examples:
    ///   `\t 401234 main+0x54 (/usr/bin/myapp)`
    ///   `\t ffffffff81234567 native_write_msr+0x6 ([kernel.kallsyms])`
    fn parse_frame(line: &str) -> Option<PerfFrame> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let dso_start = line.rfind('(')?;
        let dso_end = line.rfind(')')?;
        if dso_end <= dso_start {
            return None;
        }
        let dso = line[dso_start + 1..dso_end].to_string();

        let before_dso = line[..dso_start].trim();
        let parts: Vec<&str> = before_dso.split_whitespace().collect();
        if parts.is_empty() {
            return None;
        }

        // Demangled names may contain spaces
        let symbol_part = if parts.len() > 1 {
            parts[1..].join(" ")
        } else {
            format!("0x{}", parts[0])
        };

        // Drop the +0x offset
        let symbol = match symbol_part.rsplit_once('+') {
            Some((sym, off)) if off.starts_with("0x") => sym.to_string(),
            _ => symbol_part,
        };

        Some(PerfFrame { symbol, dso })
    }

    /// The aggregated samples as normalized records.
    ///
    /// Times are in the unit of the sample period (usually events).
    pub fn records(&self) -> Result<Vec<Record>> {
        if self.sample_count == 0 {
            return Err(ConvertError::NoSamples);
        }

        let mut records = Vec::with_capacity(1 + self.functions.len() + self.calls.len());
        records.push(Record::from(TotalRecord {
            time: self.total_period as f64,
        }));

        for (id, data) in &self.functions {
            let mut function = FunctionRecord::new(id.clone())
                .with_self_time(data.self_period as f64)
                .with_total_time(data.total_period as f64);
            function.samples = Some(data.samples);
            records.push(function.into());
        }

        for ((caller, callee), data) in &self.calls {
            let call = CallRecord::new(caller.clone(), callee.clone(), data.samples)
                .with_edge_time(data.period as f64);
            records.push(call.into());
        }

        Ok(records)
    }
}

impl Default for PerfConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profdot_graph::{GraphConfig, TotalMethod, analyze};
    use std::io::Cursor;

    const SAMPLE_PERF_OUTPUT: &str = r#"
myapp  1234 [000] 12345.678901:     100000 cycles:
	401234 main+0x54 (/usr/bin/myapp)
	7f1234567890 __libc_start_main+0x80 (/lib/x86_64-linux-gnu/libc.so.6)

myapp  1234 [001] 12345.679000:     100000 cycles:
	401234 main+0x54 (/usr/bin/myapp)
	7f1234567890 __libc_start_main+0x80 (/lib/x86_64-linux-gnu/libc.so.6)

myapp  1234 [000] 12345.680000:     100000 cycles:
	401280 foo+0x10 (/usr/bin/myapp)
	401234 main+0x54 (/usr/bin/myapp)
	7f1234567890 __libc_start_main+0x80 (/lib/x86_64-linux-gnu/libc.so.6)
"#;

    const RECURSIVE_PERF_OUTPUT: &str = r#"
myapp  1234 [000] 1.000000:     10 cycles:
	401300 fact+0x8 (/usr/bin/myapp)
	401300 fact+0x8 (/usr/bin/myapp)
	401300 fact+0x8 (/usr/bin/myapp)
	401234 main+0x54 (/usr/bin/myapp)
"#;

    fn converted(input: &str) -> PerfConverter {
        let mut converter = PerfConverter::new();
        converter.parse(Cursor::new(input)).unwrap();
        converter
    }

    fn myapp(symbol: &str) -> FunctionId {
        FunctionId::new("myapp", 0, symbol)
    }

    #[test]
    fn parse_sample_header_basic() {
        let line = "myapp  1234 [000] 12345.678901:     100000 cycles:";
        let sample = PerfConverter::parse_sample_header(line).unwrap();

        assert_eq!(sample.comm, "myapp");
        assert_eq!(sample.pid, 1234);
        assert_eq!(sample.tid, 1234);
        assert_eq!(sample.period, 100000);
        assert_eq!(sample.event, "cycles");
    }

    #[test]
    fn parse_sample_header_with_tid() {
        let line = "myapp  1234/5678 [002] 12345.678901:     200000 cycles:";
        let sample = PerfConverter::parse_sample_header(line).unwrap();

        assert_eq!(sample.pid, 1234);
        assert_eq!(sample.tid, 5678);
        assert_eq!(sample.period, 200000);
    }

    #[test]
    fn parse_sample_header_without_period() {
        let line = "myapp  1234 12345.678901: cycles:";
        let sample = PerfConverter::parse_sample_header(line).unwrap();
        assert_eq!(sample.period, 1);
        assert_eq!(sample.event, "cycles");
    }

    #[test]
    fn parse_frame_basic() {
        let line = "\t401234 main+0x54 (/usr/bin/myapp)";
        let frame = PerfConverter::parse_frame(line).unwrap();

        assert_eq!(frame.symbol, "main");
        assert_eq!(frame.dso, "/usr/bin/myapp");
        assert_eq!(frame.function_id(), myapp("main"));
    }

    #[test]
    fn parse_frame_kernel() {
        let line = "\tffffffff81234567 native_write_msr+0x6 ([kernel.kallsyms])";
        let frame = PerfConverter::parse_frame(line).unwrap();

        assert_eq!(frame.symbol, "native_write_msr");
        assert_eq!(frame.dso, "[kernel.kallsyms]");
        assert_eq!(frame.function_id().module, "[kernel.kallsyms]");
    }

    #[test]
    fn parse_frame_keeps_operator_plus() {
        let line = "\t401234 Vec::operator+ (/usr/bin/myapp)";
        let frame = PerfConverter::parse_frame(line).unwrap();

        assert_eq!(frame.symbol, "Vec::operator+");
    }

    #[test]
    fn parse_frame_without_symbol_uses_address() {
        let frame = PerfConverter::parse_frame("\t401234 (/usr/bin/myapp)").unwrap();
        assert_eq!(frame.symbol, "0x401234");
    }

    #[test]
    fn parse_frame_unresolved() {
        let line = "\t401234 [unknown] (/usr/bin/myapp)";
        let frame = PerfConverter::parse_frame(line).unwrap();
        assert_eq!(frame.symbol, "[unknown]");
    }

    #[test]
    fn samples_aggregate_into_functions() {
        let converter = converted(SAMPLE_PERF_OUTPUT);
        assert_eq!(converter.sample_count, 3);
        assert_eq!(converter.total_period, 300000);

        let main = &converter.functions[&myapp("main")];
        assert_eq!(main.self_period, 200000);
        assert_eq!(main.total_period, 300000);
        assert_eq!(main.samples, 3);

        let foo = &converter.functions[&myapp("foo")];
        assert_eq!(foo.self_period, 100000);
        assert_eq!(foo.total_period, 100000);

        let start = FunctionId::new("libc.so.6", 0, "__libc_start_main");
        assert_eq!(converter.functions[&start].self_period, 0);
    }

    #[test]
    fn adjacent_frames_become_calls() {
        let records = converted(SAMPLE_PERF_OUTPUT).records().unwrap();
        assert_eq!(records[0], Record::Total(TotalRecord { time: 300000.0 }));

        let call = records
            .iter()
            .find_map(|r| match r {
                Record::Call(c) if c.callee == myapp("main") => Some(c),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.caller.name, "__libc_start_main");
        assert_eq!(call.calls, 3);
        assert_eq!(call.edge_time, Some(300000.0));

        let calls = records
            .iter()
            .filter(|r| matches!(r, Record::Call(_)))
            .count();
        assert_eq!(calls, 2);
    }

    #[test]
    fn recursion_is_charged_once_per_sample() {
        let converter = converted(RECURSIVE_PERF_OUTPUT);

        let fact = &converter.functions[&myapp("fact")];
        assert_eq!(fact.total_period, 10);
        assert_eq!(fact.self_period, 10);

        let self_call = &converter.calls[&(myapp("fact"), myapp("fact"))];
        assert_eq!(self_call.samples, 1);
        assert_eq!(self_call.period, 10);
    }

    #[test]
    fn empty_input_returns_error() {
        let converter = converted("");
        assert!(matches!(converter.records(), Err(ConvertError::NoSamples)));
    }

    #[test]
    fn samples_without_frames_are_ignored() {
        let input = "myapp  1234 [000] 1.0:     10 cycles:\n\n";
        let converter = converted(input);
        assert!(matches!(converter.records(), Err(ConvertError::NoSamples)));
    }

    #[test]
    fn records_support_call_stack_analysis() {
        let records = converted(SAMPLE_PERF_OUTPUT).records().unwrap();
        let config = GraphConfig {
            node_threshold_pct: 0.0,
            edge_threshold_pct: 0.0,
            total_method: TotalMethod::CallStack,
            ..GraphConfig::default()
        };
        let display = analyze(records, &config).unwrap();

        let main = display.node_for(&myapp("main")).unwrap();
        assert!((main.total_pct - 100.0).abs() < 1e-9);
        let foo = display.node_for(&myapp("foo")).unwrap();
        assert!((foo.total_pct - 100.0 / 3.0).abs() < 1e-9);
    }
}
