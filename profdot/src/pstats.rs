//! Convert Python profiler dumps to call records.
//!
//! `cProfile` and `profile` save their statistics through `pstats`, which
//! writes a single `marshal`-encoded dict:
//!
//! ```text
//! (filename, line, name) -> (primitive calls, calls, self time, cumulative time, callers)
//! callers: (filename, line, name) -> (calls, primitive calls, self time, cumulative time)
//! ```
//!
//! Older `profile` dumps store a bare call count per caller instead of the
//! tuple. Both marshal versions 2 (Python 2) and 4 (Python 3) are decoded.
//!
//! # Example
//!
//! ```no_run
//! use profdot::pstats::PstatsParser;
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! let input = BufReader::new(File::open("app.pstats").unwrap());
//!
//! let mut parser = PstatsParser::new();
//! parser.parse(input).unwrap();
//! let records = parser.records().unwrap();
//! ```

use log::debug;
use profdot_graph::{CallRecord, FunctionId, FunctionRecord, Record, TotalRecord};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during pstats parsing.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("marshal error at byte {offset}: {message}")]
    Marshal { offset: usize, message: String },

    #[error("unexpected pstats layout: {0}")]
    Format(String),

    #[error("no profiled functions found")]
    NoFunctions,
}

pub type Result<T> = std::result::Result<T, ConvertError>;

// ============================================================================
// Marshal decoding
// ============================================================================

const FLAG_REF: u8 = 0x80;
const MAX_DEPTH: usize = 64;

/// The subset of Python objects a stats dump can contain.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Text and byte strings alike; Python 2 dumps store file names as bytes.
    Text(String),
    Tuple(Vec<Value>),
    /// Lists and sets.
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

impl Value {
    fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) | Value::List(items) => Some(items),
            _ => None,
        }
    }

    fn as_dict(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    /// Objects written with the ref flag, in the order they started.
    refs: Vec<Value>,
    /// Python 2 interned strings, addressed by `R`.
    interned: Vec<Value>,
    depth: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            refs: Vec::new(),
            interned: Vec::new(),
            depth: 0,
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(ConvertError::Marshal {
            offset: self.pos,
            message: message.into(),
        })
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let data: &'a [u8] = self.data;
        let Some(bytes) = data.get(self.pos..self.pos.saturating_add(n)) else {
            return self.error(format!("truncated input, wanted {} more bytes", n));
        };
        self.pos += n;
        Ok(bytes)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn f64(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn len(&mut self) -> Result<usize> {
        let n = self.i32()?;
        match usize::try_from(n) {
            Ok(n) => Ok(n),
            Err(_) => self.error(format!("negative length {}", n)),
        }
    }

    /// Arbitrary precision integer: signed digit count, then 15-bit digits,
    /// least significant first.
    fn long(&mut self) -> Result<i64> {
        let n = self.i32()?;
        let count = n.unsigned_abs() as usize;
        let mut digits = Vec::with_capacity(count.min(self.remaining() / 2));
        for _ in 0..count {
            let b = self.take(2)?;
            digits.push(i64::from(u16::from_le_bytes([b[0], b[1]])));
        }
        let magnitude = digits
            .iter()
            .rev()
            .try_fold(0i64, |acc, &d| acc.checked_mul(1 << 15)?.checked_add(d));
        match magnitude {
            Some(m) if n < 0 => Ok(-m),
            Some(m) => Ok(m),
            None => self.error("integer out of range"),
        }
    }

    fn text(&mut self, n: usize) -> Result<Value> {
        let bytes = self.take(n)?;
        Ok(Value::Text(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn interned_text(&mut self, n: usize) -> Result<Value> {
        let value = self.text(n)?;
        self.interned.push(value.clone());
        Ok(value)
    }

    fn items(&mut self, n: usize) -> Result<Vec<Value>> {
        let mut items = Vec::with_capacity(n.min(self.remaining()));
        for _ in 0..n {
            items.push(self.object()?);
        }
        Ok(items)
    }

    fn object(&mut self) -> Result<Value> {
        match self.value()? {
            Some(value) => Ok(value),
            None => self.error("unexpected null object"),
        }
    }

    /// The next object, or `None` for the null marker that ends a dict.
    fn value(&mut self) -> Result<Option<Value>> {
        if self.depth >= MAX_DEPTH {
            return self.error("objects nested too deeply");
        }
        let code = self.byte()?;
        let kind = code & !FLAG_REF;
        if kind == b'0' {
            return Ok(None);
        }

        // The slot is taken before any contained object is read.
        let slot = (code & FLAG_REF != 0).then(|| {
            self.refs.push(Value::None);
            self.refs.len() - 1
        });

        self.depth += 1;
        let value = self.body(kind);
        self.depth -= 1;
        let value = value?;

        if let Some(slot) = slot {
            self.refs[slot] = value.clone();
        }
        Ok(Some(value))
    }

    fn body(&mut self, kind: u8) -> Result<Value> {
        let value = match kind {
            b'N' | b'S' | b'.' => Value::None,
            b'F' => Value::Bool(false),
            b'T' => Value::Bool(true),
            b'i' => Value::Int(self.i32()?.into()),
            b'I' => Value::Int(self.i64()?),
            b'l' => Value::Int(self.long()?),
            b'g' => Value::Float(self.f64()?),
            b'f' => {
                let n = usize::from(self.byte()?);
                let bytes = self.take(n)?;
                match std::str::from_utf8(bytes).ok().and_then(|s| s.parse().ok()) {
                    Some(f) => Value::Float(f),
                    None => return self.error("malformed float"),
                }
            }
            b's' | b'u' | b'a' => {
                let n = self.len()?;
                self.text(n)?
            }
            b't' | b'A' => {
                let n = self.len()?;
                self.interned_text(n)?
            }
            b'z' => {
                let n = usize::from(self.byte()?);
                self.text(n)?
            }
            b'Z' => {
                let n = usize::from(self.byte()?);
                self.interned_text(n)?
            }
            b'r' => {
                let i = self.len()?;
                match self.refs.get(i) {
                    Some(value) => value.clone(),
                    None => return self.error(format!("reference {} out of range", i)),
                }
            }
            b'R' => {
                let i = self.len()?;
                match self.interned.get(i) {
                    Some(value) => value.clone(),
                    None => return self.error(format!("string reference {} out of range", i)),
                }
            }
            b'(' => {
                let n = self.len()?;
                Value::Tuple(self.items(n)?)
            }
            b')' => {
                let n = usize::from(self.byte()?);
                Value::Tuple(self.items(n)?)
            }
            b'[' | b'<' | b'>' => {
                let n = self.len()?;
                Value::List(self.items(n)?)
            }
            b'{' => {
                let mut entries = Vec::new();
                while let Some(key) = self.value()? {
                    let value = self.object()?;
                    entries.push((key, value));
                }
                Value::Dict(entries)
            }
            other => {
                return self.error(format!("unsupported type code {:?}", char::from(other)));
            }
        };
        Ok(value)
    }
}

// ============================================================================
// Stats layout
// ============================================================================

#[derive(Debug, Clone)]
struct Caller {
    id: FunctionId,
    calls: u64,
    time: Option<f64>,
}

#[derive(Debug, Clone)]
struct ProfiledFunction {
    id: FunctionId,
    calls: u64,
    self_time: f64,
    total_time: f64,
    callers: Vec<Caller>,
}

fn layout_error<T>(message: String) -> Result<T> {
    Err(ConvertError::Format(message))
}

/// `(filename, line, name)`, keyed by the file's base name without
/// extension so ids stay readable.
fn function_id(key: &Value) -> Result<FunctionId> {
    let Some([file, line, name]) = key.as_tuple() else {
        return layout_error(format!("function key is not a 3-tuple: {:?}", key));
    };
    let (Some(file), Some(line), Some(name)) = (file.as_text(), line.as_int(), name.as_text())
    else {
        return layout_error(format!("malformed function key {:?}", key));
    };
    let module = Path::new(file)
        .file_stem()
        .map_or_else(String::new, |stem| stem.to_string_lossy().into_owned());
    let Ok(line) = u32::try_from(line) else {
        return layout_error(format!("line number {} out of range", line));
    };
    Ok(FunctionId::new(module, line, name))
}

fn count(value: &Value, what: &str) -> Result<u64> {
    match value.as_int().map(u64::try_from) {
        Some(Ok(n)) => Ok(n),
        _ => layout_error(format!("{} is not a call count: {:?}", what, value)),
    }
}

fn seconds(value: &Value, what: &str) -> Result<f64> {
    match value.as_float() {
        Some(t) => Ok(t),
        None => layout_error(format!("{} is not a time: {:?}", what, value)),
    }
}

fn parse_function(key: &Value, value: &Value) -> Result<ProfiledFunction> {
    let id = function_id(key)?;
    let Some([_, calls, self_time, total_time, callers]) = value.as_tuple() else {
        return layout_error(format!("stats for {} are not a 5-tuple", id));
    };
    let Some(callers) = callers.as_dict() else {
        return layout_error(format!("callers of {} are not a dict", id));
    };

    let callers = callers
        .iter()
        .map(|(key, value)| {
            let id = function_id(key)?;
            match value.as_tuple() {
                Some([_, primitive, _, total]) => Ok(Caller {
                    id,
                    calls: count(primitive, "caller primitive calls")?,
                    time: Some(seconds(total, "caller cumulative time")?),
                }),
                _ => Ok(Caller {
                    id,
                    calls: count(value, "caller calls")?,
                    time: None,
                }),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ProfiledFunction {
        calls: count(calls, "calls")?,
        self_time: seconds(self_time, "self time")?,
        total_time: seconds(total_time, "cumulative time")?,
        id,
        callers,
    })
}

// ============================================================================
// Parser
// ============================================================================

/// Reads `pstats` dumps and emits call records.
#[derive(Debug, Default)]
pub struct PstatsParser {
    functions: Vec<ProfiledFunction>,
}

impl PstatsParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one dump. Functions from several dumps accumulate.
    pub fn parse<R: Read>(&mut self, mut reader: R) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        let stats = Decoder::new(&data).object()?;
        let Some(entries) = stats.as_dict() else {
            return layout_error("top-level object is not a dict".to_string());
        };
        for (key, value) in entries {
            self.functions.push(parse_function(key, value)?);
        }

        debug!(
            "decoded {} bytes of pstats, {} functions",
            data.len(),
            entries.len()
        );
        Ok(())
    }

    /// Total, function and call records. The total is the larger of the
    /// summed self times and the largest cumulative time.
    pub fn records(&self) -> Result<Vec<Record>> {
        if self.functions.is_empty() {
            return Err(ConvertError::NoFunctions);
        }

        let self_sum: f64 = self.functions.iter().map(|f| f.self_time).sum();
        let longest = self
            .functions
            .iter()
            .map(|f| f.total_time)
            .fold(0.0, f64::max);
        let mut records = vec![Record::from(TotalRecord {
            time: self_sum.max(longest),
        })];

        for function in &self.functions {
            let mut record = FunctionRecord::new(function.id.clone())
                .with_self_time(function.self_time)
                .with_total_time(function.total_time);
            record.calls = Some(function.calls);
            records.push(record.into());

            for caller in &function.callers {
                let mut call =
                    CallRecord::new(caller.id.clone(), function.id.clone(), caller.calls);
                call.edge_time = caller.time;
                records.push(call.into());
            }
        }

        Ok(records)
    }
}
