//! Newline-delimited JSON call records.
//!
//! Each line holds one [`Record`] tagged by its `"type"` field:
//!
//! ```text
//! {"type":"total","time":12.5}
//! {"type":"function","id":{"name":"main"},"self_time":0.5}
//! {"type":"call","caller":{"name":"main"},"callee":{"name":"work"},"calls":3}
//! ```
//!
//! Blank lines are skipped. Errors report the 1-based line number.

use profdot_graph::Record;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Lines, Read, Write};
use thiserror::Error;

/// Errors that can occur while reading or writing records.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error at line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown record type '{record_type}' at line {line}")]
    UnknownRecordType { record_type: String, line: usize },

    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Just enough of a line to dispatch on.
#[derive(Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    record_type: String,
}

const RECORD_TYPES: [&str; 3] = ["call", "function", "total"];

/// Streaming reader over a record file.
pub struct RecordReader<R> {
    lines: Lines<BufReader<R>>,
    line_num: usize,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            line_num: 0,
        }
    }

    /// Read every remaining record, stopping at the first error.
    pub fn read_all(self) -> Result<Vec<Record>> {
        self.collect()
    }

    fn parse_line(&self, line: &str) -> Result<Record> {
        let json_error = |source| ConvertError::Json {
            line: self.line_num,
            source,
        };

        let raw: RawRecord = serde_json::from_str(line).map_err(json_error)?;
        if !RECORD_TYPES.contains(&raw.record_type.as_str()) {
            return Err(ConvertError::UnknownRecordType {
                record_type: raw.record_type,
                line: self.line_num,
            });
        }
        serde_json::from_str(line).map_err(json_error)
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_num += 1;

            if line.trim().is_empty() {
                continue;
            }
            return Some(self.parse_line(&line));
        }
    }
}

/// Writes one record per line.
pub struct RecordWriter<W: Write> {
    writer: W,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write(&mut self, record: &Record) -> Result<()> {
        writeln!(self.writer, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    pub fn write_all<'a, I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        for record in records {
            self.write(record)?;
        }
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profdot_graph::{CallRecord, FunctionId, FunctionRecord, TotalRecord};
    use std::io::Cursor;

    const SAMPLE_RECORDS: &str = r#"{"type":"total","time":10.0}
{"type":"function","id":{"name":"main"},"self_time":1.0}

{"type":"call","caller":{"name":"main"},"callee":{"module":"lib.c","line":12,"name":"work"},"calls":3,"edge_time":9.0}
"#;

    #[test]
    fn reads_all_record_kinds() {
        let records = RecordReader::new(Cursor::new(SAMPLE_RECORDS))
            .read_all()
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0], Record::Total(TotalRecord { time: 10.0 }));
        assert_eq!(
            records[1],
            Record::Function(FunctionRecord::new(FunctionId::named("main")).with_self_time(1.0))
        );
        match &records[2] {
            Record::Call(call) => {
                assert_eq!(call.callee, FunctionId::new("lib.c", 12, "work"));
                assert_eq!(call.calls, 3);
                assert_eq!(call.edge_time, Some(9.0));
                assert_eq!(call.self_time, None);
            }
            other => panic!("expected a call, got {:?}", other),
        }
    }

    #[test]
    fn missing_call_count_defaults_to_zero() {
        let input = r#"{"type":"call","caller":{"name":"a"},"callee":{"name":"b"}}"#;
        let records = RecordReader::new(Cursor::new(input)).read_all().unwrap();
        assert_eq!(
            records,
            vec![Record::Call(CallRecord::new(
                FunctionId::named("a"),
                FunctionId::named("b"),
                0
            ))]
        );
    }

    #[test]
    fn unknown_type_reports_line() {
        let input = "{\"type\":\"total\",\"time\":1.0}\n\n{\"type\":\"sample\"}\n";
        let err = RecordReader::new(Cursor::new(input))
            .read_all()
            .unwrap_err();
        match err {
            ConvertError::UnknownRecordType { record_type, line } => {
                assert_eq!(record_type, "sample");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn malformed_json_reports_line() {
        let input = "{\"type\":\"total\",\"time\":1.0}\n{\"type\":\"call\",\n";
        let err = RecordReader::new(Cursor::new(input))
            .read_all()
            .unwrap_err();
        assert!(matches!(err, ConvertError::Json { line: 2, .. }));
    }

    #[test]
    fn missing_required_field_is_a_json_error() {
        let input = r#"{"type":"call","caller":{"name":"a"}}"#;
        let err = RecordReader::new(Cursor::new(input))
            .read_all()
            .unwrap_err();
        assert!(matches!(err, ConvertError::Json { line: 1, .. }));
    }

    #[test]
    fn writer_output_reads_back() {
        let records = vec![
            Record::Total(TotalRecord { time: 4.0 }),
            Record::Call(
                CallRecord::new(FunctionId::named("main"), FunctionId::named("f"), 2)
                    .with_edge_time(4.0),
            ),
        ];

        let mut writer = RecordWriter::new(Vec::new());
        writer.write_all(&records).unwrap();
        let output = writer.into_inner().unwrap();

        let text = String::from_utf8(output.clone()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|l| l.contains("\"type\":")));

        let back = RecordReader::new(Cursor::new(output)).read_all().unwrap();
        assert_eq!(back, records);
    }
}
