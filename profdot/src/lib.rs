//! Profiler front ends and renderers for call graphs.
//!
//! This crate turns profiler dumps into the normalized records understood by
//! [`profdot_graph`], and renders the analysed graph as Graphviz DOT.
//!
//! # Input Adapters
//!
//! - [`records`] - Read and write newline-delimited JSON records
//! - [`gprof`] - Parse the call graph section of GNU `gprof` output
//! - [`pstats`] - Decode Python `cProfile` / `profile` dumps
//! - [`perf`] - Aggregate Linux `perf script` stack samples
//!
//! # Output
//!
//! - [`dot`] - Write a display graph in the DOT language
//! - [`names`] - Shorten demangled C++ names for display
//!
//! # Example
//!
//! ```no_run
//! use profdot::dot::{ColorMap, DotWriter};
//! use profdot::gprof::GprofParser;
//! use profdot::names::NameFormat;
//! use profdot_graph::{GraphConfig, analyze};
//! use std::fs::File;
//! use std::io::{BufReader, BufWriter};
//!
//! let input = BufReader::new(File::open("gprof.txt").unwrap());
//! let mut parser = GprofParser::new();
//! parser.parse(input).unwrap();
//! let display = analyze(parser.records().unwrap(), &GraphConfig::default()).unwrap();
//!
//! let output = BufWriter::new(File::create("callgraph.dot").unwrap());
//! let mut dot = DotWriter::new(output, NameFormat::default()).unwrap();
//! dot.graph(&display, &ColorMap::TEMPERATURE).unwrap();
//! ```

pub mod dot;
pub mod gprof;
pub mod names;
pub mod perf;
pub mod pstats;
pub mod records;

// Re-export profdot_graph for convenience
pub use profdot_graph;
