//! Render profiler output as a Graphviz call graph.
//!
//! This binary reads a profile, assembles the weighted call graph, collapses
//! recursion cycles, propagates inclusive time, prunes insignificant nodes
//! and edges, and writes the result in the DOT language.
//!
//! Supported input formats:
//! - `prof`: GNU gprof call graph text
//! - `pstats`: Python `cProfile` / `profile` dumps
//! - `perf`: Linux `perf script` output
//! - `records`: newline-delimited JSON call records
//!
//! # Usage
//!
//! ```bash
//! gprof ./app | profdot | dot -Tpng -o callgraph.png
//! profdot -f perf perf.txt -o callgraph.dot --total call-stack
//! python -m cProfile -o app.pstats app.py && profdot -f pstats app.pstats
//! profdot -f records calls.jsonl -n 1 -e 0.5 --root '^main$'
//! profdot profile.txt --config profdot.json -c gray -s -w
//! ```
//!
//! Set `RUST_LOG=debug` to see per-phase summaries on stderr.

use clap::{Parser, ValueEnum};
use log::info;
use profdot::dot::{ColorMap, DotWriter};
use profdot::gprof::GprofParser;
use profdot::names::NameFormat;
use profdot::perf::PerfConverter;
use profdot::pstats::PstatsParser;
use profdot::records::RecordReader;
use profdot_graph::{GraphConfig, Record, TotalMethod, analyze};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// Newline-delimited JSON call records
    Records,
    /// GNU gprof call graph
    Prof,
    /// Python profiler statistics
    Pstats,
    /// Linux perf script output
    Perf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Colormap {
    /// Dark blue to red
    Color,
    /// Pink to red
    Pink,
    /// Light gray to black
    Gray,
}

impl From<Colormap> for ColorMap {
    fn from(c: Colormap) -> Self {
        match c {
            Colormap::Color => ColorMap::TEMPERATURE,
            Colormap::Pink => ColorMap::PINK,
            Colormap::Gray => ColorMap::GRAY,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Total {
    /// Split a callee's time among callers by call counts
    CallRatio,
    /// Use cumulative times measured on the call stack
    CallStack,
}

impl From<Total> for TotalMethod {
    fn from(t: Total) -> Self {
        match t {
            Total::CallRatio => TotalMethod::CallRatio,
            Total::CallStack => TotalMethod::CallStack,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Emit {
    /// Graphviz DOT
    Dot,
    /// The pruned display graph as JSON
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "profdot")]
#[command(about = "Convert profiler output into a weighted call graph")]
#[command(version)]
struct Args {
    /// Input profile (defaults to stdin)
    input: Option<PathBuf>,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Eliminate nodes below this percentage of the total [default: 0.5]
    #[arg(short = 'n', long = "node-thres", value_name = "PERCENTAGE")]
    node_threshold: Option<f64>,

    /// Eliminate edges below this percentage of the total [default: 0.1]
    #[arg(short = 'e', long = "edge-thres", value_name = "PERCENTAGE")]
    edge_threshold: Option<f64>,

    /// Profile format
    #[arg(short, long, value_enum, default_value = "prof")]
    format: Format,

    /// Color map
    #[arg(short, long, value_enum, default_value = "color")]
    colormap: Colormap,

    /// Strip function parameters, template parameters, and const modifiers
    /// from demangled C++ function names
    #[arg(short, long)]
    strip: bool,

    /// Wrap function names
    #[arg(short, long)]
    wrap: bool,

    /// How inclusive time is computed [default: call-ratio]
    #[arg(long, value_enum)]
    total: Option<Total>,

    /// Only show functions reachable from those matching this regex
    #[arg(long, value_name = "REGEX")]
    root: Option<String>,

    /// Only show functions that reach those matching this regex
    #[arg(long, value_name = "REGEX")]
    leaf: Option<String>,

    /// JSON analysis config; command-line options take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output kind
    #[arg(long, value_enum, default_value = "dot")]
    emit: Emit,
}

impl Args {
    fn graph_config(&self) -> Result<GraphConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => {
                let file = File::open(path).map_err(|e| {
                    format!("Failed to open config file '{}': {}", path.display(), e)
                })?;
                GraphConfig::from_reader(BufReader::new(file))?
            }
            None => GraphConfig::default(),
        };

        if let Some(pct) = self.node_threshold {
            config.node_threshold_pct = pct;
        }
        if let Some(pct) = self.edge_threshold {
            config.edge_threshold_pct = pct;
        }
        if let Some(total) = self.total {
            config.total_method = total.into();
        }
        if let Some(root) = &self.root {
            config.root_selector = Some(root.clone());
        }
        if let Some(leaf) = &self.leaf {
            config.leaf_selector = Some(leaf.clone());
        }
        Ok(config)
    }
}

fn read_records<R: Read>(
    format: Format,
    reader: R,
) -> Result<Vec<Record>, Box<dyn std::error::Error>> {
    let records = match format {
        Format::Records => RecordReader::new(reader).read_all()?,
        Format::Prof => {
            let mut parser = GprofParser::new();
            parser.parse(reader)?;
            parser.records()?
        }
        Format::Pstats => {
            let mut parser = PstatsParser::new();
            parser.parse(reader)?;
            parser.records()?
        }
        Format::Perf => {
            let mut converter = PerfConverter::new();
            converter.parse(reader)?;
            converter.records()?
        }
    };
    Ok(records)
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.graph_config()?;
    // Reject bad selectors and thresholds before reading any input
    config.prune_options()?;

    let records = match &args.input {
        Some(path) => {
            let file = File::open(path)
                .map_err(|e| format!("Failed to open input file '{}': {}", path.display(), e))?;
            read_records(args.format, BufReader::new(file))?
        }
        None => read_records(args.format, io::stdin().lock())?,
    };
    info!("read {} records", records.len());

    let display = analyze(records, &config)?;
    info!(
        "display graph: {} nodes, {} edges, total {}",
        display.nodes.len(),
        display.edges.len(),
        display.total_time
    );

    // Render fully before touching the output
    let rendered = match args.emit {
        Emit::Dot => {
            let format = NameFormat {
                strip: args.strip,
                wrap: args.wrap,
            };
            let mut dot = DotWriter::new(Vec::new(), format)?;
            dot.graph(&display, &args.colormap.into())?;
            dot.into_inner()
        }
        Emit::Json => {
            let mut json = serde_json::to_vec_pretty(&display)?;
            json.push(b'\n');
            json
        }
    };

    match &args.output {
        Some(path) => {
            let mut file = File::create(path).map_err(|e| {
                format!("Failed to create output file '{}': {}", path.display(), e)
            })?;
            file.write_all(&rendered)?;
            file.flush()?;
            info!("wrote '{}'", path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&rendered)?;
            stdout.flush()?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
